use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crpt_api::client::{Client, Document};
use crpt_api::config::{ClientConfig, RateLimitConfig};

/// Submit a document to the CRPT registry under a request quota.
#[derive(Debug, Parser)]
#[command(name = "crpt-api", version, about)]
struct Args {
    /// YAML configuration file (CRPT__* environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON file holding the document to submit
    #[arg(short, long)]
    document: PathBuf,

    /// Value of the Signature header
    #[arg(short, long)]
    signature: String,

    /// Window length in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Requests admitted per window
    #[arg(long)]
    limit: Option<u32>,

    /// Override the registry endpoint
    #[arg(long)]
    api_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => match (self.window_ms, self.limit) {
                (Some(window_ms), Some(limit)) => {
                    ClientConfig::new(RateLimitConfig { window_ms, limit })
                }
                _ => bail!("either --config or both --window-ms and --limit are required"),
            },
        };

        if let Some(window_ms) = self.window_ms {
            config.rate_limit.window_ms = window_ms;
        }
        if let Some(limit) = self.limit {
            config.rate_limit.limit = limit;
        }
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = args.client_config()?;
    info!(
        api_url = %config.api_url,
        limit = config.rate_limit.limit,
        window_ms = config.rate_limit.window_ms,
        "Configuration loaded"
    );

    let contents = tokio::fs::read_to_string(&args.document)
        .await
        .with_context(|| format!("reading {}", args.document.display()))?;
    let document: Document = serde_json::from_str(&contents).context("parsing document")?;

    let client = Client::http(config)?;

    let outcome = tokio::select! {
        result = client.submit(&document, &args.signature) => Some(result),
        _ = shutdown_signal() => None,
    };

    client.shutdown().await?;

    match outcome {
        Some(Ok(status)) => {
            info!(doc_id = %document.doc_id, status = status, "Document submitted");
            println!("{}", status);
            Ok(())
        }
        Some(Err(e)) => {
            error!(error = %e, "Submission failed");
            Err(e.into())
        }
        None => {
            info!("Submission abandoned");
            Ok(())
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
