//! HTTP transport used by the client.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Result, TransportError};

/// Header carrying the document signature.
pub const SIGNATURE_HEADER: &str = "Signature";

const CONTENT_TYPE_HEADER: &str = "Content-Type";
const JSON_CONTENT_TYPE: &str = "application/json";

/// A single POST to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TransportRequest {
    /// Build a JSON request signed with `signature`.
    pub fn json(url: impl Into<String>, signature: &str, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            headers: vec![
                (CONTENT_TYPE_HEADER.to_string(), JSON_CONTENT_TYPE.to_string()),
                (SIGNATURE_HEADER.to_string(), signature.to_string()),
            ],
            body,
        }
    }

    /// Look up a header value, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Trait for transports that deliver a request and report its status code.
///
/// Non-success statuses are returned as codes; only failures to complete
/// the exchange are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the HTTP status code.
    async fn send(&self, request: TransportRequest) -> std::result::Result<u16, TransportError>;

    /// Release any resources held by the transport.
    async fn close(&self) {}
}

/// [`Transport`] backed by a pooled `reqwest` client.
pub struct HttpTransport {
    /// `None` once closed
    client: RwLock<Option<reqwest::Client>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("closed", &self.client.read().is_none())
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport with the given per-request timeout and user agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }

    /// Create a transport from client configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(config.request_timeout(), &config.user_agent)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> std::result::Result<u16, TransportError> {
        // reqwest::Client is a cheap handle; don't hold the lock across the await
        let client = self.client.read().clone().ok_or(TransportError::Closed)?;

        let mut builder = client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(request.body).send().await?;
        let status = response.status().as_u16();

        debug!(url = %request.url, status = status, "Registry responded");

        Ok(status)
    }

    async fn close(&self) {
        if self.client.write().take().is_some() {
            debug!("HTTP transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, capture the raw request, reply with `status`.
    async fn serve_once(status: u16) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/v3/lk/documents/create", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];

            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);

                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!("HTTP/1.1 {} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            String::from_utf8_lossy(&raw).to_string()
        });

        (url, handle)
    }

    #[test]
    fn test_json_request_headers() {
        let request = TransportRequest::json("http://localhost/create", "sig-123", b"{}".to_vec());
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("Signature"), Some("sig-123"));
        assert_eq!(request.header("Authorization"), None);
        assert_eq!(request.body, b"{}");
    }

    #[tokio::test]
    async fn test_http_transport_posts_json() {
        let (url, server) = serve_once(201).await;
        let transport = HttpTransport::new(Duration::from_secs(5), "crpt-api-test").unwrap();

        let body = br#"{"doc_id":"doc12345"}"#.to_vec();
        let status = transport
            .send(TransportRequest::json(url, "sig-abc", body))
            .await
            .unwrap();
        assert_eq!(status, 201);

        let raw = server.await.unwrap();
        let lower = raw.to_lowercase();
        assert!(raw.starts_with("POST /api/v3/lk/documents/create"));
        assert!(lower.contains("content-type: application/json"));
        assert!(lower.contains("signature: sig-abc"));
        assert!(lower.contains("user-agent: crpt-api-test"));
        assert!(raw.ends_with(r#"{"doc_id":"doc12345"}"#));
    }

    #[tokio::test]
    async fn test_http_transport_returns_error_statuses() {
        let (url, server) = serve_once(429).await;
        let transport = HttpTransport::new(Duration::from_secs(5), "crpt-api-test").unwrap();

        let status = transport
            .send(TransportRequest::json(url, "sig", b"{}".to_vec()))
            .await
            .unwrap();
        assert_eq!(status, 429);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_http_transport_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(Duration::from_secs(2), "crpt-api-test").unwrap();
        let result = transport
            .send(TransportRequest::json(format!("http://{}/create", addr), "sig", b"{}".to_vec()))
            .await;
        assert!(matches!(result, Err(TransportError::Request(_))));
    }

    #[tokio::test]
    async fn test_http_transport_closed() {
        let transport = HttpTransport::new(Duration::from_secs(2), "crpt-api-test").unwrap();
        transport.close().await;
        transport.close().await;

        let result = transport
            .send(TransportRequest::json("http://127.0.0.1:9/create", "sig", b"{}".to_vec()))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
