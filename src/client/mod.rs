//! Registry client: document schema, transport, and the rate-limited API.

mod api;
mod document;
mod transport;

pub use api::Client;
pub use document::{serialize, Description, Document, Product};
pub use transport::{HttpTransport, Transport, TransportRequest, SIGNATURE_HEADER};
