//! Provider transport contract and the HTTP gateway implementation.
//!
//! A transport either answers a request in one JSON payload or hands back a
//! raw byte stream of `data: {json}` records. Decoding the stream is the
//! job of [`crate::stream`], not the transport.

mod client;
mod types;

pub use client::HttpTransport;
pub use types::{GenerationConfig, GenerationRequest, SingleShotResponse};

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::stream::ByteStream;

/// Boundary to a model provider.
///
/// Dropping the returned [`ByteStream`] must release the underlying connection.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Run a request to completion and return the whole result.
    async fn generate(&self, request: &GenerationRequest) -> TransportResult<SingleShotResponse>;

    /// Start a streamed request; resolves once the provider has accepted it.
    async fn open_stream(&self, request: &GenerationRequest) -> TransportResult<ByteStream>;
}
