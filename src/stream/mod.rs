//! Streaming ingestion.
//!
//! Provider streams arrive as newline-delimited `data: {json}` records split
//! across arbitrary network reads. This module provides:
//! - [`StreamChunk`]: the decoded record type
//! - [`ChunkDecoder`] / [`decode_stream`]: line buffering and lazy decoding
//! - [`StreamIngestor`]: applies chunks to the one node a stream is bound to

mod ingest;
mod parser;

pub use ingest::{IngestStep, StreamIngestor};
pub use parser::{
    decode_line, decode_stream, ByteStream, ChunkDecoder, ChunkStream, LineBuffer, MAX_LINE_BYTES,
};

use serde::{Deserialize, Serialize};

/// One decoded unit of a streamed provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    /// Incremental text.
    Content {
        #[serde(default)]
        delta: String,
    },
    /// Structured fields merged into the node's metadata.
    Metadata {
        #[serde(default)]
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    /// End of a successful stream.
    #[serde(rename_all = "camelCase")]
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_used: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_input: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
    },
    /// End of a failed stream.
    Error {
        #[serde(default, alias = "message")]
        error: Option<String>,
    },
}

impl StreamChunk {
    /// Content chunk carrying `delta`.
    pub fn content(delta: impl Into<String>) -> Self {
        StreamChunk::Content {
            delta: delta.into(),
        }
    }

    /// Complete chunk with optional usage figures.
    pub fn complete(tokens_used: Option<u64>, cost: Option<f64>) -> Self {
        StreamChunk::Complete {
            tokens_used,
            tokens_input: None,
            cost,
        }
    }

    /// Error chunk with a message.
    pub fn error(message: impl Into<String>) -> Self {
        StreamChunk::Error {
            error: Some(message.into()),
        }
    }

    /// Whether this chunk ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamChunk::Complete { .. } | StreamChunk::Error { .. })
    }

    /// Render as a wire line, `data: {json}\n`.
    pub fn to_sse_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n", json)
    }
}
