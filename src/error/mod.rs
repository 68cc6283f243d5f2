use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Node store invariant violations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Parent node missing or deleted: {parent_id}")]
    DanglingParent { parent_id: String },

    #[error("Node not found: {node_id}")]
    NotFound { node_id: String },

    #[error("Invalid status transition for {node_id}: {from} -> {to}")]
    InvalidTransition {
        node_id: String,
        from: String,
        to: String,
    },

    #[error("Node {node_id} is sealed; field '{field}' can no longer change")]
    Sealed { node_id: String, field: String },

    #[error("Invalid value for {node_id}.{field}: {reason}")]
    InvalidField {
        node_id: String,
        field: String,
        reason: String,
    },

    #[error("Duplicate node id: {node_id}")]
    DuplicateId { node_id: String },

    #[error("Tree integrity violated at {node_id}: {reason}")]
    Integrity { node_id: String, reason: String },
}

/// Usage ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid usage amount for {provider}: {reason}")]
    InvalidAmount { provider: String, reason: String },
}

/// Provider transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Provider unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Stream interrupted: {message}")]
    Stream { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A single stream line that could not be decoded into a chunk.
///
/// Never fatal: the parser logs it and moves on to the next line.
#[derive(Debug, Error)]
pub enum StreamDecodeError {
    #[error("Line is not a data record: {line}")]
    MissingPrefix { line: String },

    #[error("Line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("Malformed chunk JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Terminal generation outcomes that are not a completed node
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation {node_id} failed: {message}")]
    Failed { node_id: String, message: String },

    #[error("Generation {node_id} was cancelled")]
    Cancelled { node_id: String },
}

impl GenerationError {
    /// The id of the node sealed by this outcome.
    pub fn node_id(&self) -> &str {
        match self {
            GenerationError::Failed { node_id, .. } => node_id,
            GenerationError::Cancelled { node_id } => node_id,
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for node store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result type alias for provider transport operations
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DanglingParent {
            parent_id: "node-1".to_string(),
        };
        assert_eq!(err.to_string(), "Parent node missing or deleted: node-1");

        let err = StoreError::NotFound {
            node_id: "node-2".to_string(),
        };
        assert_eq!(err.to_string(), "Node not found: node-2");

        let err = StoreError::InvalidTransition {
            node_id: "node-3".to_string(),
            from: "completed".to_string(),
            to: "processing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition for node-3: completed -> processing"
        );

        let err = StoreError::Sealed {
            node_id: "node-4".to_string(),
            field: "content".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Node node-4 is sealed; field 'content' can no longer change"
        );
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Unavailable {
            message: "gateway down".to_string(),
            retries: 3,
        };
        assert_eq!(
            err.to_string(),
            "Provider unavailable: gateway down (retries: 3)"
        );

        let err = TransportError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = TransportError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");

        let err = TransportError::Stream {
            message: "connection reset".to_string(),
        };
        assert_eq!(err.to_string(), "Stream interrupted: connection reset");
    }

    #[test]
    fn test_stream_decode_error_display() {
        let err = StreamDecodeError::MissingPrefix {
            line: "event: ping".to_string(),
        };
        assert_eq!(err.to_string(), "Line is not a data record: event: ping");

        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = StreamDecodeError::from(json_err);
        assert!(err.to_string().starts_with("Malformed chunk JSON"));
    }

    #[test]
    fn test_generation_error_node_id() {
        let err = GenerationError::Failed {
            node_id: "n1".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.node_id(), "n1");
        assert_eq!(err.to_string(), "Generation n1 failed: boom");

        let err = GenerationError::Cancelled {
            node_id: "n2".to_string(),
        };
        assert_eq!(err.node_id(), "n2");
        assert_eq!(err.to_string(), "Generation n2 was cancelled");
    }

    #[test]
    fn test_store_error_conversion_to_app_error() {
        let store_err = StoreError::NotFound {
            node_id: "test-123".to_string(),
        };
        let app_err: AppError = store_err.into();
        assert!(matches!(app_err, AppError::Store(_)));
    }

    #[test]
    fn test_transport_error_conversion_to_app_error() {
        let err = TransportError::Timeout { timeout_ms: 1000 };
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::Transport(_)));
    }

    #[test]
    fn test_generation_error_conversion_to_app_error() {
        let err = GenerationError::Cancelled {
            node_id: "n".to_string(),
        };
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::Generation(_)));
    }
}
