//! Relay error types.

use thiserror::Error;

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors surfaced by the relay server.
///
/// Per-connection protocol problems never appear here: malformed frames
/// are logged and dropped inside the handler so one misbehaving client
/// cannot affect the process.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// WebSocket-level failure during accept or handshake.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::InvalidConfig("channel_capacity must be at least 8".to_string());
        assert_eq!(
            err.to_string(),
            "invalid configuration: channel_capacity must be at least 8"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: RelayError = io.into();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
