//! Protocol-level error type.

use thiserror::Error;

/// Errors produced while decoding or interpreting wire frames.
///
/// These never escalate beyond the connection that produced the bad
/// frame; both endpoints log and drop rather than tear anything down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON.
    #[error("malformed frame: {0}")]
    Parse(String),

    /// The frame was JSON but not a request, response, or notification.
    #[error("invalid frame shape: {0}")]
    InvalidFrame(String),

    /// The method name is not part of the relay protocol.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// The params did not match the method's expected shape.
    #[error("invalid params for {method}: {detail}")]
    InvalidParams { method: String, detail: String },
}
