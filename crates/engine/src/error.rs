//! Error types for the call engine

/// Result type alias using engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in call engine operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling request failed or was refused by the relay
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Signaling connection is gone and no further envelopes can flow
    #[error("Signaling connection closed")]
    SignalingClosed,

    /// A non-terminal call session already exists for this peer
    #[error("Call already in progress with {0}")]
    CallInProgress(String),

    /// Operation requires an active call session
    #[error("No active call")]
    NoActiveCall,

    /// Operation is not valid in the session's current phase
    #[error("Invalid call state: {0}")]
    InvalidState(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Local capture device error
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error degrades the call instead of ending it.
    ///
    /// Degradable failures substitute a placeholder track and keep the
    /// session alive; the user is notified, the counterpart is not.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::CaptureError(_) | Error::MediaTrackError(_))
    }

    /// Check if this error must terminate the call with a reason code.
    ///
    /// Fatal errors are reported upward and never retried automatically.
    pub fn is_fatal_to_call(&self) -> bool {
        matches!(
            self,
            Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::PeerConnectionError(_)
                | Error::SignalingClosed
                | Error::OperationTimeout(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
