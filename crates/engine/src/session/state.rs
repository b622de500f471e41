//! Call lifecycle states, roles, and the transitions between them

use peercall_core::PeerId;

/// Why a call session reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// We hung up
    HungUp,
    /// The counterpart hung up
    RemoteHungUp,
    /// The call was declined. A busy auto-reject is indistinguishable from
    /// a deliberate decline on the wire, so both surface here.
    Rejected,
    /// Nobody answered within the ring window
    RingTimeout,
    /// The peer connection failed with no viable path left
    ConnectionFailed,
    /// The relay connection is gone
    SignalingClosed,
}

impl EndReason {
    /// Stable name used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::HungUp => "hung-up",
            EndReason::RemoteHungUp => "remote-hung-up",
            EndReason::Rejected => "rejected",
            EndReason::RingTimeout => "ring-timeout",
            EndReason::ConnectionFailed => "connection-failed",
            EndReason::SignalingClosed => "signaling-closed",
        }
    }
}

/// Lifecycle phase of one call session.
///
/// `Ended` is terminal; the session task exits and the engine's active
/// slot frees, which is what `idle` means at the engine level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// No session activity yet
    Idle,
    /// Outbound ring, waiting for the callee
    Calling,
    /// Inbound ring, waiting for a local accept or reject
    Ringing,
    /// Media path negotiated or negotiating, call is live
    Connected,
    /// Terminal, with the reason the call ended
    Ended(EndReason),
}

impl CallPhase {
    /// Whether `next` is a legal successor of this phase.
    ///
    /// Kept exhaustive on purpose: adding a phase forces every transition
    /// to be reconsidered here.
    pub fn can_transition_to(self, next: CallPhase) -> bool {
        match (self, next) {
            (CallPhase::Idle, CallPhase::Calling) => true,
            (CallPhase::Idle, CallPhase::Ringing) => true,
            (CallPhase::Calling, CallPhase::Connected) => true,
            (CallPhase::Ringing, CallPhase::Connected) => true,
            (CallPhase::Calling, CallPhase::Ended(_)) => true,
            (CallPhase::Ringing, CallPhase::Ended(_)) => true,
            (CallPhase::Connected, CallPhase::Ended(_)) => true,
            (CallPhase::Idle, CallPhase::Idle | CallPhase::Connected | CallPhase::Ended(_)) => {
                false
            }
            (CallPhase::Calling, CallPhase::Calling | CallPhase::Ringing | CallPhase::Idle) => false,
            (CallPhase::Ringing, CallPhase::Ringing | CallPhase::Calling | CallPhase::Idle) => false,
            (
                CallPhase::Connected,
                CallPhase::Connected | CallPhase::Calling | CallPhase::Ringing | CallPhase::Idle,
            ) => false,
            (CallPhase::Ended(_), _) => false,
        }
    }

    /// Whether the session is still ringing in either direction
    pub fn is_ringing(&self) -> bool {
        matches!(self, CallPhase::Calling | CallPhase::Ringing)
    }

    /// Whether the session has reached its terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Ended(_))
    }
}

/// Which side of the call this session is.
///
/// The role fixes politeness for the whole call: the callee yields during
/// offer collisions, the caller does not. The caller also creates the
/// initial offer; the callee never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

impl CallRole {
    /// Whether this side yields during offer collisions
    pub fn is_polite(&self) -> bool {
        matches!(self, CallRole::Callee)
    }

    /// Role assignment when both peers dialed each other at once.
    ///
    /// Both sides compute the same answer locally: the lexicographically
    /// smaller peer id acts as caller, no extra round trip needed.
    pub fn derive_for_glare(local: &PeerId, remote: &PeerId) -> CallRole {
        if local < remote {
            CallRole::Caller
        } else {
            CallRole::Callee
        }
    }

    /// Stable name used in log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            CallRole::Caller => "caller",
            CallRole::Callee => "callee",
        }
    }
}
