//! Typed events the engine broadcasts to its embedder
//!
//! Subscribers get every event for every session through one broadcast
//! channel; a UI layer filters what it renders. Events are observations,
//! never commands: nothing here feeds back into the engine.

use peercall_core::{CallId, CallKind, PeerId, RoomId};

use crate::quality::QualityProfile;
use crate::session::{CallPhase, EndReason};

/// One observable engine event
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The session's lifecycle phase changed
    PhaseChanged {
        call_id: CallId,
        peer: PeerId,
        phase: CallPhase,
    },

    /// A peer is ringing us; answer with `accept_call` or `reject_call`
    IncomingCall {
        call_id: CallId,
        peer: PeerId,
        kind: CallKind,
    },

    /// The session reached its terminal state
    CallEnded {
        call_id: CallId,
        peer: PeerId,
        reason: EndReason,
        duration_seconds: u64,
    },

    /// Local capture failed; the call continues with a silent placeholder
    /// microphone. Advisory for the local user only, the counterpart is
    /// not told.
    ListenOnly { reason: String },

    /// A requested screen share could not start; the call continues
    ScreenShareFailed { reason: String },

    /// Counterpart toggled its microphone mute
    RemoteMuteChanged { muted: bool },

    /// Counterpart toggled deafen
    RemoteDeafenChanged { deafened: bool },

    /// Counterpart voice-activity edge
    RemoteSpeaking { speaking: bool },

    /// Local voice-activity edge, mirroring what went to the counterpart
    LocalSpeaking { speaking: bool },

    /// A screen share began; `remote` marks the counterpart's share
    ScreenShareStarted { remote: bool },

    /// A screen share ended
    ScreenShareStopped { remote: bool },

    /// The active screen-share profile changed
    QualityChanged { profile: QualityProfile },

    /// One more second of connected call time
    DurationTick { seconds: u64 },

    /// A peer joined a room we are in
    RoomPeerJoined { room_id: RoomId, peer_id: PeerId },

    /// A peer left a room we are in
    RoomPeerLeft { room_id: RoomId, peer_id: PeerId },

    /// The relay connection is gone; any live call ends with
    /// [`EndReason::SignalingClosed`]
    SignalingClosed,
}
