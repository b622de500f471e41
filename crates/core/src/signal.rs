//! Call-level signaling envelopes exchanged between two peers.
//!
//! The relay forwards these without interpreting them; only the two
//! endpoints act on the contents. Delivery order within one directed
//! peer pair is preserved end to end, which the negotiation logic
//! depends on for offer/answer sequencing.

use serde::{Deserialize, Serialize};

/// Media composition requested when a call starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Voice,
    Video,
}

impl CallKind {
    /// Whether the call carries a camera video track from the start.
    pub fn wants_camera(&self) -> bool {
        matches!(self, CallKind::Video)
    }
}

/// Mirror of the browser-style ICE candidate init dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// One signaling envelope between two call endpoints.
///
/// Status envelopes (`mute-status`, `deafen-status`, `speaking`) travel
/// out of band from SDP negotiation on purpose: toggling them never
/// collides with an in-flight offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CallSignal {
    /// Start a call toward the receiving peer, which sees it as an
    /// incoming ring.
    Initiate { kind: CallKind },
    /// Callee accepted. The caller creates the first offer; the callee
    /// never does.
    Accept,
    /// Callee declined, or the receiving side was busy with another call.
    Reject,
    Offer { sdp: String },
    Answer { sdp: String },
    Ice { candidate: IceCandidatePayload },
    /// Terminate. Carries the sender's view of the elapsed call time so
    /// both sides can log a consistent duration.
    End { duration_seconds: u64 },
    MuteStatus { muted: bool },
    DeafenStatus { deafened: bool },
    Speaking { speaking: bool },
    ScreenShareStarted,
    ScreenShareStopped,
    /// Ask the counterpart to start a renegotiation offer.
    Renegotiate,
}

impl CallSignal {
    /// Wire name of the envelope, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CallSignal::Initiate { .. } => "initiate",
            CallSignal::Accept => "accept",
            CallSignal::Reject => "reject",
            CallSignal::Offer { .. } => "offer",
            CallSignal::Answer { .. } => "answer",
            CallSignal::Ice { .. } => "ice",
            CallSignal::End { .. } => "end",
            CallSignal::MuteStatus { .. } => "mute-status",
            CallSignal::DeafenStatus { .. } => "deafen-status",
            CallSignal::Speaking { .. } => "speaking",
            CallSignal::ScreenShareStarted => "screen-share-started",
            CallSignal::ScreenShareStopped => "screen-share-stopped",
            CallSignal::Renegotiate => "renegotiate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initiate_wire_format() {
        let signal = CallSignal::Initiate {
            kind: CallKind::Video,
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["type"], "initiate");
        assert_eq!(json["kind"], "video");

        let back: CallSignal = serde_json::from_value(json).unwrap();
        assert_eq!(back, signal);
    }

    #[test]
    fn test_unit_variants_carry_only_the_tag() {
        let json = serde_json::to_value(CallSignal::Accept).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "accept" }));

        let json = serde_json::to_value(CallSignal::ScreenShareStarted).unwrap();
        assert_eq!(json["type"], "screen-share-started");
    }

    #[test]
    fn test_ice_candidate_optional_fields_omitted() {
        let signal = CallSignal::Ice {
            candidate: IceCandidatePayload {
                candidate: "candidate:1 1 UDP 2122252543 192.0.2.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: None,
                username_fragment: None,
            },
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(json["candidate"]["sdp_mid"], "0");
        assert!(json["candidate"].get("sdp_mline_index").is_none());

        let back: CallSignal = serde_json::from_value(json).unwrap();
        assert_eq!(back, signal);
    }

    #[test]
    fn test_end_round_trip_keeps_duration() {
        let signal = CallSignal::End {
            duration_seconds: 347,
        };
        let json = serde_json::to_string(&signal).unwrap();
        let back: CallSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signal);
    }

    #[test]
    fn test_unknown_signal_type_is_rejected() {
        let result: Result<CallSignal, _> =
            serde_json::from_str(r#"{"type":"call-waiting"}"#);
        assert!(result.is_err());
    }
}
