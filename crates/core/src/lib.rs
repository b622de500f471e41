//! Shared wire protocol for the peercall call subsystem.
//!
//! This crate defines everything that crosses the network between a client
//! and the signaling relay:
//!
//! - **Identifiers** ([`PeerId`], [`RoomId`], [`CallId`])
//! - **Call signals** ([`CallSignal`]) — the envelopes two peers exchange to
//!   drive a call; the relay forwards them without interpreting them
//! - **Relay framing** ([`protocol`]) — JSON-RPC 2.0 requests, responses and
//!   notifications, plus the typed request/notice enums built on top
//!
//! The relay server and the call engine both depend on this crate and on
//! nothing else of each other.

#![warn(clippy::all)]

pub mod error;
pub mod ids;
pub mod protocol;
pub mod signal;

pub use error::ProtocolError;
pub use ids::{CallId, PeerId, RoomId};
pub use signal::{CallKind, CallSignal, IceCandidatePayload};
