//! Client-side call engine for peercall.
//!
//! Drives one peer-to-peer audio/video/screen-share call at a time against
//! a dumb signaling relay. The relay only forwards opaque envelopes; all
//! call semantics live here.
//!
//! # Architecture
//!
//! ```text
//! +------------------------------------------------------------+
//! |                        CallEngine                          |
//! |  intents: initiate/accept/reject/hang-up/mute/share/...    |
//! |  events:  broadcast<CallEvent>                             |
//! +------+--------------------------+--------------------------+
//!        |                          |
//!        v                          v
//! +-------------+        +---------------------+
//! | inbound     |        | session task        |
//! | router      |------->| (one per call)      |
//! +-------------+        |  phase machine      |
//!        |               |  NegotiationEngine  |
//!        v               |  quality controller |
//! +-------------+        +----------+----------+
//! | SignalingPort|                  |
//! | (RelayClient)|                  v
//! +-------------+        +---------------------+
//!                        | PeerLink (webrtc)   |
//!                        | outbound tracks     |
//!                        +---------------------+
//! ```
//!
//! The engine meets the outside world through traits: [`SignalingPort`]
//! for the relay, [`peer::PeerLink`] for the media connection,
//! [`media::CaptureDevice`] for local capture, and
//! [`quality::PressureProbe`] for load sampling. Production
//! implementations ship in-crate; tests substitute in-memory ones.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use peercall_core::{CallKind, PeerId};
//! use peercall_engine::media::synthetic::SyntheticCapture;
//! use peercall_engine::{CallEngine, EngineConfig};
//!
//! # async fn example() -> peercall_engine::Result<()> {
//! let config = EngineConfig::default();
//! let engine = CallEngine::connect(
//!     config,
//!     PeerId::new("alice"),
//!     Arc::new(SyntheticCapture::new()),
//! )
//! .await?;
//!
//! let mut events = engine.subscribe();
//! engine
//!     .initiate_call(PeerId::new("bob"), CallKind::Voice)
//!     .await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod negotiation;
pub mod peer;
pub mod quality;
pub mod session;
pub mod signaling;

pub use config::{EngineConfig, QualityOptions, TurnServerConfig};
pub use engine::{ActiveCall, CallEngine};
pub use error::{Error, Result};
pub use events::CallEvent;
pub use quality::{PressureProbe, QualityLevel, QualityProfile, SyntheticLoadProbe};
pub use session::{CallPhase, CallRole, EndReason};
pub use signaling::{RelayClient, SignalingPort, SignalingUpdate};
