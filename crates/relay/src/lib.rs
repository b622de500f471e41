//! Signaling relay for peer-to-peer calls.
//!
//! The relay is a dumb pipe plus a membership directory. It holds no call
//! semantics: clients register a peer id over a WebSocket connection, join
//! and leave voice-channel rooms, and exchange opaque call signals that the
//! relay forwards without inspecting.
//!
//! ```text
//!   client A ──ws──▶ ┌──────────────┐ ◀──ws── client B
//!                    │  RelayServer │
//!     relay.hello ──▶│  ┌────────┐  │
//!     room.join   ──▶│  │presence│  │──▶ room.peer-joined
//!     call.signal ──▶│  └────────┘  │──▶ call.signal (from: A)
//!                    └──────────────┘
//! ```
//!
//! Guarantees:
//!
//! - Envelopes between one directed peer pair are delivered in send order
//!   (one reader task per sender, one ordered queue per receiver).
//! - Signals to unknown or offline peers are dropped silently; the sender
//!   is never told, so reachability does not leak through the relay.
//! - Malformed frames are logged and dropped; they never take the
//!   connection or the process down.
//! - A room whose last member leaves is removed immediately.

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod handler;
pub mod presence;
pub mod server;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use presence::PresenceRegistry;
pub use server::{RelayHandle, RelayServer};
