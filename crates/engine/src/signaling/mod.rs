//! Signaling transport for call envelopes and presence
//!
//! The engine never touches the wire directly: it sends through
//! [`SignalingPort`] and receives a stream of [`SignalingUpdate`]s. The
//! production implementation is [`RelayClient`]; tests substitute an
//! in-process hub.

mod client;

pub use client::RelayClient;

use async_trait::async_trait;
use peercall_core::{CallSignal, PeerId, RoomId};

use crate::error::Result;

/// Outbound signaling surface used by the engine and its sessions
#[async_trait]
pub trait SignalingPort: Send + Sync {
    /// Forward one call envelope to a peer.
    ///
    /// Delivery is at most once; an unknown or offline target is dropped
    /// by the relay without a response.
    async fn send_signal(&self, to: &PeerId, signal: CallSignal) -> Result<()>;

    /// Join a presence room, returning its membership including us
    async fn join_room(&self, room: &RoomId) -> Result<Vec<PeerId>>;

    /// Leave a presence room
    async fn leave_room(&self, room: &RoomId) -> Result<()>;

    /// Current membership of a room without joining it
    async fn room_members(&self, room: &RoomId) -> Result<Vec<PeerId>>;

    /// Shut the transport down
    async fn close(&self) -> Result<()>;
}

/// Inbound traffic from the signaling transport
#[derive(Debug, Clone)]
pub enum SignalingUpdate {
    /// A call envelope delivered from a peer
    Signal { from: PeerId, signal: CallSignal },
    /// A peer joined a room we are in
    PeerJoined { room_id: RoomId, peer_id: PeerId },
    /// A peer left a room we are in
    PeerLeft { room_id: RoomId, peer_id: PeerId },
    /// The transport is gone; nothing further will arrive
    Closed,
}
