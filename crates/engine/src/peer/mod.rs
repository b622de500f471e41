//! Peer link abstraction over the transport that carries call media
//!
//! Sessions drive negotiation through [`PeerLink`] without knowing whether
//! the other end is a live RTC connection or a test double. Links push
//! connectivity changes and locally gathered ICE candidates back through a
//! [`LinkEvent`] channel owned by the session.

mod rtc;

pub use rtc::{RtcLinkFactory, RtcPeerLink};

use std::sync::Arc;

use async_trait::async_trait;
use peercall_core::IceCandidatePayload;
use tokio::sync::mpsc;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::Result;

/// Opaque handle to an outbound track attached to a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackSlot(u64);

impl TrackSlot {
    /// Build a slot from a link-local id
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Link-local id backing this slot
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Connectivity of a peer link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// Transport negotiation in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Temporarily interrupted, may recover on its own
    Disconnected,
    /// Unrecoverable; the owning session must end the call
    Failed,
    /// Shut down locally
    Closed,
}

/// Notifications a live link pushes to its owning session
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Connectivity changed
    Health(LinkHealth),
    /// A locally gathered ICE candidate ready to trickle to the counterpart
    LocalCandidate(IceCandidatePayload),
}

/// One media connection to a single counterpart.
///
/// Description methods mirror the SDP dance: `propose_offer` and
/// `produce_answer` both set the local description and return the SDP to
/// put on the wire.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer and set it as the local description
    async fn propose_offer(&self) -> Result<String>;

    /// Apply a remote offer
    async fn apply_remote_offer(&self, sdp: &str) -> Result<()>;

    /// Create an answer to the applied remote offer and set it locally
    async fn produce_answer(&self) -> Result<String>;

    /// Apply a remote answer to our outstanding offer
    async fn apply_remote_answer(&self, sdp: &str) -> Result<()>;

    /// Discard the pending local description during an offer collision
    async fn rollback_local(&self) -> Result<()>;

    /// Add a remote ICE candidate
    async fn add_remote_candidate(&self, candidate: &IceCandidatePayload) -> Result<()>;

    /// Attach an outbound track, returning its sender slot
    async fn attach_track(&self, track: Arc<TrackLocalStaticSample>) -> Result<TrackSlot>;

    /// Replace the track behind `slot` without renegotiating the sender away
    async fn swap_track(&self, slot: TrackSlot, track: Arc<TrackLocalStaticSample>) -> Result<()>;

    /// Remove the sender behind `slot`
    async fn drop_track(&self, slot: TrackSlot) -> Result<()>;

    /// Tear the connection down
    async fn close(&self) -> Result<()>;
}

/// Opens one link per call session
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    /// Open a fresh link; `events` receives health changes and local
    /// candidates for the life of the link
    async fn open(&self, events: mpsc::Sender<LinkEvent>) -> Result<Arc<dyn PeerLink>>;
}
