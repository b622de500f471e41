//! Offer/answer negotiation with collision handling
//!
//! Both sides of a call may want to renegotiate at the same time. The rules
//! here keep that safe without a central referee:
//!
//! - The callee is the polite peer, the caller is impolite. When an offer
//!   arrives while a local offer is pending, the impolite peer ignores it
//!   (its own offer wins) and the polite peer rolls back its local
//!   description, applies the remote offer, and answers.
//! - Remote answers are applied only while one of our offers is
//!   outstanding; anything else is stale and dropped.
//! - Remote ICE candidates queue until a remote description exists, then
//!   replay in arrival order.
//! - Renegotiation requests made while an exchange is pending are deferred
//!   and coalesced: one follow-up offer covers them all, built from the
//!   track state at send time.

use std::sync::Arc;

use peercall_core::IceCandidatePayload;
use tracing::{debug, warn};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::Result;
use crate::peer::{PeerLink, TrackSlot};

const ICE_QUEUE_LIMIT: usize = 64;

// ============================================================================
// Progress
// ============================================================================

/// Where the local side stands in the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingProgress {
    /// No exchange pending
    Stable,
    /// Building and sending a local offer
    CreatingOffer,
    /// Local offer sent, remote answer outstanding
    AwaitingAnswer,
    /// Discarding the local offer after losing a collision
    RollingBack,
}

/// Result of asking for a local offer
#[derive(Debug)]
pub enum OfferOutcome {
    /// Offer created and ready to send
    Sent(String),
    /// An exchange is pending; the request was queued
    Deferred,
}

/// Result of handling a remote offer
#[derive(Debug)]
pub enum RemoteOfferOutcome {
    /// Offer applied; send this answer back
    Answer(String),
    /// Collision on the impolite side; the offer was dropped
    Ignored,
}

/// Result of handling a remote answer
#[derive(Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Answer matched our outstanding offer and was applied
    Applied,
    /// No offer outstanding; stale answer dropped
    IgnoredStale,
}

// ============================================================================
// Engine
// ============================================================================

/// Single-owner negotiation state for one call session.
///
/// Not a task of its own: the session calls into it from its event loop,
/// so at most one method runs at a time.
pub struct NegotiationEngine {
    link: Arc<dyn PeerLink>,
    polite: bool,
    progress: SignalingProgress,
    remote_description_set: bool,
    queued_candidates: Vec<IceCandidatePayload>,
    renegotiation_queued: bool,
    binding: TrackBinding,
}

impl NegotiationEngine {
    /// Create the negotiation state for a link.
    ///
    /// `polite` follows call roles: the callee yields during collisions.
    pub fn new(link: Arc<dyn PeerLink>, polite: bool) -> Self {
        Self {
            link,
            polite,
            progress: SignalingProgress::Stable,
            remote_description_set: false,
            queued_candidates: Vec::new(),
            renegotiation_queued: false,
            binding: TrackBinding::default(),
        }
    }

    /// Current exchange progress
    pub fn progress(&self) -> SignalingProgress {
        self.progress
    }

    /// Whether this side yields during offer collisions
    pub fn is_polite(&self) -> bool {
        self.polite
    }

    /// Whether a remote description has been applied yet
    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    /// Ask for a local offer reflecting the current track set.
    ///
    /// Defers when an exchange is already pending; the deferred request is
    /// coalesced with any later ones and resumed via
    /// [`resume_queued_offer`](Self::resume_queued_offer).
    pub async fn request_local_offer(&mut self) -> Result<OfferOutcome> {
        if self.progress != SignalingProgress::Stable {
            debug!("offer requested mid-exchange, queueing");
            self.renegotiation_queued = true;
            return Ok(OfferOutcome::Deferred);
        }
        let sdp = self.create_offer().await?;
        Ok(OfferOutcome::Sent(sdp))
    }

    /// Fire the coalesced deferred offer once the exchange has settled.
    ///
    /// Returns `Some(sdp)` at most once per settled exchange.
    pub async fn resume_queued_offer(&mut self) -> Result<Option<String>> {
        if !self.renegotiation_queued || self.progress != SignalingProgress::Stable {
            return Ok(None);
        }
        self.renegotiation_queued = false;
        let sdp = self.create_offer().await?;
        Ok(Some(sdp))
    }

    async fn create_offer(&mut self) -> Result<String> {
        self.progress = SignalingProgress::CreatingOffer;
        match self.link.propose_offer().await {
            Ok(sdp) => {
                self.progress = SignalingProgress::AwaitingAnswer;
                Ok(sdp)
            }
            Err(err) => {
                // Clear the in-progress mark so a later attempt can run
                self.progress = SignalingProgress::Stable;
                Err(err)
            }
        }
    }

    /// Handle a remote offer, resolving collisions by politeness
    pub async fn handle_remote_offer(&mut self, sdp: &str) -> Result<RemoteOfferOutcome> {
        let collision = self.progress != SignalingProgress::Stable;
        if collision {
            if !self.polite {
                debug!("offer collision, impolite side ignoring remote offer");
                return Ok(RemoteOfferOutcome::Ignored);
            }
            debug!("offer collision, polite side rolling back");
            // The rolled-back offer carried real intent (a track change it
            // was announcing); queue it so it goes out again once this
            // exchange settles.
            self.renegotiation_queued = true;
            self.progress = SignalingProgress::RollingBack;
            match self.link.rollback_local().await {
                Ok(()) => self.progress = SignalingProgress::Stable,
                Err(err) => {
                    self.progress = SignalingProgress::Stable;
                    return Err(err);
                }
            }
        }

        self.link.apply_remote_offer(sdp).await?;
        self.remote_description_set = true;
        self.flush_queued_candidates().await;

        let answer = self.link.produce_answer().await?;
        Ok(RemoteOfferOutcome::Answer(answer))
    }

    /// Handle a remote answer; applied only while our offer is outstanding
    pub async fn handle_remote_answer(&mut self, sdp: &str) -> Result<AnswerOutcome> {
        if self.progress != SignalingProgress::AwaitingAnswer {
            debug!("stale remote answer dropped");
            return Ok(AnswerOutcome::IgnoredStale);
        }

        self.link.apply_remote_answer(sdp).await?;
        self.progress = SignalingProgress::Stable;
        self.remote_description_set = true;
        self.flush_queued_candidates().await;
        Ok(AnswerOutcome::Applied)
    }

    /// Handle a remote ICE candidate, queueing until a description exists.
    ///
    /// Candidates that fail to apply are logged and skipped; a single bad
    /// candidate never takes the call down.
    pub async fn handle_remote_candidate(&mut self, candidate: IceCandidatePayload) {
        if !self.remote_description_set {
            if self.queued_candidates.len() >= ICE_QUEUE_LIMIT {
                warn!("ICE queue full, dropping candidate");
                return;
            }
            self.queued_candidates.push(candidate);
            return;
        }
        if let Err(err) = self.link.add_remote_candidate(&candidate).await {
            debug!(error = %err, "ICE candidate not applied");
        }
    }

    async fn flush_queued_candidates(&mut self) {
        for candidate in self.queued_candidates.drain(..) {
            if let Err(err) = self.link.add_remote_candidate(&candidate).await {
                debug!(error = %err, "queued ICE candidate not applied");
            }
        }
    }

    // ------------------------------------------------------------------
    // Track binding
    // ------------------------------------------------------------------

    /// Attach the camera track to the video sender
    pub async fn attach_camera(&mut self, track: Arc<TrackLocalStaticSample>) -> Result<()> {
        let slot = self.link.attach_track(Arc::clone(&track)).await?;
        self.binding.video_slot = Some(slot);
        self.binding.camera_track = Some(track);
        Ok(())
    }

    /// Whether a screen share currently occupies the video sender
    pub fn screen_share_active(&self) -> bool {
        self.binding.screen_active
    }

    /// Put the screen track on the video sender.
    ///
    /// An existing camera track is displaced in place so audio and the
    /// sender itself survive; it is restored by
    /// [`end_screen_share`](Self::end_screen_share).
    pub async fn begin_screen_share(
        &mut self,
        screen: Arc<TrackLocalStaticSample>,
        screen_audio: Option<Arc<TrackLocalStaticSample>>,
    ) -> Result<()> {
        if self.binding.screen_active {
            return Err(crate::error::Error::MediaTrackError(
                "screen share already active".to_string(),
            ));
        }

        match self.binding.video_slot {
            Some(slot) => self.link.swap_track(slot, screen).await?,
            None => {
                let slot = self.link.attach_track(screen).await?;
                self.binding.video_slot = Some(slot);
            }
        }

        if let Some(audio) = screen_audio {
            let slot = self.link.attach_track(audio).await?;
            self.binding.screen_audio_slot = Some(slot);
        }

        self.binding.screen_active = true;
        Ok(())
    }

    /// Take the screen share down, restoring the exact prior camera track
    /// or removing the video sender when there was none
    pub async fn end_screen_share(&mut self) -> Result<()> {
        if !self.binding.screen_active {
            return Err(crate::error::Error::MediaTrackError(
                "screen share not active".to_string(),
            ));
        }

        if let Some(slot) = self.binding.screen_audio_slot.take() {
            self.link.drop_track(slot).await?;
        }

        match (self.binding.video_slot, self.binding.camera_track.clone()) {
            (Some(slot), Some(camera)) => self.link.swap_track(slot, camera).await?,
            (Some(slot), None) => {
                self.link.drop_track(slot).await?;
                self.binding.video_slot = None;
            }
            (None, _) => {}
        }

        self.binding.screen_active = false;
        Ok(())
    }
}

/// Which tracks occupy the link's senders right now.
///
/// The video sender is shared between camera and screen so switching never
/// renegotiates the sender away.
#[derive(Default)]
struct TrackBinding {
    video_slot: Option<TrackSlot>,
    camera_track: Option<Arc<TrackLocalStaticSample>>,
    screen_audio_slot: Option<TrackSlot>,
    screen_active: bool,
}
