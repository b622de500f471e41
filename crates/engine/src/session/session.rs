//! The per-call session task
//!
//! Everything that can happen to a call lands in one `select!` loop:
//! engine commands, counterpart envelopes, link health, capture results,
//! the ring deadline, and the connected-call timers. Media acquisition and
//! screen capture run as helper tasks that report back through an internal
//! channel; a result that arrives after the session ended is discarded
//! because the receiver is gone with the loop.

use std::sync::Arc;

use peercall_core::{CallId, CallKind, CallSignal, IceCandidatePayload, PeerId};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::CallEvent;
use crate::media::{
    acquire_with_fallback, CaptureDevice, CaptureOutcome, OutboundTrack, TrackRole,
};
use crate::negotiation::{AnswerOutcome, NegotiationEngine, OfferOutcome, RemoteOfferOutcome};
use crate::peer::{LinkEvent, LinkHealth, PeerLink, PeerLinkFactory};
use crate::quality::{
    spawn_controller, PressureProbe, QualityControllerHandle, QualityLevel, QualityProfile,
};
use crate::session::state::{CallPhase, CallRole, EndReason};
use crate::session::{SessionCommand, SessionParams};
use crate::signaling::SignalingPort;

/// Local media acquired for the call itself
struct LocalMedia {
    mic: OutboundTrack,
    camera: Option<OutboundTrack>,
    listen_only: bool,
    degrade_reason: Option<String>,
}

/// Results helper tasks push back into the session loop
enum InternalEvent {
    /// Microphone (and camera, for video calls) acquisition finished
    CallMedia(LocalMedia),
    /// Screen capture finished
    ScreenMedia {
        screen: OutboundTrack,
        audio: Option<OutboundTrack>,
    },
    /// Screen capture produced nothing usable
    ScreenUnavailable { reason: String },
    /// Health change or local ICE candidate from the peer link
    Link(LinkEvent),
    /// The quality controller published a new share profile
    Quality(QualityProfile),
}

struct Session {
    call_id: CallId,
    local_peer: PeerId,
    peer: PeerId,
    kind: CallKind,
    role: CallRole,
    phase: CallPhase,
    phase_tx: watch::Sender<CallPhase>,
    config: EngineConfig,
    signaling: Arc<dyn SignalingPort>,
    link_factory: Arc<dyn PeerLinkFactory>,
    capture: Arc<dyn CaptureDevice>,
    probe: Arc<dyn PressureProbe>,
    events: broadcast::Sender<CallEvent>,
    internal_tx: mpsc::Sender<InternalEvent>,

    media: Option<LocalMedia>,
    media_attached: bool,
    link: Option<Arc<dyn PeerLink>>,
    negotiation: Option<NegotiationEngine>,
    /// Candidates that arrived before the link existed
    early_candidates: Vec<IceCandidatePayload>,
    /// Caller only: the counterpart accepted (or glare stood in for it)
    remote_accepted: bool,
    /// Callee only: accept issued, capture pending
    accepting: bool,
    screen_tracks: Option<(OutboundTrack, Option<OutboundTrack>)>,
    share_pending: bool,
    quality: Option<QualityControllerHandle>,
    pinned_level: Option<QualityLevel>,
    muted: bool,
    speaking: bool,
    connected_at: Option<Instant>,
    duration_secs: u64,
}

pub(super) async fn run(
    call_id: CallId,
    initial: CallPhase,
    params: SessionParams,
    phase_tx: watch::Sender<CallPhase>,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
) {
    let (internal_tx, mut internal_rx) = mpsc::channel(params.config.channel_capacity);
    let active = Arc::clone(&params.active);

    let mut session = Session {
        call_id,
        local_peer: params.local_peer,
        peer: params.peer,
        kind: params.kind,
        role: params.role,
        phase: CallPhase::Idle,
        phase_tx,
        config: params.config,
        signaling: params.signaling,
        link_factory: params.link_factory,
        capture: params.capture,
        probe: params.probe,
        events: params.events,
        internal_tx,
        media: None,
        media_attached: false,
        link: None,
        negotiation: None,
        early_candidates: Vec::new(),
        remote_accepted: false,
        accepting: false,
        screen_tracks: None,
        share_pending: false,
        quality: None,
        pinned_level: None,
        muted: false,
        speaking: false,
        connected_at: None,
        duration_secs: 0,
    };

    info!(
        call = %session.call_id,
        peer = %session.peer,
        role = session.role.as_str(),
        kind = ?session.kind,
        "call session started"
    );
    session.set_phase(initial);

    if matches!(session.role, CallRole::Caller) {
        session.spawn_call_capture();
        session.send(CallSignal::Initiate { kind: session.kind }).await;
    }

    let ring_deadline = Instant::now() + session.config.ring_timeout();
    let mut duration_tick = tokio::time::interval(std::time::Duration::from_secs(1));
    duration_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut speak_tick = tokio::time::interval(session.config.speaking_interval());
    speak_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while !session.phase.is_terminal() {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => session.handle_command(cmd).await,
                // Engine dropped out from under us; tear the call down
                None => session.finish(EndReason::HungUp, true).await,
            },
            Some(event) = internal_rx.recv() => {
                session.handle_internal(event).await;
            }
            _ = tokio::time::sleep_until(ring_deadline), if session.phase.is_ringing() => {
                info!(call = %session.call_id, "ring window elapsed");
                session.finish(EndReason::RingTimeout, true).await;
            }
            _ = duration_tick.tick(), if matches!(session.phase, CallPhase::Connected) => {
                let elapsed = session
                    .connected_at
                    .map(|t0| t0.elapsed().as_secs())
                    .unwrap_or(0);
                if elapsed != session.duration_secs {
                    session.duration_secs = elapsed;
                    session.emit(CallEvent::DurationTick { seconds: elapsed });
                }
            }
            _ = speak_tick.tick(), if matches!(session.phase, CallPhase::Connected) => {
                session.sample_speaking().await;
            }
        }
    }

    // Free the engine's active slot so a new call can start
    let mut slot = active.lock().await;
    if slot
        .as_ref()
        .map(|handle| handle.call_id == call_id)
        .unwrap_or(false)
    {
        *slot = None;
    }
    info!(call = %call_id, "call session finished");
}

impl Session {
    // ------------------------------------------------------------------
    // Phase and event plumbing
    // ------------------------------------------------------------------

    fn set_phase(&mut self, next: CallPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            warn!(
                call = %self.call_id,
                from = ?self.phase,
                to = ?next,
                "phase transition refused"
            );
            return false;
        }
        debug!(call = %self.call_id, from = ?self.phase, to = ?next, "phase change");
        if matches!(next, CallPhase::Connected) && self.connected_at.is_none() {
            self.connected_at = Some(Instant::now());
        }
        self.phase = next;
        let _ = self.phase_tx.send(next);
        self.emit(CallEvent::PhaseChanged {
            call_id: self.call_id,
            peer: self.peer.clone(),
            phase: next,
        });
        true
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    async fn send(&self, signal: CallSignal) {
        if let Err(err) = self.signaling.send_signal(&self.peer, signal).await {
            warn!(call = %self.call_id, error = %err, "envelope not sent");
        }
    }

    /// Terminal transition. Notifies the counterpart unless the
    /// termination came from the counterpart (or the wire is gone).
    async fn finish(&mut self, reason: EndReason, notify_peer: bool) {
        if self.phase.is_terminal() {
            return;
        }
        if let Some(t0) = self.connected_at {
            self.duration_secs = t0.elapsed().as_secs();
        }
        if notify_peer {
            self.send(CallSignal::End {
                duration_seconds: self.duration_secs,
            })
            .await;
        }
        if let Some(quality) = self.quality.take() {
            quality.stop();
        }
        self.screen_tracks = None;
        if let Some(link) = self.link.take() {
            if let Err(err) = link.close().await {
                debug!(call = %self.call_id, error = %err, "link close failed");
            }
        }
        self.negotiation = None;
        self.set_phase(CallPhase::Ended(reason));
        self.emit(CallEvent::CallEnded {
            call_id: self.call_id,
            peer: self.peer.clone(),
            reason,
            duration_seconds: self.duration_secs,
        });
    }

    /// Route an operational error: fatal ones end the call, the rest log
    async fn fail_on(&mut self, err: Error) {
        if err.is_fatal_to_call() {
            warn!(call = %self.call_id, error = %err, "fatal call error");
            self.finish(EndReason::ConnectionFailed, true).await;
        } else {
            warn!(call = %self.call_id, error = %err, "call error tolerated");
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Accept { ack } => {
                let result = self.accept();
                let _ = ack.send(result);
            }
            SessionCommand::Reject { ack } => {
                let result = if matches!(self.phase, CallPhase::Ringing) {
                    self.send(CallSignal::Reject).await;
                    self.finish(EndReason::Rejected, false).await;
                    Ok(())
                } else {
                    Err(Error::InvalidState(format!(
                        "reject in phase {:?}",
                        self.phase
                    )))
                };
                let _ = ack.send(result);
            }
            SessionCommand::HangUp { ack } => {
                self.finish(EndReason::HungUp, true).await;
                let _ = ack.send(Ok(()));
            }
            SessionCommand::SetMuted { muted, ack } => {
                self.muted = muted;
                if let Some(media) = &self.media {
                    media.mic.set_muted(muted);
                }
                self.send(CallSignal::MuteStatus { muted }).await;
                let _ = ack.send(Ok(()));
            }
            SessionCommand::SetDeafened { deafened, ack } => {
                self.send(CallSignal::DeafenStatus { deafened }).await;
                let _ = ack.send(Ok(()));
            }
            SessionCommand::StartScreenShare { ack } => {
                let result = self.start_screen_share();
                let _ = ack.send(result);
            }
            SessionCommand::StopScreenShare { ack } => {
                let result = self.stop_screen_share().await;
                let _ = ack.send(result);
            }
            SessionCommand::PinQuality { level, ack } => {
                self.pinned_level = Some(level);
                if let Some(quality) = &self.quality {
                    quality.pin(level).await;
                }
                let _ = ack.send(Ok(()));
            }
            SessionCommand::ClearQualityPin { ack } => {
                self.pinned_level = None;
                if let Some(quality) = &self.quality {
                    quality.unpin().await;
                }
                let _ = ack.send(Ok(()));
            }
            SessionCommand::Signal(signal) => self.handle_signal(signal).await,
            SessionCommand::SignalingLost => {
                self.finish(EndReason::SignalingClosed, false).await;
            }
        }
    }

    fn accept(&mut self) -> Result<()> {
        if !matches!(self.phase, CallPhase::Ringing) {
            return Err(Error::InvalidState(format!(
                "accept in phase {:?}",
                self.phase
            )));
        }
        if self.accepting {
            return Err(Error::InvalidState("accept already in progress".to_string()));
        }
        self.accepting = true;
        self.spawn_call_capture();
        Ok(())
    }

    fn start_screen_share(&mut self) -> Result<()> {
        if !matches!(self.phase, CallPhase::Connected) {
            return Err(Error::InvalidState(format!(
                "screen share in phase {:?}",
                self.phase
            )));
        }
        let already_sharing = self
            .negotiation
            .as_ref()
            .map(|neg| neg.screen_share_active())
            .unwrap_or(false);
        if already_sharing || self.share_pending {
            return Err(Error::InvalidState("screen share already active".to_string()));
        }
        self.share_pending = true;
        self.spawn_screen_capture();
        Ok(())
    }

    async fn stop_screen_share(&mut self) -> Result<()> {
        if self.share_pending {
            // Capture still in flight; the arriving tracks will be dropped
            self.share_pending = false;
            return Ok(());
        }
        let sharing = self
            .negotiation
            .as_ref()
            .map(|neg| neg.screen_share_active())
            .unwrap_or(false);
        if !sharing {
            return Err(Error::InvalidState("screen share not active".to_string()));
        }

        if let Some(quality) = self.quality.take() {
            quality.stop();
        }
        let result = match self.negotiation.as_mut() {
            Some(neg) => neg.end_screen_share().await,
            None => Err(Error::NoActiveCall),
        };
        self.screen_tracks = None;
        if let Err(err) = result {
            self.fail_on(err).await;
            return Ok(());
        }

        self.send(CallSignal::ScreenShareStopped).await;
        self.emit(CallEvent::ScreenShareStopped { remote: false });
        self.push_local_offer().await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound envelopes
    // ------------------------------------------------------------------

    async fn handle_signal(&mut self, signal: CallSignal) {
        match signal {
            CallSignal::Initiate { .. } => {
                if matches!(self.phase, CallPhase::Calling) {
                    self.convert_glare().await;
                } else {
                    debug!(call = %self.call_id, "duplicate initiate dropped");
                }
            }
            CallSignal::Accept => {
                if matches!(self.phase, CallPhase::Calling) {
                    self.remote_accepted = true;
                    if self.open_link().await {
                        self.set_phase(CallPhase::Connected);
                        self.try_start_media_flow().await;
                    }
                } else {
                    debug!(call = %self.call_id, "duplicate accept dropped");
                }
            }
            CallSignal::Reject => {
                if matches!(self.phase, CallPhase::Calling) {
                    self.finish(EndReason::Rejected, false).await;
                } else {
                    debug!(call = %self.call_id, "stale reject dropped");
                }
            }
            CallSignal::Offer { sdp } => self.handle_remote_offer(&sdp).await,
            CallSignal::Answer { sdp } => self.handle_remote_answer(&sdp).await,
            CallSignal::Ice { candidate } => match self.negotiation.as_mut() {
                Some(neg) => neg.handle_remote_candidate(candidate).await,
                None => self.early_candidates.push(candidate),
            },
            CallSignal::End { duration_seconds } => {
                debug!(
                    call = %self.call_id,
                    their_duration = duration_seconds,
                    "counterpart ended the call"
                );
                self.finish(EndReason::RemoteHungUp, false).await;
            }
            CallSignal::MuteStatus { muted } => {
                self.emit(CallEvent::RemoteMuteChanged { muted });
            }
            CallSignal::DeafenStatus { deafened } => {
                self.emit(CallEvent::RemoteDeafenChanged { deafened });
            }
            CallSignal::Speaking { speaking } => {
                self.emit(CallEvent::RemoteSpeaking { speaking });
            }
            CallSignal::ScreenShareStarted => {
                self.emit(CallEvent::ScreenShareStarted { remote: true });
            }
            CallSignal::ScreenShareStopped => {
                self.emit(CallEvent::ScreenShareStopped { remote: true });
            }
            CallSignal::Renegotiate => {
                if matches!(self.phase, CallPhase::Connected) {
                    self.push_local_offer().await;
                } else {
                    debug!(call = %self.call_id, "renegotiate outside connected dropped");
                }
            }
        }
    }

    /// Both peers dialed each other; fold the two attempts into one call.
    ///
    /// The counterpart's initiate stands in for an accept on both sides,
    /// and roles re-derive deterministically so exactly one initial offer
    /// is created.
    async fn convert_glare(&mut self) {
        let role = CallRole::derive_for_glare(&self.local_peer, &self.peer);
        info!(
            call = %self.call_id,
            role = role.as_str(),
            "mutual initiate folded into one call"
        );
        self.role = role;
        self.remote_accepted = true;
        if self.open_link().await {
            self.set_phase(CallPhase::Connected);
            self.try_start_media_flow().await;
        }
    }

    async fn handle_remote_offer(&mut self, sdp: &str) {
        let outcome = match self.negotiation.as_mut() {
            Some(neg) => neg.handle_remote_offer(sdp).await,
            None => {
                warn!(call = %self.call_id, "offer before link exists dropped");
                return;
            }
        };
        match outcome {
            Ok(RemoteOfferOutcome::Answer(answer)) => {
                self.send(CallSignal::Answer { sdp: answer }).await;
                self.resume_deferred_offer().await;
            }
            Ok(RemoteOfferOutcome::Ignored) => {}
            Err(err) => self.fail_on(err).await,
        }
    }

    async fn handle_remote_answer(&mut self, sdp: &str) {
        let outcome = match self.negotiation.as_mut() {
            Some(neg) => neg.handle_remote_answer(sdp).await,
            None => {
                debug!(call = %self.call_id, "answer before link exists dropped");
                return;
            }
        };
        match outcome {
            Ok(AnswerOutcome::Applied) => self.resume_deferred_offer().await,
            Ok(AnswerOutcome::IgnoredStale) => {}
            Err(err) => self.fail_on(err).await,
        }
    }

    // ------------------------------------------------------------------
    // Internal results
    // ------------------------------------------------------------------

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::CallMedia(media) => self.handle_call_media(media).await,
            InternalEvent::ScreenMedia { screen, audio } => {
                self.handle_screen_media(screen, audio).await;
            }
            InternalEvent::ScreenUnavailable { reason } => {
                self.share_pending = false;
                warn!(call = %self.call_id, reason, "screen capture unavailable");
                self.emit(CallEvent::ScreenShareFailed { reason });
            }
            InternalEvent::Link(link_event) => self.handle_link_event(link_event).await,
            InternalEvent::Quality(profile) => self.handle_quality(profile),
        }
    }

    async fn handle_call_media(&mut self, media: LocalMedia) {
        if self.phase.is_terminal() {
            return;
        }
        if media.listen_only {
            let reason = media
                .degrade_reason
                .clone()
                .unwrap_or_else(|| "capture unavailable".to_string());
            info!(call = %self.call_id, reason, "joining in listen-only mode");
            self.emit(CallEvent::ListenOnly { reason });
        }
        self.media = Some(media);

        if matches!(self.role, CallRole::Callee) && self.accepting {
            self.accepting = false;
            if !self.open_link().await {
                return;
            }
            self.send(CallSignal::Accept).await;
            self.set_phase(CallPhase::Connected);
        }
        self.try_start_media_flow().await;
    }

    async fn handle_screen_media(&mut self, screen: OutboundTrack, audio: Option<OutboundTrack>) {
        if !self.share_pending || !matches!(self.phase, CallPhase::Connected) {
            debug!(call = %self.call_id, "stale screen capture discarded");
            return;
        }
        self.share_pending = false;

        let result = match self.negotiation.as_mut() {
            Some(neg) => {
                neg.begin_screen_share(
                    screen.rtc_track(),
                    audio.as_ref().map(|track| track.rtc_track()),
                )
                .await
            }
            None => Err(Error::NoActiveCall),
        };
        if let Err(err) = result {
            self.emit(CallEvent::ScreenShareFailed {
                reason: err.to_string(),
            });
            self.fail_on(err).await;
            return;
        }

        let (quality, profile_rx) = spawn_controller(
            Arc::clone(&self.probe),
            self.config.quality.clone(),
            self.pinned_level,
        );
        let initial = *profile_rx.borrow();
        screen.apply_profile(initial);
        self.spawn_quality_forwarder(profile_rx);
        self.quality = Some(quality);
        self.screen_tracks = Some((screen, audio));

        self.send(CallSignal::ScreenShareStarted).await;
        self.emit(CallEvent::ScreenShareStarted { remote: false });
        self.emit(CallEvent::QualityChanged { profile: initial });
        self.push_local_offer().await;
    }

    fn handle_quality(&mut self, profile: QualityProfile) {
        let Some((screen, _)) = &self.screen_tracks else {
            return;
        };
        screen.apply_profile(profile);
        self.emit(CallEvent::QualityChanged { profile });
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Health(LinkHealth::Failed) => {
                warn!(call = %self.call_id, "peer link failed");
                self.finish(EndReason::ConnectionFailed, true).await;
            }
            LinkEvent::Health(LinkHealth::Closed) => {
                // Expected after our own close; anything else is a failure
                if !self.phase.is_terminal() {
                    self.finish(EndReason::ConnectionFailed, false).await;
                }
            }
            LinkEvent::Health(health) => {
                debug!(call = %self.call_id, ?health, "link health change");
            }
            LinkEvent::LocalCandidate(candidate) => {
                self.send(CallSignal::Ice { candidate }).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Link and negotiation plumbing
    // ------------------------------------------------------------------

    /// Open the peer link and its negotiation state. Returns `false` after
    /// tearing the call down on failure.
    async fn open_link(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }

        let (link_tx, mut link_rx) = mpsc::channel(32);
        let forward = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                if forward.send(InternalEvent::Link(event)).await.is_err() {
                    break;
                }
            }
        });

        match self.link_factory.open(link_tx).await {
            Ok(link) => {
                let mut negotiation =
                    NegotiationEngine::new(Arc::clone(&link), self.role.is_polite());
                for candidate in self.early_candidates.drain(..) {
                    negotiation.handle_remote_candidate(candidate).await;
                }
                self.link = Some(link);
                self.negotiation = Some(negotiation);
                true
            }
            Err(err) => {
                warn!(call = %self.call_id, error = %err, "peer link not opened");
                self.finish(EndReason::ConnectionFailed, true).await;
                false
            }
        }
    }

    /// Attach local tracks once both the link and the media exist, then
    /// create the initial offer if we are the caller
    async fn try_start_media_flow(&mut self) {
        if !matches!(self.phase, CallPhase::Connected) || self.media_attached {
            return;
        }
        let Some(link) = self.link.clone() else {
            return;
        };
        let Some(media) = &self.media else {
            return;
        };

        media.mic.set_muted(self.muted);
        let mic = media.mic.rtc_track();
        let camera = media.camera.as_ref().map(|track| track.rtc_track());

        if let Err(err) = link.attach_track(mic).await {
            self.fail_on(err).await;
            return;
        }
        if let Some(camera) = camera {
            let result = match self.negotiation.as_mut() {
                Some(neg) => neg.attach_camera(camera).await,
                None => Err(Error::NoActiveCall),
            };
            if let Err(err) = result {
                self.fail_on(err).await;
                return;
            }
        }
        self.media_attached = true;

        if matches!(self.role, CallRole::Caller) && self.remote_accepted {
            self.push_local_offer().await;
        }
    }

    /// Ask the negotiation engine for an offer and put it on the wire.
    /// Mid-exchange requests defer; the coalesced follow-up fires from
    /// [`resume_deferred_offer`](Self::resume_deferred_offer).
    async fn push_local_offer(&mut self) {
        let outcome = match self.negotiation.as_mut() {
            Some(neg) => neg.request_local_offer().await,
            None => return,
        };
        match outcome {
            Ok(OfferOutcome::Sent(sdp)) => self.send(CallSignal::Offer { sdp }).await,
            Ok(OfferOutcome::Deferred) => {
                debug!(call = %self.call_id, "offer deferred until exchange settles");
            }
            Err(err) => self.fail_on(err).await,
        }
    }

    async fn resume_deferred_offer(&mut self) {
        let outcome = match self.negotiation.as_mut() {
            Some(neg) => neg.resume_queued_offer().await,
            None => return,
        };
        match outcome {
            Ok(Some(sdp)) => self.send(CallSignal::Offer { sdp }).await,
            Ok(None) => {}
            Err(err) => self.fail_on(err).await,
        }
    }

    // ------------------------------------------------------------------
    // Capture helpers
    // ------------------------------------------------------------------

    fn spawn_call_capture(&self) {
        let capture = Arc::clone(&self.capture);
        let kind = self.kind;
        let results = self.internal_tx.clone();
        tokio::spawn(async move {
            let media = capture_call_media(capture, kind).await;
            let _ = results.send(InternalEvent::CallMedia(media)).await;
        });
    }

    fn spawn_screen_capture(&self) {
        let capture = Arc::clone(&self.capture);
        let results = self.internal_tx.clone();
        tokio::spawn(async move {
            let screen = match acquire_with_fallback(&*capture, TrackRole::Screen).await {
                CaptureOutcome::Acquired { track, .. } => track,
                CaptureOutcome::Degraded { reason } => {
                    let _ = results.send(InternalEvent::ScreenUnavailable { reason }).await;
                    return;
                }
                CaptureOutcome::Unavailable => {
                    let _ = results
                        .send(InternalEvent::ScreenUnavailable {
                            reason: "no screen capture source".to_string(),
                        })
                        .await;
                    return;
                }
            };
            // Screen audio is opportunistic; sharing proceeds without it
            let audio = match acquire_with_fallback(&*capture, TrackRole::ScreenAudio).await {
                CaptureOutcome::Acquired { track, .. } => Some(track),
                _ => None,
            };
            let _ = results.send(InternalEvent::ScreenMedia { screen, audio }).await;
        });
    }

    fn spawn_quality_forwarder(&self, mut profile_rx: watch::Receiver<QualityProfile>) {
        let forward = self.internal_tx.clone();
        tokio::spawn(async move {
            while profile_rx.changed().await.is_ok() {
                let profile = *profile_rx.borrow();
                if forward.send(InternalEvent::Quality(profile)).await.is_err() {
                    break;
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Voice activity
    // ------------------------------------------------------------------

    /// Edge-triggered speaking detection: the envelope goes out only when
    /// the state flips, never once per sample
    async fn sample_speaking(&mut self) {
        let level = match &self.media {
            Some(media) => media.mic.meter().level(),
            None => return,
        };
        let speaking_now = !self.muted && level >= self.config.speaking_threshold;
        if speaking_now != self.speaking {
            self.speaking = speaking_now;
            self.send(CallSignal::Speaking {
                speaking: speaking_now,
            })
            .await;
            self.emit(CallEvent::LocalSpeaking {
                speaking: speaking_now,
            });
        }
    }
}

/// Acquire the microphone (and camera for video calls), degrading to a
/// silent placeholder instead of failing the call
async fn capture_call_media(capture: Arc<dyn CaptureDevice>, kind: CallKind) -> LocalMedia {
    let (mic, listen_only, degrade_reason) =
        match acquire_with_fallback(&*capture, TrackRole::Microphone).await {
            CaptureOutcome::Acquired { track, profile } => {
                debug!(profile = profile.label, "microphone acquired");
                (track, false, None)
            }
            CaptureOutcome::Degraded { reason } => {
                (OutboundTrack::silent_microphone(), true, Some(reason))
            }
            CaptureOutcome::Unavailable => (
                OutboundTrack::silent_microphone(),
                true,
                Some("no microphone present".to_string()),
            ),
        };

    let camera = if kind.wants_camera() {
        match acquire_with_fallback(&*capture, TrackRole::Camera).await {
            CaptureOutcome::Acquired { track, profile } => {
                debug!(profile = profile.label, "camera acquired");
                Some(track)
            }
            CaptureOutcome::Degraded { reason } => {
                debug!(reason, "camera unavailable, continuing voice-only");
                None
            }
            CaptureOutcome::Unavailable => None,
        }
    } else {
        None
    };

    LocalMedia {
        mic,
        camera,
        listen_only,
        degrade_reason,
    }
}
