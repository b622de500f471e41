//! The outward-facing call engine
//!
//! One [`CallEngine`] per signed-in client. It holds the signaling port,
//! the peer-link factory and the capture device, enforces the
//! one-active-call rule, and runs the inbound router that dispatches relay
//! traffic to the live session (or spawns a ringing one). Everything is
//! explicit construction; there are no process-wide singletons.

use std::sync::Arc;

use peercall_core::{CallId, CallKind, CallSignal, PeerId, RoomId};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::events::CallEvent;
use crate::media::CaptureDevice;
use crate::peer::{PeerLinkFactory, RtcLinkFactory};
use crate::quality::{PressureProbe, QualityLevel, SyntheticLoadProbe};
use crate::session::{
    spawn_session, CallPhase, CallRole, SessionCommand, SessionHandle, SessionParams,
};
use crate::signaling::{RelayClient, SignalingPort, SignalingUpdate};

/// Snapshot of the engine's active call, if any
#[derive(Debug, Clone)]
pub struct ActiveCall {
    pub call_id: CallId,
    pub peer: PeerId,
    pub kind: CallKind,
    pub phase: CallPhase,
}

/// Client-side call engine: one per local peer
pub struct CallEngine {
    local_peer: PeerId,
    config: EngineConfig,
    signaling: Arc<dyn SignalingPort>,
    link_factory: Arc<dyn PeerLinkFactory>,
    capture: Arc<dyn CaptureDevice>,
    probe: Arc<dyn PressureProbe>,
    events_tx: broadcast::Sender<CallEvent>,
    active: Arc<Mutex<Option<SessionHandle>>>,
    router: JoinHandle<()>,
}

impl CallEngine {
    /// Assemble an engine from explicit collaborators.
    ///
    /// `updates` is the inbound stream belonging to `signaling`; the
    /// engine consumes it for the rest of its life.
    pub fn new(
        local_peer: PeerId,
        signaling: Arc<dyn SignalingPort>,
        updates: mpsc::Receiver<SignalingUpdate>,
        link_factory: Arc<dyn PeerLinkFactory>,
        capture: Arc<dyn CaptureDevice>,
        probe: Arc<dyn PressureProbe>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let active = Arc::new(Mutex::new(None));

        let router = tokio::spawn(route_updates(
            updates,
            RouterContext {
                local_peer: local_peer.clone(),
                config: config.clone(),
                signaling: Arc::clone(&signaling),
                link_factory: Arc::clone(&link_factory),
                capture: Arc::clone(&capture),
                probe: Arc::clone(&probe),
                events: events_tx.clone(),
                active: Arc::clone(&active),
            },
        ));

        info!(peer = %local_peer, "call engine ready");
        Ok(Self {
            local_peer,
            config,
            signaling,
            link_factory,
            capture,
            probe,
            events_tx,
            active,
            router,
        })
    }

    /// Connect to the relay in `config` and assemble a production engine
    /// around it, with WebRTC peer links and the synthetic load probe
    pub async fn connect(
        config: EngineConfig,
        local_peer: PeerId,
        capture: Arc<dyn CaptureDevice>,
    ) -> Result<Self> {
        config.validate()?;
        let (client, updates) =
            RelayClient::connect(&config.relay_url, local_peer.clone(), config.channel_capacity)
                .await?;
        let link_factory = Arc::new(RtcLinkFactory::new(&config));
        Self::new(
            local_peer,
            client,
            updates,
            link_factory,
            capture,
            Arc::new(SyntheticLoadProbe::new()),
            config,
        )
    }

    /// Peer id this engine acts as
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Subscribe to engine events. Every subscriber sees every event;
    /// slow subscribers lag rather than block the engine.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events_tx.subscribe()
    }

    /// The live call, if one exists
    pub async fn active_call(&self) -> Option<ActiveCall> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .filter(|handle| !handle.phase().is_terminal())
            .map(|handle| ActiveCall {
                call_id: handle.call_id,
                peer: handle.peer.clone(),
                kind: handle.kind,
                phase: handle.phase(),
            })
    }

    // ------------------------------------------------------------------
    // Call intents
    // ------------------------------------------------------------------

    /// Ring a peer. Refused while another call is live; the media device
    /// belongs to one session at a time.
    pub async fn initiate_call(&self, peer: PeerId, kind: CallKind) -> Result<CallId> {
        if peer == self.local_peer {
            return Err(Error::InvalidState("cannot call yourself".to_string()));
        }
        let mut active = self.active.lock().await;
        if let Some(handle) = active.as_ref() {
            if !handle.phase().is_terminal() {
                return Err(Error::CallInProgress(handle.peer.to_string()));
            }
        }
        let handle = spawn_session(SessionParams {
            local_peer: self.local_peer.clone(),
            peer,
            kind,
            role: CallRole::Caller,
            config: self.config.clone(),
            signaling: Arc::clone(&self.signaling),
            link_factory: Arc::clone(&self.link_factory),
            capture: Arc::clone(&self.capture),
            probe: Arc::clone(&self.probe),
            events: self.events_tx.clone(),
            active: Arc::clone(&self.active),
        });
        let call_id = handle.call_id;
        *active = Some(handle);
        Ok(call_id)
    }

    /// Answer the ringing call
    pub async fn accept_call(&self) -> Result<()> {
        self.session_command(|ack| SessionCommand::Accept { ack })
            .await
    }

    /// Decline the ringing call
    pub async fn reject_call(&self) -> Result<()> {
        self.session_command(|ack| SessionCommand::Reject { ack })
            .await
    }

    /// End the live call from any phase
    pub async fn hang_up(&self) -> Result<()> {
        self.session_command(|ack| SessionCommand::HangUp { ack })
            .await
    }

    /// Silence or restore the outbound microphone
    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        self.session_command(|ack| SessionCommand::SetMuted { muted, ack })
            .await
    }

    /// Announce a deafen toggle to the counterpart
    pub async fn set_deafened(&self, deafened: bool) -> Result<()> {
        self.session_command(|ack| SessionCommand::SetDeafened { deafened, ack })
            .await
    }

    /// Share the screen over the live call's video sender
    pub async fn start_screen_share(&self) -> Result<()> {
        self.session_command(|ack| SessionCommand::StartScreenShare { ack })
            .await
    }

    /// Stop sharing, restoring the camera track if one was displaced
    pub async fn stop_screen_share(&self) -> Result<()> {
        self.session_command(|ack| SessionCommand::StopScreenShare { ack })
            .await
    }

    /// Pin the screen-share quality level, disabling automatic stepping
    pub async fn set_quality_override(&self, level: QualityLevel) -> Result<()> {
        self.session_command(|ack| SessionCommand::PinQuality { level, ack })
            .await
    }

    /// Release the quality pin; automatic stepping resumes
    pub async fn clear_quality_override(&self) -> Result<()> {
        self.session_command(|ack| SessionCommand::ClearQualityPin { ack })
            .await
    }

    // ------------------------------------------------------------------
    // Room presence passthrough
    // ------------------------------------------------------------------

    /// Join a voice-channel room, returning its membership including us
    pub async fn join_room(&self, room: &RoomId) -> Result<Vec<PeerId>> {
        self.signaling.join_room(room).await
    }

    /// Leave a voice-channel room
    pub async fn leave_room(&self, room: &RoomId) -> Result<()> {
        self.signaling.leave_room(room).await
    }

    /// Membership of a room without joining it
    pub async fn room_members(&self, room: &RoomId) -> Result<Vec<PeerId>> {
        self.signaling.room_members(room).await
    }

    /// Hang up any live call and close the signaling transport
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.hang_up().await;
        self.signaling.close().await?;
        self.router.abort();
        Ok(())
    }

    async fn session_command<F>(&self, make: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> SessionCommand,
    {
        let cmd_tx = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(handle) if !handle.phase().is_terminal() => handle.cmd_tx.clone(),
                _ => return Err(Error::NoActiveCall),
            }
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        cmd_tx
            .send(make(ack_tx))
            .await
            .map_err(|_| Error::NoActiveCall)?;
        ack_rx.await.map_err(|_| Error::NoActiveCall)?
    }
}

impl Drop for CallEngine {
    fn drop(&mut self) {
        self.router.abort();
    }
}

// ============================================================================
// Inbound router
// ============================================================================

struct RouterContext {
    local_peer: PeerId,
    config: EngineConfig,
    signaling: Arc<dyn SignalingPort>,
    link_factory: Arc<dyn PeerLinkFactory>,
    capture: Arc<dyn CaptureDevice>,
    probe: Arc<dyn PressureProbe>,
    events: broadcast::Sender<CallEvent>,
    active: Arc<Mutex<Option<SessionHandle>>>,
}

async fn route_updates(mut updates: mpsc::Receiver<SignalingUpdate>, ctx: RouterContext) {
    while let Some(update) = updates.recv().await {
        match update {
            SignalingUpdate::Signal { from, signal } => route_signal(&ctx, from, signal).await,
            SignalingUpdate::PeerJoined { room_id, peer_id } => {
                let _ = ctx.events.send(CallEvent::RoomPeerJoined { room_id, peer_id });
            }
            SignalingUpdate::PeerLeft { room_id, peer_id } => {
                let _ = ctx.events.send(CallEvent::RoomPeerLeft { room_id, peer_id });
            }
            SignalingUpdate::Closed => {
                info!(peer = %ctx.local_peer, "signaling transport closed");
                let cmd_tx = {
                    let active = ctx.active.lock().await;
                    active.as_ref().map(|handle| handle.cmd_tx.clone())
                };
                if let Some(cmd_tx) = cmd_tx {
                    let _ = cmd_tx.send(SessionCommand::SignalingLost).await;
                }
                let _ = ctx.events.send(CallEvent::SignalingClosed);
                break;
            }
        }
    }
}

async fn route_signal(ctx: &RouterContext, from: PeerId, signal: CallSignal) {
    // Dispatch decisions happen under the slot lock; the sends happen
    // after it is released so a busy session never wedges the router
    enum Dispatch {
        ToSession(mpsc::Sender<SessionCommand>, CallSignal),
        BusyReject,
        Done,
    }

    let dispatch = {
        let mut active = ctx.active.lock().await;

        // Drop a finished handle whose task has not swept the slot yet
        if active
            .as_ref()
            .map(|handle| handle.phase().is_terminal())
            .unwrap_or(false)
        {
            *active = None;
        }

        match active.as_ref() {
            Some(handle) if handle.peer == from => {
                Dispatch::ToSession(handle.cmd_tx.clone(), signal)
            }
            Some(handle) => {
                if matches!(signal, CallSignal::Initiate { .. }) {
                    // One call at a time; the second caller hears a decline
                    debug!(%from, busy_with = %handle.peer, "busy, auto-rejecting");
                    Dispatch::BusyReject
                } else {
                    debug!(%from, kind = signal.kind_name(), "signal from non-counterpart dropped");
                    Dispatch::Done
                }
            }
            None => match signal {
                CallSignal::Initiate { kind } => {
                    let handle = spawn_session(SessionParams {
                        local_peer: ctx.local_peer.clone(),
                        peer: from.clone(),
                        kind,
                        role: CallRole::Callee,
                        config: ctx.config.clone(),
                        signaling: Arc::clone(&ctx.signaling),
                        link_factory: Arc::clone(&ctx.link_factory),
                        capture: Arc::clone(&ctx.capture),
                        probe: Arc::clone(&ctx.probe),
                        events: ctx.events.clone(),
                        active: Arc::clone(&ctx.active),
                    });
                    let _ = ctx.events.send(CallEvent::IncomingCall {
                        call_id: handle.call_id,
                        peer: from.clone(),
                        kind,
                    });
                    *active = Some(handle);
                    Dispatch::Done
                }
                other => {
                    debug!(%from, kind = other.kind_name(), "signal with no session dropped");
                    Dispatch::Done
                }
            },
        }
    };

    match dispatch {
        Dispatch::ToSession(cmd_tx, signal) => {
            if cmd_tx.send(SessionCommand::Signal(signal)).await.is_err() {
                debug!(%from, "signal for a finished session dropped");
            }
        }
        Dispatch::BusyReject => {
            let _ = ctx.signaling.send_signal(&from, CallSignal::Reject).await;
        }
        Dispatch::Done => {}
    }
}
