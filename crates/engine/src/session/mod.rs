//! Call session controller
//!
//! One session runs as a single-owner task: commands from the engine,
//! forwarded signaling envelopes, link health changes, capture results and
//! timers all funnel into one `select!` loop, so session state is only
//! ever touched from one place. The task exits when the phase turns
//! terminal and frees the engine's active slot on the way out.

mod session;
mod state;

pub use state::{CallPhase, CallRole, EndReason};

use std::sync::Arc;

use peercall_core::{CallId, CallKind, CallSignal, PeerId};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::CallEvent;
use crate::media::CaptureDevice;
use crate::peer::PeerLinkFactory;
use crate::quality::{PressureProbe, QualityLevel};
use crate::signaling::SignalingPort;

/// Instructions the engine sends into a session task
pub(crate) enum SessionCommand {
    /// Accept the inbound ring
    Accept { ack: oneshot::Sender<Result<()>> },
    /// Decline the inbound ring
    Reject { ack: oneshot::Sender<Result<()>> },
    /// Terminate from any live phase
    HangUp { ack: oneshot::Sender<Result<()>> },
    /// Silence or restore the outbound microphone
    SetMuted {
        muted: bool,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Announce a deafen toggle to the counterpart
    SetDeafened {
        deafened: bool,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Start sharing the screen over the existing video sender
    StartScreenShare { ack: oneshot::Sender<Result<()>> },
    /// Stop sharing and restore the prior video track
    StopScreenShare { ack: oneshot::Sender<Result<()>> },
    /// Pin the share quality, disabling automatic stepping
    PinQuality {
        level: QualityLevel,
        ack: oneshot::Sender<Result<()>>,
    },
    /// Release a quality pin
    ClearQualityPin { ack: oneshot::Sender<Result<()>> },
    /// An envelope from the session's counterpart, forwarded by the router
    Signal(CallSignal),
    /// The relay connection is gone; end without notifying the counterpart
    SignalingLost,
}

/// Engine-side handle to a running session task
#[derive(Clone)]
pub(crate) struct SessionHandle {
    pub call_id: CallId,
    pub peer: PeerId,
    pub kind: CallKind,
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    pub phase_rx: watch::Receiver<CallPhase>,
}

impl SessionHandle {
    /// Latest phase published by the session task
    pub fn phase(&self) -> CallPhase {
        *self.phase_rx.borrow()
    }
}

/// Everything a session task needs to run
pub(crate) struct SessionParams {
    pub local_peer: PeerId,
    pub peer: PeerId,
    pub kind: CallKind,
    pub role: CallRole,
    pub config: EngineConfig,
    pub signaling: Arc<dyn SignalingPort>,
    pub link_factory: Arc<dyn PeerLinkFactory>,
    pub capture: Arc<dyn CaptureDevice>,
    pub probe: Arc<dyn PressureProbe>,
    pub events: broadcast::Sender<CallEvent>,
    /// Engine's active slot; the task clears its own entry on exit
    pub active: Arc<Mutex<Option<SessionHandle>>>,
}

/// Spawn one session task and return the handle to drive it
pub(crate) fn spawn_session(params: SessionParams) -> SessionHandle {
    let call_id = CallId::new();
    let (cmd_tx, cmd_rx) = mpsc::channel(params.config.channel_capacity);
    let initial = match params.role {
        CallRole::Caller => CallPhase::Calling,
        CallRole::Callee => CallPhase::Ringing,
    };
    let (phase_tx, phase_rx) = watch::channel(CallPhase::Idle);

    let handle = SessionHandle {
        call_id,
        peer: params.peer.clone(),
        kind: params.kind,
        cmd_tx,
        phase_rx,
    };

    tokio::spawn(session::run(call_id, initial, params, phase_tx, cmd_rx));
    handle
}
