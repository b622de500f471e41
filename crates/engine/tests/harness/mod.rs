//! Shared fixtures for call engine integration tests.

pub mod hub;
pub mod link;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use peercall_core::PeerId;
use peercall_engine::media::synthetic::SyntheticCapture;
use peercall_engine::media::CaptureDevice;
use peercall_engine::peer::PeerLinkFactory;
use peercall_engine::quality::PressureProbe;
use peercall_engine::{CallEngine, CallEvent, EngineConfig};

use hub::SignalingHub;
use link::ScriptedLinkFactory;

pub const EVENT_WINDOW: Duration = Duration::from_secs(5);

/// A pressure probe that always reports the same load.
pub struct ConstProbe(pub f64);

#[async_trait::async_trait]
impl PressureProbe for ConstProbe {
    async fn sample(&self) -> f64 {
        self.0
    }
}

/// One engine wired to the in-memory hub with scripted links and
/// synthetic capture.
pub struct EnginePeer {
    pub id: PeerId,
    pub engine: CallEngine,
    pub events: broadcast::Receiver<CallEvent>,
    pub links: Arc<ScriptedLinkFactory>,
    pub capture: Arc<SyntheticCapture>,
}

impl EnginePeer {
    pub async fn join(hub: &SignalingHub, name: &str) -> Self {
        Self::join_with(hub, name, EngineConfig::default(), 0.4).await
    }

    /// Mid-band pressure by default so the quality controller holds its
    /// level unless a test pins it.
    pub async fn join_with(
        hub: &SignalingHub,
        name: &str,
        config: EngineConfig,
        pressure: f64,
    ) -> Self {
        let id = PeerId::new(name);
        let (port, updates) = hub.register(&id, config.channel_capacity).await;
        let links = Arc::new(ScriptedLinkFactory::new());
        let capture = Arc::new(SyntheticCapture::new());
        let engine = CallEngine::new(
            id.clone(),
            port,
            updates,
            Arc::clone(&links) as Arc<dyn PeerLinkFactory>,
            Arc::clone(&capture) as Arc<dyn CaptureDevice>,
            Arc::new(ConstProbe(pressure)),
            config,
        )
        .expect("engine config valid");
        let events = engine.subscribe();
        Self {
            id,
            engine,
            events,
            links,
            capture,
        }
    }

    /// Wait for the first event matching `pred`, skipping the rest.
    pub async fn wait_for<F>(&mut self, pred: F) -> CallEvent
    where
        F: Fn(&CallEvent) -> bool,
    {
        wait_for_event(&mut self.events, pred).await
    }
}

pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<CallEvent>, pred: F) -> CallEvent
where
    F: Fn(&CallEvent) -> bool,
{
    timeout(EVENT_WINDOW, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("expected event before timeout")
}
