//! Scripted peer links: SDP strings are fabricated, operations are
//! logged, and health can be driven by the test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use peercall_core::IceCandidatePayload;
use peercall_engine::peer::{LinkEvent, LinkHealth, PeerLink, PeerLinkFactory, TrackSlot};
use peercall_engine::Result;

/// Factory that records every link it opens so tests can inspect and
/// drive them.
#[derive(Default)]
pub struct ScriptedLinkFactory {
    links: Mutex<Vec<Arc<ScriptedLink>>>,
}

impl ScriptedLinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// The `index`-th link opened through this factory.
    pub fn link(&self, index: usize) -> Arc<ScriptedLink> {
        self.links.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl PeerLinkFactory for ScriptedLinkFactory {
    async fn open(&self, events: mpsc::Sender<LinkEvent>) -> Result<Arc<dyn PeerLink>> {
        let link = Arc::new(ScriptedLink {
            events,
            counter: AtomicU64::new(0),
            log: Mutex::new(Vec::new()),
        });
        self.links.lock().unwrap().push(Arc::clone(&link));
        Ok(link)
    }
}

/// One fake media connection.
pub struct ScriptedLink {
    events: mpsc::Sender<LinkEvent>,
    counter: AtomicU64,
    log: Mutex<Vec<String>>,
}

impl ScriptedLink {
    fn log(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    /// Drive the link into the failed state, as ICE exhaustion would.
    pub async fn fail(&self) {
        let _ = self.events.send(LinkEvent::Health(LinkHealth::Failed)).await;
    }

    /// Announce a locally gathered candidate.
    pub async fn gather_candidate(&self, tag: &str) {
        let _ = self
            .events
            .send(LinkEvent::LocalCandidate(IceCandidatePayload {
                candidate: tag.to_string(),
                ..Default::default()
            }))
            .await;
    }
}

#[async_trait]
impl PeerLink for ScriptedLink {
    async fn propose_offer(&self) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.log(format!("offer-{n}"));
        Ok(format!("offer-{n}"))
    }

    async fn apply_remote_offer(&self, sdp: &str) -> Result<()> {
        self.log(format!("apply-offer:{sdp}"));
        Ok(())
    }

    async fn produce_answer(&self) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.log(format!("answer-{n}"));
        Ok(format!("answer-{n}"))
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()> {
        self.log(format!("apply-answer:{sdp}"));
        Ok(())
    }

    async fn rollback_local(&self) -> Result<()> {
        self.log("rollback");
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidatePayload) -> Result<()> {
        self.log(format!("candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn attach_track(&self, track: Arc<TrackLocalStaticSample>) -> Result<TrackSlot> {
        let kind = match track.kind() {
            RTPCodecType::Audio => "audio",
            RTPCodecType::Video => "video",
            _ => "unknown",
        };
        self.log(format!("attach-{kind}"));
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(TrackSlot::from_raw(n))
    }

    async fn swap_track(&self, slot: TrackSlot, _track: Arc<TrackLocalStaticSample>) -> Result<()> {
        self.log(format!("swap-{}", slot.raw()));
        Ok(())
    }

    async fn drop_track(&self, slot: TrackSlot) -> Result<()> {
        self.log(format!("drop-{}", slot.raw()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log("close");
        Ok(())
    }
}
