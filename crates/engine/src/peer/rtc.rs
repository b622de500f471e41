//! Peer link over a live WebRTC connection

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use peercall_core::IceCandidatePayload;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::peer::{LinkEvent, LinkHealth, PeerLink, PeerLinkFactory, TrackSlot};

/// Opens [`RtcPeerLink`]s configured from the engine's ICE servers
pub struct RtcLinkFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl RtcLinkFactory {
    /// Build a factory from the engine configuration
    pub fn new(config: &EngineConfig) -> Self {
        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerLinkFactory for RtcLinkFactory {
    async fn open(&self, events: mpsc::Sender<LinkEvent>) -> Result<Arc<dyn PeerLink>> {
        let link = RtcPeerLink::connect(self.ice_servers.clone(), events).await?;
        Ok(Arc::new(link))
    }
}

/// A single WebRTC peer connection owned by one call session
pub struct RtcPeerLink {
    peer_connection: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<u64, Arc<RTCRtpSender>>>,
    next_slot: AtomicU64,
}

impl RtcPeerLink {
    async fn connect(
        ice_servers: Vec<RTCIceServer>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnectionError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| {
                Error::PeerConnectionError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let health_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let events = health_events.clone();
                Box::pin(async move {
                    let health = match s {
                        RTCPeerConnectionState::Connecting => LinkHealth::Connecting,
                        RTCPeerConnectionState::Connected => LinkHealth::Connected,
                        RTCPeerConnectionState::Disconnected => LinkHealth::Disconnected,
                        RTCPeerConnectionState::Failed => LinkHealth::Failed,
                        RTCPeerConnectionState::Closed => LinkHealth::Closed,
                        _ => return,
                    };
                    debug!(?health, "peer link state change");
                    let _ = events.send(LinkEvent::Health(health)).await;
                })
            },
        ));

        let candidate_events = events;
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let payload = IceCandidatePayload {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        let _ = events.send(LinkEvent::LocalCandidate(payload)).await;
                    }
                    Err(e) => warn!(error = %e, "local ICE candidate not serializable"),
                }
            })
        }));

        Ok(Self {
            peer_connection,
            senders: Mutex::new(HashMap::new()),
            next_slot: AtomicU64::new(1),
        })
    }

    async fn local_sdp(&self) -> Result<String> {
        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local description after setting it".to_string()))?;
        Ok(local_desc.sdp)
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn propose_offer(&self) -> Result<String> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.local_sdp().await
    }

    async fn apply_remote_offer(&self, sdp: &str) -> Result<()> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn produce_answer(&self) -> Result<String> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.local_sdp().await
    }

    async fn apply_remote_answer(&self, sdp: &str) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn rollback_local(&self) -> Result<()> {
        // The rollback description has no public constructor; build it the
        // same way it crosses the wire
        let rollback: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({ "type": "rollback", "sdp": "" }))
                .map_err(|e| Error::SdpError(format!("Failed to build rollback: {}", e)))?;

        self.peer_connection
            .set_local_description(rollback)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to roll back local description: {}", e)))
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidatePayload) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn attach_track(&self, track: Arc<TrackLocalStaticSample>) -> Result<TrackSlot> {
        let sender = self
            .peer_connection
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to add track: {}", e)))?;

        let slot = TrackSlot::from_raw(self.next_slot.fetch_add(1, Ordering::Relaxed));
        self.senders.lock().await.insert(slot.raw(), sender);
        Ok(slot)
    }

    async fn swap_track(&self, slot: TrackSlot, track: Arc<TrackLocalStaticSample>) -> Result<()> {
        let sender = {
            let senders = self.senders.lock().await;
            senders
                .get(&slot.raw())
                .cloned()
                .ok_or_else(|| Error::MediaTrackError("Unknown track slot".to_string()))?
        };

        sender
            .replace_track(Some(track as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to replace track: {}", e)))
    }

    async fn drop_track(&self, slot: TrackSlot) -> Result<()> {
        let sender = self
            .senders
            .lock()
            .await
            .remove(&slot.raw())
            .ok_or_else(|| Error::MediaTrackError("Unknown track slot".to_string()))?;

        self.peer_connection
            .remove_track(&sender)
            .await
            .map_err(|e| Error::MediaTrackError(format!("Failed to remove track: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{OutboundTrack, TrackRole, MICROPHONE_PROFILES};

    async fn open_link() -> Arc<dyn PeerLink> {
        let factory = RtcLinkFactory::new(&EngineConfig::default());
        let (events_tx, _events_rx) = mpsc::channel(16);
        factory.open(events_tx).await.unwrap()
    }

    #[tokio::test]
    async fn test_offer_contains_media_section() {
        let link = open_link().await;
        let track = OutboundTrack::synthetic_tone(TrackRole::Microphone, &MICROPHONE_PROFILES[0]);
        link.attach_track(track.rtc_track()).await.unwrap();

        let sdp = link.propose_offer().await.unwrap();
        assert!(sdp.contains("v=0"));
        assert!(sdp.contains("m=audio"));
        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_links() {
        let caller = open_link().await;
        let callee = open_link().await;

        let track = OutboundTrack::synthetic_tone(TrackRole::Microphone, &MICROPHONE_PROFILES[0]);
        caller.attach_track(track.rtc_track()).await.unwrap();

        let offer = caller.propose_offer().await.unwrap();
        callee.apply_remote_offer(&offer).await.unwrap();
        let answer = callee.produce_answer().await.unwrap();
        caller.apply_remote_answer(&answer).await.unwrap();

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_swap_and_drop_track() {
        let link = open_link().await;
        let first = OutboundTrack::synthetic_video(TrackRole::Camera, &crate::media::CAMERA_PROFILES[0]);
        let second = OutboundTrack::synthetic_video(TrackRole::Screen, &crate::media::SCREEN_PROFILES[0]);

        let slot = link.attach_track(first.rtc_track()).await.unwrap();
        link.swap_track(slot, second.rtc_track()).await.unwrap();
        link.drop_track(slot).await.unwrap();

        let err = link.drop_track(slot).await.unwrap_err();
        assert!(matches!(err, Error::MediaTrackError(_)));
        link.close().await.unwrap();
    }
}
