//! In-memory signaling hub standing in for the relay.
//!
//! Same delivery contract as the real relay: FIFO per directed pair,
//! unknown targets dropped silently, room membership with join/left
//! notices.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use peercall_core::{CallSignal, PeerId, RoomId};
use peercall_engine::signaling::{SignalingPort, SignalingUpdate};
use peercall_engine::{Error, Result};

#[derive(Default)]
struct HubInner {
    peers: HashMap<PeerId, mpsc::Sender<SignalingUpdate>>,
    rooms: HashMap<RoomId, BTreeSet<PeerId>>,
}

/// Shared in-process message switch.
#[derive(Clone, Default)]
pub struct SignalingHub {
    inner: Arc<Mutex<HubInner>>,
}

impl SignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer, returning its port and inbound update stream.
    pub async fn register(
        &self,
        peer: &PeerId,
        capacity: usize,
    ) -> (Arc<HubPort>, mpsc::Receiver<SignalingUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(8));
        self.inner.lock().await.peers.insert(peer.clone(), tx);
        let port = Arc::new(HubPort {
            inner: Arc::clone(&self.inner),
            local: peer.clone(),
        });
        (port, rx)
    }

    /// Sever a peer's transport: its stream sees `Closed` and nothing
    /// can reach it afterwards.
    pub async fn disconnect(&self, peer: &PeerId) {
        let sender = self.inner.lock().await.peers.remove(peer);
        if let Some(sender) = sender {
            let _ = sender.send(SignalingUpdate::Closed).await;
        }
    }
}

/// One peer's view of the hub.
pub struct HubPort {
    inner: Arc<Mutex<HubInner>>,
    local: PeerId,
}

#[async_trait]
impl SignalingPort for HubPort {
    async fn send_signal(&self, to: &PeerId, signal: CallSignal) -> Result<()> {
        let target = self.inner.lock().await.peers.get(to).cloned();
        if let Some(target) = target {
            let _ = target
                .send(SignalingUpdate::Signal {
                    from: self.local.clone(),
                    signal,
                })
                .await;
        }
        // Unknown target: dropped without telling the sender
        Ok(())
    }

    async fn join_room(&self, room: &RoomId) -> Result<Vec<PeerId>> {
        let (members, others) = {
            let mut inner = self.inner.lock().await;
            let entry = inner.rooms.entry(room.clone()).or_default();
            entry.insert(self.local.clone());
            let members: Vec<PeerId> = entry.iter().cloned().collect();
            let others: Vec<mpsc::Sender<SignalingUpdate>> = members
                .iter()
                .filter(|id| **id != self.local)
                .filter_map(|id| inner.peers.get(id).cloned())
                .collect();
            (members, others)
        };
        for other in others {
            let _ = other
                .send(SignalingUpdate::PeerJoined {
                    room_id: room.clone(),
                    peer_id: self.local.clone(),
                })
                .await;
        }
        Ok(members)
    }

    async fn leave_room(&self, room: &RoomId) -> Result<()> {
        let others = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.rooms.get_mut(room) else {
                return Ok(());
            };
            entry.remove(&self.local);
            let rest: Vec<PeerId> = entry.iter().cloned().collect();
            if rest.is_empty() {
                inner.rooms.remove(room);
            }
            rest.iter()
                .filter_map(|id| inner.peers.get(id).cloned())
                .collect::<Vec<_>>()
        };
        for other in others {
            let _ = other
                .send(SignalingUpdate::PeerLeft {
                    room_id: room.clone(),
                    peer_id: self.local.clone(),
                })
                .await;
        }
        Ok(())
    }

    async fn room_members(&self, room: &RoomId) -> Result<Vec<PeerId>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        let sender = self.inner.lock().await.peers.remove(&self.local);
        if let Some(sender) = sender {
            let _ = sender.send(SignalingUpdate::Closed).await;
            Ok(())
        } else {
            Err(Error::SignalingClosed)
        }
    }
}
