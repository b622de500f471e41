//! WebSocket client for the signaling relay

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use peercall_core::protocol::{
    decode_frame, encode, Frame, JsonRpcResponse, RelayNotice, RelayRequest, RoomMembersResult,
};
use peercall_core::{CallSignal, PeerId, RoomId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::signaling::{SignalingPort, SignalingUpdate};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Registered connection to the relay.
///
/// Requests are correlated by JSON-RPC id through a pending map; inbound
/// notices surface on the update channel handed out by
/// [`connect`](Self::connect). When the stream ends a final
/// [`SignalingUpdate::Closed`] is emitted and every in-flight request
/// fails.
pub struct RelayClient {
    local_peer: PeerId,
    next_id: AtomicU64,
    pending: PendingMap,
    writer_tx: mpsc::Sender<Message>,
}

impl RelayClient {
    /// Connect to the relay, register `local_peer`, and return the client
    /// plus its inbound update stream
    pub async fn connect(
        url: &str,
        local_peer: PeerId,
        updates_capacity: usize,
    ) -> Result<(Arc<Self>, mpsc::Receiver<SignalingUpdate>)> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::SignalingError(format!("connect to {} failed: {}", url, e)))?;
        let (mut ws_sender, mut ws_receiver) = ws.split();

        let (writer_tx, mut writer_rx) = mpsc::channel::<Message>(64);
        tokio::spawn(async move {
            while let Some(message) = writer_rx.recv().await {
                if ws_sender.send(message).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        let (updates_tx, updates_rx) = mpsc::channel(updates_capacity.max(8));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(message) = ws_receiver.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        route_frame(&reader_pending, &updates_tx, &text).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        debug!(error = %err, "relay stream error");
                        break;
                    }
                }
            }
            // Dropping the waiters fails every in-flight request fast
            reader_pending.lock().await.clear();
            let _ = updates_tx.send(SignalingUpdate::Closed).await;
        });

        let client = Arc::new(Self {
            local_peer: local_peer.clone(),
            next_id: AtomicU64::new(0),
            pending,
            writer_tx,
        });

        let response = client
            .request(RelayRequest::Hello {
                peer_id: local_peer,
            })
            .await?;
        if let Some(error) = response.error {
            return Err(Error::SignalingError(format!(
                "registration refused: {}",
                error.message
            )));
        }
        info!(peer = %client.local_peer, url, "registered with relay");

        Ok((client, updates_rx))
    }

    /// Peer id this client registered as
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    async fn request(&self, request: RelayRequest) -> Result<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let text = encode(&request.into_request(id))
            .map_err(|e| Error::SignalingError(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.writer_tx.send(Message::Text(text)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::SignalingClosed);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::SignalingClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::OperationTimeout(format!("relay request {}", id)))
            }
        }
    }

    async fn checked_request(&self, request: RelayRequest) -> Result<JsonRpcResponse> {
        let response = self.request(request).await?;
        if let Some(error) = response.error {
            return Err(Error::SignalingError(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        Ok(response)
    }
}

async fn route_frame(pending: &PendingMap, updates_tx: &mpsc::Sender<SignalingUpdate>, text: &str) {
    match decode_frame(text) {
        Ok(Frame::Response(response)) => {
            let waiter = pending.lock().await.remove(&response.id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(response);
                }
                None => debug!(id = response.id, "unmatched relay response dropped"),
            }
        }
        Ok(Frame::Notification(notification)) => {
            match RelayNotice::from_notification(&notification) {
                Ok(RelayNotice::SignalFrom { from, payload }) => {
                    let _ = updates_tx
                        .send(SignalingUpdate::Signal {
                            from,
                            signal: payload,
                        })
                        .await;
                }
                Ok(RelayNotice::PeerJoined { room_id, peer_id }) => {
                    let _ = updates_tx
                        .send(SignalingUpdate::PeerJoined { room_id, peer_id })
                        .await;
                }
                Ok(RelayNotice::PeerLeft { room_id, peer_id }) => {
                    let _ = updates_tx
                        .send(SignalingUpdate::PeerLeft { room_id, peer_id })
                        .await;
                }
                Ok(RelayNotice::SignalTo { .. }) => {
                    debug!("client-direction notice from relay dropped");
                }
                Err(err) => debug!(error = %err, "unknown relay notice dropped"),
            }
        }
        Ok(Frame::Request(request)) => {
            debug!(method = %request.method, "request frame from relay dropped");
        }
        Err(err) => warn!(error = %err, "malformed relay frame dropped"),
    }
}

#[async_trait]
impl SignalingPort for RelayClient {
    async fn send_signal(&self, to: &PeerId, signal: CallSignal) -> Result<()> {
        debug!(to = %to, kind = signal.kind_name(), "sending call envelope");
        let notice = RelayNotice::SignalTo {
            to: to.clone(),
            payload: signal,
        };
        let text = encode(&notice.into_notification())
            .map_err(|e| Error::SignalingError(e.to_string()))?;
        self.writer_tx
            .send(Message::Text(text))
            .await
            .map_err(|_| Error::SignalingClosed)
    }

    async fn join_room(&self, room: &RoomId) -> Result<Vec<PeerId>> {
        let response = self
            .checked_request(RelayRequest::JoinRoom {
                room_id: room.clone(),
            })
            .await?;
        let result: RoomMembersResult =
            serde_json::from_value(response.result.unwrap_or(Value::Null))
                .map_err(|e| Error::SignalingError(format!("bad membership payload: {}", e)))?;
        Ok(result.members)
    }

    async fn leave_room(&self, room: &RoomId) -> Result<()> {
        self.checked_request(RelayRequest::LeaveRoom {
            room_id: room.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn room_members(&self, room: &RoomId) -> Result<Vec<PeerId>> {
        let response = self
            .checked_request(RelayRequest::RoomMembers {
                room_id: room.clone(),
            })
            .await?;
        let result: RoomMembersResult =
            serde_json::from_value(response.result.unwrap_or(Value::Null))
                .map_err(|e| Error::SignalingError(format!("bad membership payload: {}", e)))?;
        Ok(result.members)
    }

    async fn close(&self) -> Result<()> {
        let _ = self.writer_tx.send(Message::Close(None)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peercall_relay::{RelayConfig, RelayServer};

    async fn start_relay() -> (String, peercall_relay::RelayHandle) {
        let config = RelayConfig::default().with_bind_addr("127.0.0.1:0");
        let server = RelayServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        tokio::spawn(server.run());
        (format!("ws://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_register_join_and_signal_round_trip() {
        let (url, relay) = start_relay().await;

        let (alice, _alice_updates) =
            RelayClient::connect(&url, PeerId::new("alice"), 32).await.unwrap();
        let (bob, mut bob_updates) =
            RelayClient::connect(&url, PeerId::new("bob"), 32).await.unwrap();

        let room = RoomId::new("voice-1");
        alice.join_room(&room).await.unwrap();
        let members = bob.join_room(&room).await.unwrap();
        assert!(members.contains(alice.local_peer()));
        assert!(members.contains(bob.local_peer()));

        alice
            .send_signal(bob.local_peer(), CallSignal::Accept)
            .await
            .unwrap();

        loop {
            match bob_updates.recv().await.unwrap() {
                SignalingUpdate::Signal { from, signal } => {
                    assert_eq!(&from, alice.local_peer());
                    assert!(matches!(signal, CallSignal::Accept));
                    break;
                }
                SignalingUpdate::PeerJoined { .. } => continue,
                other => panic!("unexpected update {other:?}"),
            }
        }

        relay.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_registration_reports_error() {
        let (url, relay) = start_relay().await;

        let (_first, _updates) =
            RelayClient::connect(&url, PeerId::new("carol"), 32).await.unwrap();
        let second = RelayClient::connect(&url, PeerId::new("carol"), 32).await;
        assert!(matches!(second, Err(Error::SignalingError(_))));

        relay.shutdown();
    }

    #[tokio::test]
    async fn test_closing_the_stream_surfaces_closed_update() {
        let (url, relay) = start_relay().await;
        let (client, mut updates) =
            RelayClient::connect(&url, PeerId::new("dave"), 32).await.unwrap();

        client.close().await.unwrap();

        loop {
            match tokio::time::timeout(Duration::from_secs(5), updates.recv())
                .await
                .expect("update before timeout")
            {
                Some(SignalingUpdate::Closed) | None => break,
                Some(_) => continue,
            }
        }

        relay.shutdown();
    }
}
