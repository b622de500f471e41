//! Per-connection protocol handling.
//!
//! Every connection runs the same lifecycle: websocket handshake, a
//! `relay.hello` registration gate, then a read loop until the socket
//! closes. A dedicated writer task owns the sink half so deliveries
//! from other connections never contend on it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, warn};

use peercall_core::protocol::{
    decode_frame, encode, error_codes, Frame, JsonRpcRequest, JsonRpcResponse, PongResult,
    RelayNotice, RelayRequest, RoomMembersResult,
};
use peercall_core::{CallSignal, PeerId, ProtocolError, RoomId};

use crate::config::RelayConfig;
use crate::presence::PresenceRegistry;

type WsReader = SplitStream<WebSocketStream<TcpStream>>;

// ============================================================================
// Shared state
// ============================================================================

/// One registered peer: its outbound queue and when it said hello.
pub(crate) struct PeerRegistration {
    tx: mpsc::Sender<Message>,
    connected_at_ms: u64,
}

/// State shared by every connection task.
pub(crate) struct SharedState {
    pub(crate) config: RelayConfig,
    pub(crate) peers: RwLock<HashMap<PeerId, PeerRegistration>>,
    pub(crate) presence: PresenceRegistry,
}

impl SharedState {
    pub(crate) fn new(config: RelayConfig) -> Self {
        Self {
            config,
            peers: RwLock::new(HashMap::new()),
            presence: PresenceRegistry::new(),
        }
    }

    pub(crate) async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Queue a frame for a peer's writer task.
    ///
    /// Unknown targets are dropped without a reply: answering "no such
    /// peer" would tell callers who is online. A saturated queue also
    /// drops, so one slow consumer never stalls other peer pairs.
    pub(crate) async fn deliver(&self, target: &PeerId, text: String) {
        let peers = self.peers.read().await;
        let Some(registration) = peers.get(target) else {
            debug!(peer = %target, "dropping frame for unknown peer");
            return;
        };
        match registration.tx.try_send(Message::Text(text)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = %target, "delivery queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(peer = %target, "peer disconnecting, dropping frame");
            }
        }
    }
}

// ============================================================================
// Connection lifecycle
// ============================================================================

pub(crate) async fn handle_connection(state: Arc<SharedState>, stream: TcpStream, addr: SocketAddr) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%addr, error = %e, "websocket handshake failed");
            return;
        }
    };
    debug!(%addr, "websocket connection established");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.channel_capacity);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let peer_id = match await_hello(&state, &tx, &mut ws_receiver).await {
        Some(peer_id) => peer_id,
        None => {
            drop(tx);
            let _ = writer_task.await;
            debug!(%addr, "connection closed before registration");
            return;
        }
    };
    info!(%addr, peer = %peer_id, "peer registered");

    while let Some(message) = ws_receiver.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                debug!(peer = %peer_id, error = %e, "read error, closing connection");
                break;
            }
        };
        match message {
            Message::Text(text) => handle_text(&state, &peer_id, &tx, &text).await,
            Message::Ping(payload) => {
                let _ = tx.try_send(Message::Pong(payload));
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Deregister first so no new frames are queued, then announce the
    // departure to every room the peer was in.
    state.peers.write().await.remove(&peer_id);
    let rooms = state.presence.remove_peer(&peer_id).await;
    for room_id in rooms {
        notify_room(
            &state,
            &room_id,
            Some(&peer_id),
            RelayNotice::PeerLeft {
                room_id: room_id.clone(),
                peer_id: peer_id.clone(),
            },
        )
        .await;
    }
    drop(tx);
    let _ = writer_task.await;
    info!(peer = %peer_id, "peer disconnected");
}

/// Wait for the `relay.hello` that must open every connection.
///
/// Returns the registered id, or `None` if the connection closed, timed
/// out, or presented an id that is already connected. Each inbound frame
/// restarts the timeout clock.
async fn await_hello(
    state: &Arc<SharedState>,
    tx: &mpsc::Sender<Message>,
    ws_receiver: &mut WsReader,
) -> Option<PeerId> {
    loop {
        let message = match timeout(state.config.hello_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(m))) => m,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read error before registration");
                return None;
            }
            Ok(None) => return None,
            Err(_) => {
                debug!("registration timed out");
                return None;
            }
        };

        match message {
            Message::Text(text) => match decode_frame(&text) {
                Ok(Frame::Request(request)) => {
                    let id = request.id;
                    match RelayRequest::from_request(&request) {
                        Ok(RelayRequest::Hello { peer_id }) => {
                            if peer_id.as_str().is_empty() {
                                let response = JsonRpcResponse::failure(
                                    id,
                                    error_codes::INVALID_PEER_ID,
                                    "peer id must not be empty",
                                );
                                send_response(tx, response).await;
                                return None;
                            }

                            let mut peers = state.peers.write().await;
                            match peers.entry(peer_id.clone()) {
                                Entry::Occupied(existing) => {
                                    let since_ms = existing.get().connected_at_ms;
                                    drop(peers);
                                    warn!(peer = %peer_id, "registration refused, id in use");
                                    let response = JsonRpcResponse::failure(
                                        id,
                                        error_codes::ALREADY_REGISTERED,
                                        format!(
                                            "peer '{peer_id}' has been connected since {since_ms}"
                                        ),
                                    );
                                    send_response(tx, response).await;
                                    return None;
                                }
                                Entry::Vacant(slot) => {
                                    let connected_at_ms = current_timestamp_ms();
                                    slot.insert(PeerRegistration {
                                        tx: tx.clone(),
                                        connected_at_ms,
                                    });
                                    drop(peers);
                                    let result = json!({
                                        "peer_id": peer_id.as_str(),
                                        "connected_at_ms": connected_at_ms,
                                    });
                                    send_response(tx, JsonRpcResponse::success(id, result)).await;
                                    return Some(peer_id);
                                }
                            }
                        }
                        Ok(_) => {
                            let response = JsonRpcResponse::failure(
                                id,
                                error_codes::NOT_REGISTERED,
                                "register with relay.hello first",
                            );
                            send_response(tx, response).await;
                        }
                        Err(e) => {
                            let response = JsonRpcResponse::failure(
                                id,
                                error_codes::INVALID_PARAMS,
                                e.to_string(),
                            );
                            send_response(tx, response).await;
                        }
                    }
                }
                Ok(_) => {
                    debug!("ignoring non-request frame before registration");
                }
                Err(e) => {
                    warn!(error = %e, "malformed frame before registration");
                }
            },
            Message::Ping(payload) => {
                let _ = tx.try_send(Message::Pong(payload));
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

// ============================================================================
// Frame dispatch
// ============================================================================

/// Dispatch one text frame from a registered peer.
///
/// Malformed input is logged and dropped. It never earns a reply and
/// never takes the connection down.
async fn handle_text(
    state: &Arc<SharedState>,
    peer_id: &PeerId,
    tx: &mpsc::Sender<Message>,
    text: &str,
) {
    match decode_frame(text) {
        Ok(Frame::Request(request)) => handle_request(state, peer_id, tx, request).await,
        Ok(Frame::Notification(notification)) => {
            match RelayNotice::from_notification(&notification) {
                Ok(RelayNotice::SignalTo { to, payload }) => {
                    forward_signal(state, peer_id, &to, payload).await;
                }
                Ok(other) => {
                    debug!(
                        peer = %peer_id,
                        method = other.method(),
                        "ignoring server-only notification from client"
                    );
                }
                Err(e) => {
                    warn!(peer = %peer_id, error = %e, "bad notification dropped");
                }
            }
        }
        Ok(Frame::Response(_)) => {
            debug!(peer = %peer_id, "ignoring unexpected response frame");
        }
        Err(e) => {
            warn!(peer = %peer_id, error = %e, "malformed frame dropped");
        }
    }
}

async fn handle_request(
    state: &Arc<SharedState>,
    peer_id: &PeerId,
    tx: &mpsc::Sender<Message>,
    request: JsonRpcRequest,
) {
    let id = request.id;
    let parsed = match RelayRequest::from_request(&request) {
        Ok(parsed) => parsed,
        Err(ProtocolError::UnknownMethod(method)) => {
            let response = JsonRpcResponse::failure(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("unknown method '{method}'"),
            );
            send_response(tx, response).await;
            return;
        }
        Err(e) => {
            let response = JsonRpcResponse::failure(id, error_codes::INVALID_PARAMS, e.to_string());
            send_response(tx, response).await;
            return;
        }
    };

    match parsed {
        RelayRequest::Hello { .. } => {
            let response = JsonRpcResponse::failure(
                id,
                error_codes::ALREADY_REGISTERED,
                "connection already registered",
            );
            send_response(tx, response).await;
        }
        RelayRequest::JoinRoom { room_id } => {
            let newly_joined = state.presence.join(&room_id, peer_id).await;
            if newly_joined {
                debug!(peer = %peer_id, room = %room_id, "peer joined room");
                notify_room(
                    state,
                    &room_id,
                    Some(peer_id),
                    RelayNotice::PeerJoined {
                        room_id: room_id.clone(),
                        peer_id: peer_id.clone(),
                    },
                )
                .await;
            }
            let members = state.presence.members_of(&room_id).await;
            send_success(tx, id, &RoomMembersResult { members }).await;
        }
        RelayRequest::LeaveRoom { room_id } => {
            let was_member = state.presence.leave(&room_id, peer_id).await;
            if was_member {
                debug!(peer = %peer_id, room = %room_id, "peer left room");
                notify_room(
                    state,
                    &room_id,
                    Some(peer_id),
                    RelayNotice::PeerLeft {
                        room_id: room_id.clone(),
                        peer_id: peer_id.clone(),
                    },
                )
                .await;
            }
            send_success(tx, id, &json!({ "left": was_member })).await;
        }
        RelayRequest::RoomMembers { room_id } => {
            let members = state.presence.members_of(&room_id).await;
            send_success(tx, id, &RoomMembersResult { members }).await;
        }
        RelayRequest::Ping => {
            let pong = PongResult {
                timestamp_ms: current_timestamp_ms(),
            };
            send_success(tx, id, &pong).await;
        }
    }
}

/// Forward a call signal to its target, rewriting the envelope so the
/// receiver sees who it came from. The relay attaches the sender id
/// itself, so a client cannot speak as anyone else.
async fn forward_signal(state: &Arc<SharedState>, from: &PeerId, to: &PeerId, payload: CallSignal) {
    debug!(%from, %to, signal = payload.kind_name(), "forwarding call signal");
    let notice = RelayNotice::SignalFrom {
        from: from.clone(),
        payload,
    };
    match encode(&notice.into_notification()) {
        Ok(text) => state.deliver(to, text).await,
        Err(e) => warn!(error = %e, "failed to encode signal"),
    }
}

/// Fan a notification out to every member of a room except `exclude`.
async fn notify_room(
    state: &Arc<SharedState>,
    room_id: &RoomId,
    exclude: Option<&PeerId>,
    notice: RelayNotice,
) {
    let members = state.presence.members_of(room_id).await;
    let text = match encode(&notice.into_notification()) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to encode room notification");
            return;
        }
    };
    for member in members {
        if Some(&member) == exclude {
            continue;
        }
        state.deliver(&member, text.clone()).await;
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn send_response(tx: &mpsc::Sender<Message>, response: JsonRpcResponse) {
    match encode(&response) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text)).await;
        }
        Err(e) => warn!(error = %e, "failed to encode response"),
    }
}

async fn send_success<T: Serialize>(tx: &mpsc::Sender<Message>, id: u64, result: &T) {
    let value = serde_json::to_value(result).unwrap_or(Value::Null);
    send_response(tx, JsonRpcResponse::success(id, value)).await;
}

pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
