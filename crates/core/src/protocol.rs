//! JSON-RPC 2.0 framing between a client and the signaling relay.
//!
//! Membership operations are requests (the relay answers every one);
//! call signals travel as notifications in both directions so the relay
//! stays a dumb pipe for them.
//!
//! Methods:
//!
//! | Method             | Direction      | Kind         |
//! |--------------------|----------------|--------------|
//! | `relay.hello`      | client → relay | request      |
//! | `relay.ping`       | client → relay | request      |
//! | `room.join`        | client → relay | request      |
//! | `room.leave`       | client → relay | request      |
//! | `room.members`     | client → relay | request      |
//! | `call.signal`      | both           | notification |
//! | `room.peer-joined` | relay → client | notification |
//! | `room.peer-left`   | relay → client | notification |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::ids::{PeerId, RoomId};
use crate::signal::CallSignal;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name constants.
pub mod methods {
    pub const HELLO: &str = "relay.hello";
    pub const PING: &str = "relay.ping";
    pub const ROOM_JOIN: &str = "room.join";
    pub const ROOM_LEAVE: &str = "room.leave";
    pub const ROOM_MEMBERS: &str = "room.members";
    pub const CALL_SIGNAL: &str = "call.signal";
    pub const PEER_JOINED: &str = "room.peer-joined";
    pub const PEER_LEFT: &str = "room.peer-left";
}

/// JSON-RPC error codes.
pub mod error_codes {
    // Standard JSON-RPC 2.0 codes
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    // Relay-specific codes (server range)
    pub const NOT_REGISTERED: i32 = -32000;
    pub const ALREADY_REGISTERED: i32 = -32001;
    pub const INVALID_PEER_ID: i32 = -32002;
}

// ============================================================================
// JSON-RPC frames
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// One decoded inbound frame, classified by shape.
#[derive(Debug, Clone)]
pub enum Frame {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

/// Classify and decode a text frame.
///
/// A frame with `method` and `id` is a request, with `method` alone a
/// notification, with `result` or `error` a response. Anything else is
/// rejected.
pub fn decode_frame(text: &str) -> Result<Frame, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Parse(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| ProtocolError::InvalidFrame("not a JSON object".to_string()))?;

    if object.contains_key("method") {
        if object.contains_key("id") {
            let request: JsonRpcRequest = serde_json::from_value(value)
                .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
            Ok(Frame::Request(request))
        } else {
            let notification: JsonRpcNotification = serde_json::from_value(value)
                .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
            Ok(Frame::Notification(notification))
        }
    } else if object.contains_key("result") || object.contains_key("error") {
        let response: JsonRpcResponse = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidFrame(e.to_string()))?;
        Ok(Frame::Response(response))
    } else {
        Err(ProtocolError::InvalidFrame(
            "neither request, notification, nor response".to_string(),
        ))
    }
}

// ============================================================================
// Typed params
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub peer_id: PeerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomParams {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSendParams {
    pub to: PeerId,
    pub payload: CallSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDeliverParams {
    pub from: PeerId,
    pub payload: CallSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPeerParams {
    pub room_id: RoomId,
    pub peer_id: PeerId,
}

/// Result payload of `room.join` and `room.members`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomMembersResult {
    pub members: Vec<PeerId>,
}

/// Result payload of `relay.ping`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PongResult {
    pub timestamp_ms: u64,
}

fn typed_params<T: DeserializeOwned>(
    method: &str,
    params: Option<&Value>,
) -> Result<T, ProtocolError> {
    let value = params.cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidParams {
        method: method.to_string(),
        detail: e.to_string(),
    })
}

fn encode_params<T: Serialize>(params: &T) -> Option<Value> {
    serde_json::to_value(params).ok()
}

// ============================================================================
// Typed requests and notices
// ============================================================================

/// Client → relay requests.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayRequest {
    Hello { peer_id: PeerId },
    JoinRoom { room_id: RoomId },
    LeaveRoom { room_id: RoomId },
    RoomMembers { room_id: RoomId },
    Ping,
}

impl RelayRequest {
    pub fn method(&self) -> &'static str {
        match self {
            RelayRequest::Hello { .. } => methods::HELLO,
            RelayRequest::JoinRoom { .. } => methods::ROOM_JOIN,
            RelayRequest::LeaveRoom { .. } => methods::ROOM_LEAVE,
            RelayRequest::RoomMembers { .. } => methods::ROOM_MEMBERS,
            RelayRequest::Ping => methods::PING,
        }
    }

    pub fn into_request(self, id: u64) -> JsonRpcRequest {
        let method = self.method();
        let params = match self {
            RelayRequest::Hello { peer_id } => encode_params(&HelloParams { peer_id }),
            RelayRequest::JoinRoom { room_id }
            | RelayRequest::LeaveRoom { room_id }
            | RelayRequest::RoomMembers { room_id } => encode_params(&RoomParams { room_id }),
            RelayRequest::Ping => None,
        };
        JsonRpcRequest::new(id, method, params)
    }

    pub fn from_request(request: &JsonRpcRequest) -> Result<Self, ProtocolError> {
        let params = request.params.as_ref();
        match request.method.as_str() {
            methods::HELLO => {
                let p: HelloParams = typed_params(methods::HELLO, params)?;
                Ok(RelayRequest::Hello { peer_id: p.peer_id })
            }
            methods::ROOM_JOIN => {
                let p: RoomParams = typed_params(methods::ROOM_JOIN, params)?;
                Ok(RelayRequest::JoinRoom { room_id: p.room_id })
            }
            methods::ROOM_LEAVE => {
                let p: RoomParams = typed_params(methods::ROOM_LEAVE, params)?;
                Ok(RelayRequest::LeaveRoom { room_id: p.room_id })
            }
            methods::ROOM_MEMBERS => {
                let p: RoomParams = typed_params(methods::ROOM_MEMBERS, params)?;
                Ok(RelayRequest::RoomMembers { room_id: p.room_id })
            }
            methods::PING => Ok(RelayRequest::Ping),
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

/// Notifications in either direction.
///
/// `call.signal` is shared by both directions: carrying `to` on the way
/// in and `from` on the way out, so a client never needs to know its own
/// id is being attached by the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayNotice {
    /// Client → relay: forward `payload` to `to`.
    SignalTo { to: PeerId, payload: CallSignal },
    /// Relay → client: envelope delivered from `from`.
    SignalFrom { from: PeerId, payload: CallSignal },
    PeerJoined { room_id: RoomId, peer_id: PeerId },
    PeerLeft { room_id: RoomId, peer_id: PeerId },
}

impl RelayNotice {
    pub fn method(&self) -> &'static str {
        match self {
            RelayNotice::SignalTo { .. } | RelayNotice::SignalFrom { .. } => methods::CALL_SIGNAL,
            RelayNotice::PeerJoined { .. } => methods::PEER_JOINED,
            RelayNotice::PeerLeft { .. } => methods::PEER_LEFT,
        }
    }

    pub fn into_notification(self) -> JsonRpcNotification {
        let method = self.method();
        let params = match self {
            RelayNotice::SignalTo { to, payload } => {
                encode_params(&SignalSendParams { to, payload })
            }
            RelayNotice::SignalFrom { from, payload } => {
                encode_params(&SignalDeliverParams { from, payload })
            }
            RelayNotice::PeerJoined { room_id, peer_id } => {
                encode_params(&RoomPeerParams { room_id, peer_id })
            }
            RelayNotice::PeerLeft { room_id, peer_id } => {
                encode_params(&RoomPeerParams { room_id, peer_id })
            }
        };
        JsonRpcNotification::new(method, params)
    }

    pub fn from_notification(notification: &JsonRpcNotification) -> Result<Self, ProtocolError> {
        let params = notification.params.as_ref();
        match notification.method.as_str() {
            methods::CALL_SIGNAL => {
                let object = params.and_then(Value::as_object).ok_or_else(|| {
                    ProtocolError::InvalidParams {
                        method: methods::CALL_SIGNAL.to_string(),
                        detail: "params must be an object".to_string(),
                    }
                })?;
                if object.contains_key("from") {
                    let p: SignalDeliverParams = typed_params(methods::CALL_SIGNAL, params)?;
                    Ok(RelayNotice::SignalFrom {
                        from: p.from,
                        payload: p.payload,
                    })
                } else {
                    let p: SignalSendParams = typed_params(methods::CALL_SIGNAL, params)?;
                    Ok(RelayNotice::SignalTo {
                        to: p.to,
                        payload: p.payload,
                    })
                }
            }
            methods::PEER_JOINED => {
                let p: RoomPeerParams = typed_params(methods::PEER_JOINED, params)?;
                Ok(RelayNotice::PeerJoined {
                    room_id: p.room_id,
                    peer_id: p.peer_id,
                })
            }
            methods::PEER_LEFT => {
                let p: RoomPeerParams = typed_params(methods::PEER_LEFT, params)?;
                Ok(RelayNotice::PeerLeft {
                    room_id: p.room_id,
                    peer_id: p.peer_id,
                })
            }
            other => Err(ProtocolError::UnknownMethod(other.to_string())),
        }
    }
}

/// Serialize a frame for the wire.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::CallKind;

    #[test]
    fn test_request_round_trip() {
        let request = RelayRequest::JoinRoom {
            room_id: RoomId::new("voice-general"),
        };
        let wire = request.clone().into_request(7);
        assert_eq!(wire.jsonrpc, "2.0");
        assert_eq!(wire.method, "room.join");
        assert_eq!(wire.id, 7);

        let back = RelayRequest::from_request(&wire).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_hello_params_shape() {
        let wire = RelayRequest::Hello {
            peer_id: PeerId::new("user-1"),
        }
        .into_request(1);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["params"]["peer_id"], "user-1");
    }

    #[test]
    fn test_ping_has_no_params() {
        let wire = RelayRequest::Ping.into_request(3);
        assert!(wire.params.is_none());
        assert_eq!(
            RelayRequest::from_request(&wire).unwrap(),
            RelayRequest::Ping
        );
    }

    #[test]
    fn test_unknown_method_rejected() {
        let wire = JsonRpcRequest::new(1, "relay.teleport", None);
        let err = RelayRequest::from_request(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMethod(_)));
    }

    #[test]
    fn test_missing_params_rejected() {
        let wire = JsonRpcRequest::new(2, methods::ROOM_JOIN, None);
        let err = RelayRequest::from_request(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParams { .. }));
    }

    #[test]
    fn test_signal_notice_directions() {
        let outbound = RelayNotice::SignalTo {
            to: PeerId::new("bob"),
            payload: CallSignal::Initiate {
                kind: CallKind::Voice,
            },
        };
        let wire = outbound.clone().into_notification();
        assert_eq!(wire.method, "call.signal");
        assert_eq!(RelayNotice::from_notification(&wire).unwrap(), outbound);

        let inbound = RelayNotice::SignalFrom {
            from: PeerId::new("alice"),
            payload: CallSignal::Accept,
        };
        let wire = inbound.clone().into_notification();
        assert_eq!(RelayNotice::from_notification(&wire).unwrap(), inbound);
    }

    #[test]
    fn test_peer_joined_round_trip() {
        let notice = RelayNotice::PeerJoined {
            room_id: RoomId::new("voice-general"),
            peer_id: PeerId::new("carol"),
        };
        let wire = notice.clone().into_notification();
        assert_eq!(wire.method, "room.peer-joined");
        assert_eq!(RelayNotice::from_notification(&wire).unwrap(), notice);
    }

    #[test]
    fn test_decode_frame_classification() {
        let request = r#"{"jsonrpc":"2.0","id":1,"method":"relay.ping"}"#;
        assert!(matches!(decode_frame(request), Ok(Frame::Request(_))));

        let notification =
            r#"{"jsonrpc":"2.0","method":"call.signal","params":{"to":"bob","payload":{"type":"accept"}}}"#;
        assert!(matches!(
            decode_frame(notification),
            Ok(Frame::Notification(_))
        ));

        let response = r#"{"jsonrpc":"2.0","id":1,"result":{"timestamp_ms":5}}"#;
        assert!(matches!(decode_frame(response), Ok(Frame::Response(_))));
    }

    #[test]
    fn test_decode_frame_rejects_garbage() {
        assert!(matches!(
            decode_frame("not json at all"),
            Err(ProtocolError::Parse(_))
        ));
        assert!(matches!(
            decode_frame("[1,2,3]"),
            Err(ProtocolError::InvalidFrame(_))
        ));
        assert!(matches!(
            decode_frame(r#"{"jsonrpc":"2.0"}"#),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_error_response_shape() {
        let response = JsonRpcResponse::failure(9, error_codes::ALREADY_REGISTERED, "taken");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], -32001);
        assert!(json.get("result").is_none());
    }
}
