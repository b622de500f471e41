//! Minimal websocket client used by the relay tests.
//!
//! Drives the wire protocol directly rather than going through the
//! engine's relay client, so relay behavior is tested on its own.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use peercall_core::protocol::{
    decode_frame, encode, Frame, JsonRpcResponse, RelayNotice, RelayRequest,
};
use peercall_core::{CallSignal, PeerId};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestPeer {
    pub peer_id: PeerId,
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    buffered: VecDeque<RelayNotice>,
}

impl TestPeer {
    /// Connect and register in one step.
    pub async fn connect(url: &str, name: &str) -> Self {
        let mut peer = Self::connect_unregistered(url, name).await;
        let response = peer
            .request(RelayRequest::Hello {
                peer_id: peer.peer_id.clone(),
            })
            .await;
        assert!(
            response.error.is_none(),
            "hello for '{name}' failed: {:?}",
            response.error
        );
        peer
    }

    /// Connect without registering, for handshake failure tests.
    pub async fn connect_unregistered(url: &str, name: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("connect to relay");
        Self {
            peer_id: PeerId::new(name),
            ws,
            next_id: 0,
            buffered: VecDeque::new(),
        }
    }

    /// Send a request and wait for its response. Notices that arrive
    /// first are buffered for [`Self::next_notice`].
    pub async fn request(&mut self, request: RelayRequest) -> JsonRpcResponse {
        self.next_id += 1;
        let id = self.next_id;
        let text = encode(&request.into_request(id)).expect("encode request");
        self.ws
            .send(Message::Text(text))
            .await
            .expect("send request");

        loop {
            match self.next_frame().await {
                Frame::Response(response) if response.id == id => return response,
                Frame::Response(response) => {
                    panic!("response for unexpected id {}", response.id)
                }
                Frame::Notification(notification) => {
                    let notice =
                        RelayNotice::from_notification(&notification).expect("decode notice");
                    self.buffered.push_back(notice);
                }
                Frame::Request(_) => panic!("relay sent a request"),
            }
        }
    }

    pub async fn send_signal(&mut self, to: &PeerId, payload: CallSignal) {
        let notice = RelayNotice::SignalTo {
            to: to.clone(),
            payload,
        };
        let text = encode(&notice.into_notification()).expect("encode signal");
        self.ws.send(Message::Text(text)).await.expect("send signal");
    }

    /// Send raw text, for malformed input tests.
    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("send raw");
    }

    /// Wait for the response to a request that was sent via [`Self::send_raw`].
    pub async fn response_for(&mut self, id: u64) -> JsonRpcResponse {
        loop {
            match self.next_frame().await {
                Frame::Response(response) if response.id == id => return response,
                Frame::Response(response) => {
                    panic!("response for unexpected id {}", response.id)
                }
                Frame::Notification(notification) => {
                    let notice =
                        RelayNotice::from_notification(&notification).expect("decode notice");
                    self.buffered.push_back(notice);
                }
                Frame::Request(_) => panic!("relay sent a request"),
            }
        }
    }

    /// Next notice from the relay, buffered or fresh off the wire.
    pub async fn next_notice(&mut self) -> RelayNotice {
        if let Some(notice) = self.buffered.pop_front() {
            return notice;
        }
        loop {
            match self.next_frame().await {
                Frame::Notification(notification) => {
                    return RelayNotice::from_notification(&notification).expect("decode notice");
                }
                Frame::Response(response) => {
                    panic!("unexpected response for id {}", response.id)
                }
                Frame::Request(_) => panic!("relay sent a request"),
            }
        }
    }

    /// Assert that nothing arrives within `window`.
    pub async fn expect_no_frame(&mut self, window: Duration) {
        assert!(
            self.buffered.is_empty(),
            "buffered notice when silence expected"
        );
        match timeout(window, self.ws.next()).await {
            Err(_) => {}
            Ok(None) => panic!("connection closed while expecting silence"),
            Ok(Some(frame)) => panic!("unexpected frame: {frame:?}"),
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    async fn next_frame(&mut self) -> Frame {
        loop {
            let message = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .expect("websocket error");
            match message {
                Message::Text(text) => return decode_frame(&text).expect("decode frame"),
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => panic!("relay closed the connection"),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }
}
