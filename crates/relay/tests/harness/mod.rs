//! Shared fixtures for relay integration tests.

pub mod client;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;

use peercall_relay::{RelayConfig, RelayHandle, RelayServer};

// ============================================================================
// Relay fixture
// ============================================================================

/// A relay bound to an ephemeral port, running in a background task.
pub struct RelayFixture {
    pub addr: SocketAddr,
    handle: RelayHandle,
    task: JoinHandle<peercall_relay::Result<()>>,
}

pub async fn start_relay() -> RelayFixture {
    let config = RelayConfig::default()
        .with_bind_addr("127.0.0.1:0")
        .with_hello_timeout(Duration::from_secs(2));
    let server = RelayServer::bind(config).await.expect("bind relay");
    let addr = server.local_addr().expect("local addr");
    let handle = server.handle();
    let task = tokio::spawn(server.run());
    RelayFixture { addr, handle, task }
}

impl RelayFixture {
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn stop(self) {
        self.handle.shutdown();
        let _ = self.task.await;
    }
}
