//! Accept loop and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::handler::{handle_connection, SharedState};

/// Handle for requesting shutdown from outside the accept loop.
#[derive(Clone)]
pub struct RelayHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayHandle {
    /// Ask the server to stop accepting and return from [`RelayServer::run`].
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// The signaling relay server.
///
/// Binding and running are separate steps so callers can learn the
/// bound address (tests bind port 0) before the accept loop starts.
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<SharedState>,
    shutdown_tx: broadcast::Sender<()>,
    // Subscribed at bind time so a shutdown issued before the accept
    // loop first polls is still observed rather than sent to nobody.
    shutdown_rx: broadcast::Receiver<()>,
}

impl RelayServer {
    /// Validate the config and bind the listen socket.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|e| RelayError::Bind {
                addr: config.bind_addr.clone(),
                source: e,
            })?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            listener,
            state: Arc::new(SharedState::new(config)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Accept connections until shutdown is requested.
    ///
    /// Each connection runs in its own task; a connection error never
    /// stops the accept loop.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx;
        info!(addr = %self.listener.local_addr()?, "relay listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(handle_connection(state, stream, addr));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    let connected = self.state.peer_count().await;
                    info!(connected, "relay shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let config = RelayConfig::default().with_bind_addr("127.0.0.1:0");
        let server = RelayServer::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let handle = server.handle();
        let task = tokio::spawn(server.run());
        handle.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_bind() {
        let config = RelayConfig::default().with_channel_capacity(1);
        let err = RelayServer::bind(config)
            .await
            .err()
            .expect("invalid config must be refused");
        assert!(matches!(err, RelayError::InvalidConfig(_)));
    }
}
