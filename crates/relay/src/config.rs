//! Relay server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Configuration for [`crate::RelayServer`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address. Port 0 picks an ephemeral port (used by tests).
    pub bind_addr: String,

    /// Capacity of each peer's outbound delivery queue. When a slow
    /// consumer fills its queue, further frames to it are dropped so
    /// other peer pairs are never blocked.
    pub channel_capacity: usize,

    /// How long a fresh connection may take to send its `relay.hello`
    /// before being dropped.
    pub hello_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9443".to_string(),
            channel_capacity: 128,
            hello_timeout: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    /// Validate ranges before the server starts.
    pub fn validate(&self) -> Result<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|e| RelayError::InvalidConfig(format!("bind_addr '{}': {e}", self.bind_addr)))?;

        if self.channel_capacity < 8 {
            return Err(RelayError::InvalidConfig(
                "channel_capacity must be at least 8".to_string(),
            ));
        }

        if self.hello_timeout < Duration::from_millis(100)
            || self.hello_timeout > Duration::from_secs(120)
        {
            return Err(RelayError::InvalidConfig(
                "hello_timeout must be between 100ms and 120s".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RelayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_bind_addr_rejected() {
        let config = RelayConfig::default().with_bind_addr("not-an-address");
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_tiny_channel_capacity_rejected() {
        let config = RelayConfig::default().with_channel_capacity(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_chaining() {
        let config = RelayConfig::default()
            .with_bind_addr("127.0.0.1:0")
            .with_channel_capacity(64)
            .with_hello_timeout(Duration::from_secs(2));
        assert_eq!(config.bind_addr, "127.0.0.1:0");
        assert_eq!(config.channel_capacity, 64);
        assert!(config.validate().is_ok());
    }
}
