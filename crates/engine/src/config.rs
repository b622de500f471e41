//! Configuration types for the call engine

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::quality::QualityLevel;

/// Main configuration for CallEngine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// WebSocket relay URL (ws:// or wss://)
    pub relay_url: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Ring timeout in seconds (default: 30, range: 5-120)
    ///
    /// An unanswered outgoing or incoming call ends itself after this
    /// window and notifies the counterpart.
    pub ring_timeout_secs: u64,

    /// Event broadcast channel capacity (default: 64)
    pub event_capacity: usize,

    /// Per-session command and signal channel capacity (default: 32)
    pub channel_capacity: usize,

    /// RMS level above which the local peer counts as speaking (default: 0.05)
    pub speaking_threshold: f32,

    /// Voice activity sample interval in milliseconds (default: 300)
    pub speaking_interval_ms: u64,

    /// Screen share quality controller options
    pub quality: QualityOptions,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Quality controller options for the outbound screen-share track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityOptions {
    /// Pressure sample interval in milliseconds (default: 2000)
    pub sample_interval_ms: u64,

    /// Number of samples in the sliding window (default: 5, min: 2)
    pub window_size: usize,

    /// Windowed mean pressure above this steps quality down (default: 0.60)
    pub step_down_above: f64,

    /// Windowed mean pressure below this steps quality up (default: 0.25)
    pub step_up_below: f64,

    /// Level the controller starts at (default: Medium)
    pub initial_level: QualityLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:9443".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            ring_timeout_secs: 30,
            event_capacity: 64,
            channel_capacity: 32,
            speaking_threshold: 0.05,
            speaking_interval_ms: 300,
            quality: QualityOptions::default(),
        }
    }
}

impl Default for QualityOptions {
    fn default() -> Self {
        Self {
            sample_interval_ms: 2000,
            window_size: 5,
            step_down_above: 0.60,
            step_up_below: 0.25,
            initial_level: QualityLevel::Medium,
        }
    }
}

impl EngineConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `relay_url` is not a valid WebSocket URL
    /// - `stun_servers` is empty
    /// - `ring_timeout_secs` is not in range 5-120
    /// - channel capacities are below 8
    /// - `speaking_threshold` is not in range (0.0, 1.0)
    /// - quality thresholds are not ordered `0 < step_up < step_down < 1`
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if self.ring_timeout_secs < 5 || self.ring_timeout_secs > 120 {
            return Err(Error::InvalidConfig(format!(
                "ring_timeout_secs must be in range 5-120, got {}",
                self.ring_timeout_secs
            )));
        }

        if self.event_capacity < 8 || self.channel_capacity < 8 {
            return Err(Error::InvalidConfig(format!(
                "channel capacities must be at least 8, got event={} channel={}",
                self.event_capacity, self.channel_capacity
            )));
        }

        if self.speaking_threshold <= 0.0 || self.speaking_threshold >= 1.0 {
            return Err(Error::InvalidConfig(format!(
                "speaking_threshold must be in range (0.0, 1.0), got {}",
                self.speaking_threshold
            )));
        }

        if self.speaking_interval_ms < 50 || self.speaking_interval_ms > 5000 {
            return Err(Error::InvalidConfig(format!(
                "speaking_interval_ms must be in range 50-5000, got {}",
                self.speaking_interval_ms
            )));
        }

        self.quality.validate()
    }

    /// Ring timeout as a [`Duration`]
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    /// Voice activity sample interval as a [`Duration`]
    pub fn speaking_interval(&self) -> Duration {
        Duration::from_millis(self.speaking_interval_ms)
    }

    /// Create a configuration preset optimized for low latency
    ///
    /// Best when responsiveness matters more than screen-share fidelity.
    ///
    /// Settings:
    /// - Voice activity sampled every 200ms
    /// - Quality window of 3 samples, probed every second
    ///
    /// # Example
    ///
    /// ```
    /// use peercall_engine::config::EngineConfig;
    ///
    /// let config = EngineConfig::low_latency_preset("ws://localhost:9443");
    /// assert_eq!(config.speaking_interval_ms, 200);
    /// assert_eq!(config.quality.window_size, 3);
    /// ```
    pub fn low_latency_preset(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            speaking_interval_ms: 200,
            quality: QualityOptions {
                sample_interval_ms: 1000,
                window_size: 3,
                step_down_above: 0.60,
                step_up_below: 0.25,
                initial_level: QualityLevel::Medium,
            },
            ..Self::default()
        }
    }

    /// Create a configuration preset optimized for screen-share quality
    ///
    /// Starts sharing at the highest profile and tolerates more load
    /// before stepping down.
    ///
    /// # Example
    ///
    /// ```
    /// use peercall_engine::config::EngineConfig;
    /// use peercall_engine::quality::QualityLevel;
    ///
    /// let config = EngineConfig::high_quality_preset("ws://localhost:9443");
    /// assert_eq!(config.quality.initial_level, QualityLevel::High);
    /// ```
    pub fn high_quality_preset(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            quality: QualityOptions {
                sample_interval_ms: 3000,
                window_size: 8,
                step_down_above: 0.70,
                step_up_below: 0.25,
                initial_level: QualityLevel::High,
            },
            ..Self::default()
        }
    }

    /// Create a configuration preset optimized for mobile networks
    ///
    /// Rings longer to survive cellular handoffs, starts screen share at
    /// the lowest profile, and steps down eagerly. Requires TURN servers
    /// (set via `with_turn_servers()`) for symmetric NAT traversal.
    ///
    /// # Example
    ///
    /// ```
    /// use peercall_engine::config::{EngineConfig, TurnServerConfig};
    ///
    /// let config = EngineConfig::mobile_network_preset("ws://localhost:9443")
    ///     .with_turn_servers(vec![TurnServerConfig {
    ///         url: "turn:turn.example.com:3478".to_string(),
    ///         username: "user".to_string(),
    ///         credential: "pass".to_string(),
    ///     }]);
    /// assert_eq!(config.ring_timeout_secs, 45);
    /// ```
    pub fn mobile_network_preset(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(), // Backup STUN
            ],
            ring_timeout_secs: 45,
            quality: QualityOptions {
                sample_interval_ms: 2000,
                window_size: 5,
                step_down_above: 0.50,
                step_up_below: 0.20,
                initial_level: QualityLevel::Low,
            },
            ..Self::default()
        }
    }

    /// Add TURN servers to this configuration
    ///
    /// Useful for chaining with preset methods.
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Replace the STUN server list
    ///
    /// Useful for chaining with preset methods.
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Set the ring timeout in seconds
    ///
    /// Useful for chaining with preset methods.
    pub fn with_ring_timeout_secs(mut self, secs: u64) -> Self {
        self.ring_timeout_secs = secs;
        self
    }
}

impl QualityOptions {
    /// Validate quality controller parameters
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.window_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "quality window_size must be at least 2, got {}",
                self.window_size
            )));
        }

        if self.step_up_below <= 0.0
            || self.step_up_below >= self.step_down_above
            || self.step_down_above >= 1.0
        {
            return Err(Error::InvalidConfig(format!(
                "quality thresholds must satisfy 0 < step_up_below < step_down_above < 1, \
                 got up={} down={}",
                self.step_up_below, self.step_down_above
            )));
        }

        if self.sample_interval_ms < 250 || self.sample_interval_ms > 30000 {
            return Err(Error::InvalidConfig(format!(
                "quality sample_interval_ms must be in range 250-30000, got {}",
                self.sample_interval_ms
            )));
        }

        Ok(())
    }

    /// Pressure sample interval as a [`Duration`]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_stun_servers_fails() {
        let mut config = EngineConfig::default();
        config.stun_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_relay_url_fails() {
        let mut config = EngineConfig::default();
        config.relay_url = "http://localhost:9443".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_ring_timeout_fails() {
        let mut config = EngineConfig::default();
        config.ring_timeout_secs = 4;
        assert!(config.validate().is_err());

        config.ring_timeout_secs = 121;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_speaking_threshold_fails() {
        let mut config = EngineConfig::default();
        config.speaking_threshold = 0.0;
        assert!(config.validate().is_err());

        config.speaking_threshold = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unordered_quality_thresholds_fail() {
        let mut config = EngineConfig::default();
        config.quality.step_up_below = 0.70;
        config.quality.step_down_above = 0.60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.relay_url, deserialized.relay_url);
        assert_eq!(config.ring_timeout_secs, deserialized.ring_timeout_secs);
    }

    #[test]
    fn test_low_latency_preset() {
        let config = EngineConfig::low_latency_preset("ws://localhost:9443");
        assert!(config.validate().is_ok());
        assert_eq!(config.speaking_interval_ms, 200);
        assert_eq!(config.quality.sample_interval_ms, 1000);
        assert_eq!(config.quality.window_size, 3);
    }

    #[test]
    fn test_high_quality_preset() {
        let config = EngineConfig::high_quality_preset("ws://localhost:9443");
        assert!(config.validate().is_ok());
        assert_eq!(config.quality.initial_level, QualityLevel::High);
        assert_eq!(config.quality.window_size, 8);
    }

    #[test]
    fn test_mobile_network_preset() {
        let config = EngineConfig::mobile_network_preset("ws://localhost:9443");
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_timeout_secs, 45);
        assert_eq!(config.quality.initial_level, QualityLevel::Low);
        assert_eq!(config.stun_servers.len(), 2); // Backup STUN
    }

    #[test]
    fn test_preset_builder_chain() {
        let config = EngineConfig::mobile_network_preset("ws://localhost:9443")
            .with_turn_servers(vec![TurnServerConfig {
                url: "turn:turn.example.com:3478".to_string(),
                username: "user".to_string(),
                credential: "pass".to_string(),
            }])
            .with_ring_timeout_secs(60);
        assert!(config.validate().is_ok());
        assert_eq!(config.turn_servers.len(), 1);
        assert_eq!(config.ring_timeout_secs, 60);
    }
}
