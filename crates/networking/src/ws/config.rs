//! WebSocket connection configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the portal WebSocket connection.
///
/// Reconnection uses a fixed, bounded interval with jitter rather than
/// exponential backoff: drops are expected to be short, and the jitter
/// keeps a fleet of clients from reconnecting in lockstep after a server
/// restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// WebSocket endpoint URL
    pub url: String,

    /// Connection/handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Whether automatic reconnection is enabled
    #[serde(default = "default_reconnect_enabled")]
    pub reconnect_enabled: bool,

    /// Base reconnection interval in milliseconds
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Jitter applied to the reconnect interval, as a fraction of the base
    /// (0.2 = ±20%)
    #[serde(default = "default_reconnect_jitter")]
    pub reconnect_jitter: f64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_reconnect_interval_ms() -> u64 {
    3_000
}

fn default_reconnect_jitter() -> f64 {
    0.2
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_enabled: default_reconnect_enabled(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            reconnect_jitter: default_reconnect_jitter(),
        }
    }
}

impl WsConfig {
    pub fn builder() -> WsConfigBuilder {
        WsConfigBuilder::default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Next reconnect delay: the base interval with jitter applied
    pub fn jittered_reconnect_delay(&self) -> Duration {
        use rand::Rng;

        let base = self.reconnect_interval_ms as f64;
        let spread = base * self.reconnect_jitter.clamp(0.0, 1.0);
        let delay = if spread > 0.0 {
            base + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            base
        };
        Duration::from_millis(delay.max(0.0) as u64)
    }
}

/// Builder for [`WsConfig`]
#[derive(Debug, Default)]
pub struct WsConfigBuilder {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    reconnect_enabled: Option<bool>,
    reconnect_interval_ms: Option<u64>,
    reconnect_jitter: Option<f64>,
}

impl WsConfigBuilder {
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn reconnect_enabled(mut self, enabled: bool) -> Self {
        self.reconnect_enabled = Some(enabled);
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = Some(jitter);
        self
    }

    pub fn build(self) -> WsConfig {
        WsConfig {
            url: self.url.unwrap_or_default(),
            connect_timeout_ms: self
                .connect_timeout_ms
                .unwrap_or_else(default_connect_timeout_ms),
            reconnect_enabled: self
                .reconnect_enabled
                .unwrap_or_else(default_reconnect_enabled),
            reconnect_interval_ms: self
                .reconnect_interval_ms
                .unwrap_or_else(default_reconnect_interval_ms),
            reconnect_jitter: self
                .reconnect_jitter
                .unwrap_or_else(default_reconnect_jitter),
        }
    }
}
