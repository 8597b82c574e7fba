//! Relay configuration.
//!
//! Defaults match the production deployment; every value can be overridden
//! through an optional YAML file (`WSRELAY_CONFIG` points at it) and the
//! `LISTEN` / `UPSTREAM_URL` environment variables. Timing values are
//! configurable mostly so tests can shrink them.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::relay::buffer::OutagePolicy;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Address the listener binds to.
    pub listen_addr: ListenAddr,

    /// The single fixed upstream endpoint.
    pub upstream: UpstreamConfig,

    /// Per-session timing and outage behaviour.
    pub relay: RelayConfig,
}

/// Newtype so the listen address can carry its own default.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ListenAddr(pub String);

impl Default for ListenAddr {
    fn default() -> Self {
        ListenAddr("127.0.0.1:9001".to_string())
    }
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// WebSocket URL of the upstream service (`ws://` or `wss://`).
    pub url: String,

    /// `Origin` header value the upstream expects.
    pub origin: String,

    /// Identifying `User-Agent` string sent on the handshake.
    pub agent: String,

    /// Upstream handshake timeout in milliseconds.
    pub handshake_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9100/ws".to_string(),
            origin: "http://127.0.0.1:9100".to_string(),
            agent: concat!("wsrelay/", env!("CARGO_PKG_VERSION")).to_string(),
            handshake_timeout_ms: 10_000,
        }
    }
}

impl UpstreamConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Client liveness probe period in milliseconds.
    pub heartbeat_period_ms: u64,

    /// Fixed delay between upstream reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,

    /// Reconnect attempts before the upstream is declared unreachable.
    pub max_reconnect_attempts: u32,

    /// What to do with client frames while upstream is down.
    pub outage_policy: OutagePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: 30_000,
            reconnect_delay_ms: 5_000,
            max_reconnect_attempts: 5,
            outage_policy: OutagePolicy::Drop,
        }
    }
}

impl RelayConfig {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Config {
    /// Load configuration: YAML file if `WSRELAY_CONFIG` is set, then
    /// environment overrides, then validation.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("WSRELAY_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {path}"))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {path}"))?
            }
            Err(_) => Config::default(),
        };

        if let Ok(addr) = std::env::var("LISTEN") {
            cfg.listen_addr = ListenAddr(addr);
        }
        if let Ok(url) = std::env::var("UPSTREAM_URL") {
            cfg.upstream.url = url;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check invariants a running relay depends on.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.upstream.url)
            .with_context(|| format!("Invalid upstream URL: {}", self.upstream.url))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => anyhow::bail!("Upstream URL scheme must be ws or wss, got {other}"),
        }
        if self.relay.heartbeat_period_ms == 0 {
            anyhow::bail!("heartbeat_period_ms must be non-zero");
        }
        if self.relay.max_reconnect_attempts == 0 {
            anyhow::bail!("max_reconnect_attempts must be non-zero");
        }
        Ok(())
    }
}
