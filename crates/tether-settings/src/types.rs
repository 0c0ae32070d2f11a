//! Settings types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::backoff::ReconnectPolicy;

/// Configuration for one command channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Backend WebSocket endpoint.
    pub url: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Reconnection bounds and delays.
    pub reconnect: ReconnectPolicy,
    /// Interval between client Ping frames.
    pub ping_interval_ms: u64,
    /// Drop the transport after this long without inbound traffic.
    pub pong_timeout_ms: u64,
    /// Upper bound on a single inbound handler run.
    pub handler_timeout_ms: u64,
    /// Timeout applied to outbound calls that don't name one.
    pub default_call_timeout_ms: u64,
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".into(),
            log_level: "info".into(),
            reconnect: ReconnectPolicy::default(),
            ping_interval_ms: 25_000,
            pong_timeout_ms: 60_000,
            handler_timeout_ms: 60_000,
            default_call_timeout_ms: 30_000,
            outbound_queue: 256,
        }
    }
}

impl ChannelSettings {
    /// Ping interval as a `Duration`.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Pong timeout as a `Duration`.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    /// Handler timeout as a `Duration`.
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    /// Default outbound call timeout as a `Duration`.
    pub fn default_call_timeout(&self) -> Duration {
        Duration::from_millis(self.default_call_timeout_ms)
    }
}
