//! Runtime configuration of a [`crate::Connection`].

use std::time::Duration;

use tether_core::backoff::ReconnectPolicy;
use tether_settings::ChannelSettings;

/// Knobs the connection manager reads at runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Backend endpoint.
    pub url: String,
    /// Reconnection bounds.
    pub reconnect: ReconnectPolicy,
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Inbound silence tolerated before the transport is considered dead.
    pub pong_timeout: Duration,
    /// Upper bound on one inbound handler run.
    pub handler_timeout: Duration,
    /// Timeout for outbound calls that don't specify one.
    pub default_call_timeout: Duration,
    /// Capacity of the outbound frame queue.
    pub outbound_queue: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&ChannelSettings::default())
    }
}

impl From<&ChannelSettings> for ConnectionConfig {
    fn from(settings: &ChannelSettings) -> Self {
        Self {
            url: settings.url.clone(),
            reconnect: settings.reconnect.clone(),
            ping_interval: settings.ping_interval(),
            pong_timeout: settings.pong_timeout(),
            handler_timeout: settings.handler_timeout(),
            default_call_timeout: settings.default_call_timeout(),
            outbound_queue: settings.outbound_queue.max(1),
        }
    }
}
