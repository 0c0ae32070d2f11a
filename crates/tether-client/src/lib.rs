//! # tether-client
//!
//! Client side of the Tether command channel: one authenticated WebSocket
//! carrying JSON-RPC calls in both directions plus legacy one-way commands.
//!
//! - [`Connection`]: connect / reconnect / disconnect, keepalive, and
//!   inbound frame routing
//! - [`RpcClient`]: outbound calls with per-call timeouts
//! - [`PendingRequests`]: in-flight outbound calls keyed by request id
//! - [`transport`]: the [`Connector`] seam with WebSocket and in-memory
//!   implementations
//! - [`catalog`]: method and event names with default timeouts

#![deny(unsafe_code)]

pub mod catalog;
pub mod client;
pub mod config;
pub mod connection;
pub mod metrics;
pub mod pending;
pub mod transport;

pub use catalog::MethodSpec;
pub use client::{CallError, RpcClient};
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState, ConnectionStatus};
pub use pending::PendingRequests;
pub use transport::memory::{MemoryConnector, MemoryPeer};
pub use transport::ws::WsConnector;
pub use transport::{Connector, Transport, TransportError, TransportFrame};
