//! Transport abstraction.
//!
//! A [`Connector`] opens one authenticated duplex channel of
//! [`TransportFrame`]s. The connection manager only sees this trait, so the
//! WebSocket implementation ([`ws::WsConnector`]) and the in-process one used
//! by tests ([`memory::MemoryConnector`]) are interchangeable.

pub mod memory;
pub mod ws;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

/// One frame on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Keepalive probe.
    Ping(Vec<u8>),
    /// Keepalive answer.
    Pong(Vec<u8>),
    /// Orderly close.
    Close,
}

/// Errors opening or using a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server answered the handshake with a non-upgrade status.
    #[error("handshake rejected with status {status}: {reason}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Reason phrase or body excerpt.
        reason: String,
    },
    /// The handshake failed for another reason.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Network-level failure.
    #[error("transport I/O error: {0}")]
    Io(String),
    /// The transport is already closed.
    #[error("transport closed")]
    Closed,
    /// The endpoint URL cannot be used.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Whether this error means the credentials were refused.
    ///
    /// Auth failures are terminal: the connection manager stops retrying.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Rejected { status, reason } => {
                matches!(status, 401 | 403) || mentions_auth(reason)
            }
            Self::Handshake(message) | Self::Io(message) => mentions_auth(message),
            Self::Closed | Self::InvalidUrl(_) => false,
        }
    }
}

fn mentions_auth(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["unauthorized", "authentication", "invalid token", "jwt"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Outbound half of a transport.
pub type FrameSink = Pin<Box<dyn Sink<TransportFrame, Error = TransportError> + Send>>;

/// Inbound half of a transport. The stream ends when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<TransportFrame, TransportError>> + Send>>;

/// An open duplex channel.
pub struct Transport {
    /// Frames to the server.
    pub sink: FrameSink,
    /// Frames from the server.
    pub stream: FrameStream,
}

impl Transport {
    /// Assemble a transport from its halves.
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens transports to the backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `url`, presenting `token` during the handshake.
    async fn connect(&self, url: &str, token: &str) -> Result<Transport, TransportError>;
}
