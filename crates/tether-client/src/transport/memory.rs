//! In-process transport.
//!
//! [`pair`] returns a client-side [`Transport`] and the [`MemoryPeer`]
//! standing in for the backend. [`duplex`] joins two transports so two
//! connections can talk to each other. [`MemoryConnector`] hands out scripted
//! connect results in order, which lets tests drive handshake failures,
//! reconnects, and auth rejection without a network.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

use super::{Connector, Transport, TransportError, TransportFrame};

const CHANNEL_CAPACITY: usize = 64;

/// Backend side of an in-memory transport.
///
/// Dropping the peer ends the client's inbound stream, which the client
/// sees as a lost connection.
pub struct MemoryPeer {
    to_client: mpsc::Sender<Result<TransportFrame, TransportError>>,
    from_client: mpsc::Receiver<TransportFrame>,
}

/// Create a connected client transport and its peer.
pub fn pair() -> (Transport, MemoryPeer) {
    let (to_client, client_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (client_tx, from_client) = mpsc::channel(CHANNEL_CAPACITY);

    let sink = PollSender::new(client_tx).sink_map_err(|_| TransportError::Closed);
    let stream = ReceiverStream::new(client_rx);

    let transport = Transport::new(Box::pin(sink), Box::pin(stream));
    let peer = MemoryPeer {
        to_client,
        from_client,
    };
    (transport, peer)
}

/// Two transports wired back to back.
pub fn duplex() -> (Transport, Transport) {
    let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
    (half(a_tx, b_rx), half(b_tx, a_rx))
}

fn half(tx: mpsc::Sender<TransportFrame>, rx: mpsc::Receiver<TransportFrame>) -> Transport {
    let sink = PollSender::new(tx).sink_map_err(|_| TransportError::Closed);
    let stream = ReceiverStream::new(rx).map(Ok::<_, TransportError>);
    Transport::new(Box::pin(sink), Box::pin(stream))
}

impl MemoryPeer {
    /// Push a frame to the client. Returns `false` once the client is gone.
    pub async fn send(&self, frame: TransportFrame) -> bool {
        self.to_client.send(Ok(frame)).await.is_ok()
    }

    /// Push a text frame.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(TransportFrame::Text(text.into())).await
    }

    /// Serialize and push a JSON value as a text frame.
    pub async fn send_json(&self, value: &Value) -> bool {
        self.send_text(value.to_string()).await
    }

    /// Inject a transport error into the client's inbound stream.
    pub async fn fail(&self, error: TransportError) -> bool {
        self.to_client.send(Err(error)).await.is_ok()
    }

    /// Next frame from the client, or `None` once the client hung up.
    pub async fn recv(&mut self) -> Option<TransportFrame> {
        self.from_client.recv().await
    }

    /// Next text frame parsed as JSON, skipping keepalive frames.
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            match self.recv().await? {
                TransportFrame::Text(text) => return serde_json::from_str(&text).ok(),
                TransportFrame::Ping(_) | TransportFrame::Pong(_) => {}
                TransportFrame::Binary(_) | TransportFrame::Close => return None,
            }
        }
    }
}

/// Connector that replays a script of connect results.
///
/// Once the script runs out every attempt fails with an I/O error.
#[derive(Default)]
pub struct MemoryConnector {
    script: Mutex<VecDeque<Result<Transport, TransportError>>>,
    tokens: Mutex<Vec<String>>,
}

impl MemoryConnector {
    /// Create a connector with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful connect and return the backend side of it.
    pub fn accept(&self) -> MemoryPeer {
        let (transport, peer) = pair();
        self.script.lock().push_back(Ok(transport));
        peer
    }

    /// Queue a successful connect yielding `transport`.
    pub fn push(&self, transport: Transport) {
        self.script.lock().push_back(Ok(transport));
    }

    /// Queue a failed connect.
    pub fn reject(&self, error: TransportError) {
        self.script.lock().push_back(Err(error));
    }

    /// Number of connect attempts made so far.
    pub fn attempts(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Tokens presented on each attempt, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _url: &str, token: &str) -> Result<Transport, TransportError> {
        self.tokens.lock().push(token.to_owned());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Io("connection refused".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_carries_frames_both_ways() {
        let (mut transport, mut peer) = pair();

        transport
            .sink
            .send(TransportFrame::Text(r#"{"a":1}"#.into()))
            .await
            .unwrap();
        assert_eq!(peer.recv_json().await.unwrap()["a"], 1);

        assert!(peer.send_text("hello").await);
        let frame = transport.stream.next().await.unwrap().unwrap();
        assert_eq!(frame, TransportFrame::Text("hello".into()));
    }

    #[tokio::test]
    async fn duplex_halves_see_each_other() {
        let (mut a, mut b) = duplex();
        a.sink.send(TransportFrame::Text("ping".into())).await.unwrap();
        assert_eq!(
            b.stream.next().await.unwrap().unwrap(),
            TransportFrame::Text("ping".into())
        );
        drop(a);
        assert!(b.stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_peer_ends_stream() {
        let (mut transport, peer) = pair();
        drop(peer);
        assert!(transport.stream.next().await.is_none());
        assert!(transport.sink.send(TransportFrame::Close).await.is_err());
    }

    #[tokio::test]
    async fn connector_replays_script_then_refuses() {
        let connector = MemoryConnector::new();
        connector.reject(TransportError::Rejected {
            status: 503,
            reason: "Service Unavailable".into(),
        });
        let _peer = connector.accept();

        assert!(connector.connect("mem://", "t1").await.is_err());
        assert!(connector.connect("mem://", "t2").await.is_ok());
        let err = connector.connect("mem://", "t3").await.err().unwrap();
        assert!(matches!(err, TransportError::Io(_)));
        assert_eq!(connector.attempts(), 3);
        assert_eq!(connector.tokens(), vec!["t1", "t2", "t3"]);
    }
}
