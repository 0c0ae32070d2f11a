//! Connection manager.
//!
//! Owns the single authenticated transport to the backend and everything
//! bound to its lifetime:
//!
//! - a supervisor task that connects, reconnects with bounded backoff, and
//!   stops for good on an authentication failure
//! - the session loop that writes queued frames, sends keepalive pings, and
//!   routes every inbound frame (responses to the pending table, requests
//!   and notifications to the dispatcher, legacy events to the command bus)
//! - the observable [`ConnectionStatus`], published on a `watch` channel
//!
//! State machine:
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!      ▲                          │                 │ transport lost
//!      │ auth failure /           ▼                 ▼
//!      └── attempts exhausted ─ Reconnecting ◀──────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tether_core::ids::IdGenerator;
use tether_rpc::{
    CommandBus, Dispatcher, Frame, FrameError, HandlerRegistry, RpcErrorObject, RpcResponse, errors,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{CallError, RpcClient};
use crate::config::ConnectionConfig;
use crate::metrics as names;
use crate::pending::PendingRequests;
use crate::transport::{Connector, Transport, TransportError, TransportFrame};

/// Lower bound on the keepalive period.
const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for the close frame to flush on disconnect.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle phase of the connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no attempt in progress.
    #[default]
    Disconnected,
    /// First connect attempt in progress.
    Connecting,
    /// Transport open.
    Connected,
    /// Waiting to retry after a failure or a lost transport.
    Reconnecting,
}

/// Snapshot of the connection's observable state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Lifecycle phase.
    pub state: ConnectionState,
    /// Whether outbound calls can be sent right now.
    pub is_connected: bool,
    /// Set when the backend refused the credentials. Cleared only by a
    /// successful connect.
    pub has_auth_error: bool,
    /// Most recent connect or transport error.
    pub last_error: Option<String>,
    /// Consecutive failed connect attempts since the last success.
    pub reconnect_attempts: u32,
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

enum SessionEnd {
    Cancelled,
    Lost(String),
}

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    commands: Arc<CommandBus>,
    pending: PendingRequests,
    ids: IdGenerator,
    status: watch::Sender<ConnectionStatus>,
    /// Writer queue of the live session, if any.
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    session: Mutex<Option<Session>>,
}

/// Handle to the command channel. Cheap to clone; all clones share one
/// transport.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a disconnected connection with empty handler tables.
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_handlers(
            config,
            connector,
            Arc::new(HandlerRegistry::new()),
            Arc::new(CommandBus::new()),
        )
    }

    /// Create a disconnected connection over existing handler tables.
    pub fn with_handlers(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        registry: Arc<HandlerRegistry>,
        commands: Arc<CommandBus>,
    ) -> Self {
        let dispatcher = Dispatcher::new(registry).with_handler_timeout(config.handler_timeout);
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                dispatcher,
                commands,
                pending: PendingRequests::new(),
                ids: IdGenerator::new(),
                status,
                outbound: Mutex::new(None),
                session: Mutex::new(None),
            }),
        }
    }

    /// Start connecting with `token`.
    ///
    /// Does nothing when a session is already connecting, connected, or
    /// reconnecting. A missing or blank token is logged and ignored.
    pub fn connect(&self, token: Option<&str>) {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            warn!("no auth token available, not connecting");
            return;
        };

        let mut session = self.inner.session.lock();
        let state = self.state();
        if state != ConnectionState::Disconnected {
            debug!(?state, "connect ignored, session already active");
            return;
        }
        // A supervisor that stopped on its own leaves its handle behind.
        if let Some(stale) = session.take() {
            stale.cancel.cancel();
        }

        self.inner
            .status
            .send_modify(|s| s.state = ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            self.inner.clone(),
            token.to_owned(),
            cancel.clone(),
        ));
        *session = Some(Session { cancel, task });
    }

    /// Close the transport and stop reconnecting.
    ///
    /// Pending calls are rejected with [`CallError::Disconnected`]. Safe to
    /// call in any state, any number of times.
    pub async fn disconnect(&self) {
        let session = self.inner.session.lock().take();
        if let Some(Session { cancel, task }) = session {
            cancel.cancel();
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("connection supervisor panicked");
                }
            }
            info!("disconnected");
        }

        *self.inner.outbound.lock() = None;
        let rejected = self.inner.pending.reject_all(|| CallError::Disconnected);
        if rejected > 0 {
            debug!(rejected, "rejected pending calls on disconnect");
        }
        self.inner.status.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.is_connected = false;
        });
        gauge!(names::CONNECTED).set(0.0);
    }

    /// Current status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state
    }

    /// Whether outbound calls can be sent right now.
    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().is_connected
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Inbound method handlers. May be changed while connected.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.inner.dispatcher.registry()
    }

    /// Legacy command handlers. May be changed while connected.
    pub fn commands(&self) -> &Arc<CommandBus> {
        &self.inner.commands
    }

    /// Outbound calls awaiting a response.
    pub fn pending(&self) -> &PendingRequests {
        &self.inner.pending
    }

    /// Runtime configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// An outbound client bound to this connection.
    pub fn client(&self) -> RpcClient {
        RpcClient::new(self.clone())
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.inner.ids.next_id()
    }

    /// Queue a text frame on the live session. Returns `false` when there is
    /// no session or it ended before taking the frame.
    pub(crate) async fn enqueue(&self, text: String) -> bool {
        let tx = self.inner.outbound.lock().clone();
        match tx {
            Some(tx) => tx.send(text).await.is_ok(),
            None => false,
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// Record a failed connect attempt. Returns the new failure count.
    fn connect_failed(&self, err: &TransportError) -> u32 {
        let auth = err.is_auth_failure();
        let reason = if auth { "auth" } else { "transport" };
        counter!(names::CONNECT_FAILURES_TOTAL, "reason" => reason).increment(1);

        let mut attempts = 0;
        self.status.send_modify(|s| {
            s.is_connected = false;
            s.reconnect_attempts = s.reconnect_attempts.saturating_add(1);
            s.last_error = Some(err.to_string());
            if auth {
                s.has_auth_error = true;
            }
            attempts = s.reconnect_attempts;
        });
        attempts
    }

    fn connected(&self) {
        self.status.send_modify(|s| {
            s.state = ConnectionState::Connected;
            s.is_connected = true;
            s.has_auth_error = false;
            s.last_error = None;
            s.reconnect_attempts = 0;
        });
        counter!(names::CONNECTS_TOTAL).increment(1);
        gauge!(names::CONNECTED).set(1.0);
        info!(url = %self.config.url, "connected");
    }

    fn connection_lost(&self, reason: String) {
        warn!(reason = %reason, "connection lost");
        counter!(names::DISCONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTED).set(0.0);
        self.status.send_modify(|s| {
            s.state = ConnectionState::Reconnecting;
            s.is_connected = false;
            s.last_error = Some(reason);
        });
        let rejected = self.pending.reject_all(|| CallError::ConnectionLost);
        if rejected > 0 {
            debug!(rejected, "rejected pending calls after connection loss");
        }
    }

    /// Classify one inbound text frame and hand it to its consumer.
    fn route(&self, text: &str, replies: &mpsc::Sender<String>) {
        match Frame::parse(text) {
            Ok(Frame::Response(response)) => {
                let id = response.id.clone();
                if !self.pending.settle(response) {
                    counter!(names::UNMATCHED_RESPONSES_TOTAL).increment(1);
                    debug!(%id, "no pending call for response, dropping");
                }
            }
            Ok(Frame::Request(request)) => {
                debug!(method = %request.method, id = %request.id, "inbound request");
                let dispatcher = self.dispatcher.clone();
                let replies = replies.clone();
                drop(tokio::spawn(async move {
                    let response = dispatcher.dispatch(request).await;
                    send_response(&replies, &response).await;
                }));
            }
            Ok(Frame::Notification(notification)) => {
                debug!(method = %notification.method, "inbound notification");
                let dispatcher = self.dispatcher.clone();
                drop(tokio::spawn(async move {
                    dispatcher.notify(notification).await;
                }));
            }
            Ok(Frame::Legacy(command)) => {
                debug!(command = %command.name, "legacy command");
                let commands = self.commands.clone();
                drop(tokio::spawn(async move {
                    let _ = commands.dispatch(command).await;
                }));
            }
            Err(FrameError::InvalidRequest { id, reason }) => {
                counter!(names::MALFORMED_FRAMES_TOTAL).increment(1);
                warn!(%id, reason = %reason, "rejecting invalid request");
                let response = RpcResponse::failure(
                    id,
                    RpcErrorObject::new(errors::INVALID_REQUEST, format!("Invalid request: {reason}")),
                );
                let replies = replies.clone();
                drop(tokio::spawn(async move {
                    send_response(&replies, &response).await;
                }));
            }
            Err(e) => {
                counter!(names::MALFORMED_FRAMES_TOTAL).increment(1);
                warn!(code = e.code(), error = %e, "dropping unroutable frame");
            }
        }
    }
}

async fn send_response(replies: &mpsc::Sender<String>, response: &RpcResponse) {
    match serde_json::to_string(response) {
        Ok(json) => {
            if replies.send(json).await.is_err() {
                debug!(id = %response.id, "session ended before response was sent");
            }
        }
        Err(e) => error!(id = %response.id, error = %e, "failed to serialize response"),
    }
}

/// Connect, run sessions, and reconnect until cancelled, out of attempts, or
/// refused for bad credentials.
#[instrument(skip_all, fields(url = %inner.config.url))]
async fn supervise(inner: Arc<Inner>, token: String, cancel: CancellationToken) {
    let policy = inner.config.reconnect.clone();

    loop {
        let attempt = tokio::select! {
            () = cancel.cancelled() => return,
            result = inner.connector.connect(&inner.config.url, &token) => result,
        };

        let delay = match attempt {
            Ok(transport) => match run_session(&inner, transport, &cancel).await {
                SessionEnd::Cancelled => return,
                SessionEnd::Lost(reason) => {
                    inner.connection_lost(reason);
                    policy.delay_for(1)
                }
            },
            Err(err) => {
                let failed = inner.connect_failed(&err);
                if err.is_auth_failure() {
                    error!(error = %err, "authentication rejected, not retrying");
                    inner.set_state(ConnectionState::Disconnected);
                    return;
                }
                if !policy.should_retry(failed) {
                    warn!(attempts = failed, error = %err, "giving up after repeated connect failures");
                    inner.set_state(ConnectionState::Disconnected);
                    return;
                }
                inner.set_state(ConnectionState::Reconnecting);
                let delay = policy.delay_for(failed);
                warn!(
                    attempt = failed,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "connect failed, retrying"
                );
                delay
            }
        };

        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Drive one open transport until it is lost or the session is cancelled.
async fn run_session(inner: &Inner, transport: Transport, cancel: &CancellationToken) -> SessionEnd {
    let Transport {
        mut sink,
        mut stream,
    } = transport;
    let (tx, mut rx) = mpsc::channel::<String>(inner.config.outbound_queue.max(1));
    *inner.outbound.lock() = Some(tx.clone());
    inner.connected();
    let started = Instant::now();

    let mut ping = tokio::time::interval(inner.config.ping_interval.max(MIN_PING_INTERVAL));
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    let _ = ping.tick().await;
    let mut last_inbound = Instant::now();

    let end = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_GRACE, async {
                    let _ = sink.send(TransportFrame::Close).await;
                    let _ = sink.close().await;
                })
                .await;
                break SessionEnd::Cancelled;
            }
            Some(text) = rx.recv() => {
                if let Err(e) = sink.send(TransportFrame::Text(text)).await {
                    break SessionEnd::Lost(format!("write failed: {e}"));
                }
            }
            _ = ping.tick() => {
                if last_inbound.elapsed() >= inner.config.pong_timeout {
                    warn!(timeout = ?inner.config.pong_timeout, "no traffic from server, dropping transport");
                    break SessionEnd::Lost("keepalive timed out".into());
                }
                if let Err(e) = sink.send(TransportFrame::Ping(Vec::new())).await {
                    break SessionEnd::Lost(format!("ping failed: {e}"));
                }
            }
            frame = stream.next() => {
                let frame = match frame {
                    None => break SessionEnd::Lost("connection closed by server".into()),
                    Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                    Some(Ok(frame)) => frame,
                };
                last_inbound = Instant::now();
                match frame {
                    TransportFrame::Text(text) => inner.route(&text, &tx),
                    TransportFrame::Binary(data) => match String::from_utf8(data) {
                        Ok(text) => inner.route(&text, &tx),
                        Err(e) => debug!(len = e.as_bytes().len(), "ignoring non-UTF8 binary frame"),
                    },
                    TransportFrame::Ping(_) | TransportFrame::Pong(_) => {}
                    TransportFrame::Close => break SessionEnd::Lost("server closed the connection".into()),
                }
            }
        }
    };

    *inner.outbound.lock() = None;
    drop(rx);
    histogram!("channel_session_duration_seconds").record(started.elapsed().as_secs_f64());
    end
}
