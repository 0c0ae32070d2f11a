//! End-to-end channel tests over the in-memory transport.
//!
//! Two `Connection`s joined by `memory::duplex` play client and backend, so
//! outbound calls on one side are serviced by the registry on the other.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout};

use tether_client::transport::memory;
use tether_client::{
    CallError, Connection, ConnectionConfig, ConnectionState, ConnectionStatus, MemoryConnector,
    MemoryPeer, TransportError,
};
use tether_core::backoff::ReconnectPolicy;
use tether_rpc::{CommandError, HandlerError, MethodHandler, errors};

const TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> ConnectionConfig {
    ConnectionConfig {
        url: "ws://backend.test/ws".into(),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            base_delay_ms: 200,
            ..ReconnectPolicy::default()
        },
        ..ConnectionConfig::default()
    }
}

async fn wait_for(
    conn: &Connection,
    pred: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut rx: watch::Receiver<ConnectionStatus> = conn.subscribe();
    timeout(TIMEOUT, rx.wait_for(pred))
        .await
        .expect("status never reached")
        .expect("status channel closed")
        .clone()
}

/// Client and backend connections joined back to back, both connected.
async fn linked() -> (Connection, Connection) {
    let (client_side, backend_side) = memory::duplex();

    let client_connector = Arc::new(MemoryConnector::new());
    client_connector.push(client_side);
    let backend_connector = Arc::new(MemoryConnector::new());
    backend_connector.push(backend_side);

    let client = Connection::new(config(), client_connector);
    let backend = Connection::new(config(), backend_connector);
    client.connect(Some("client-token"));
    backend.connect(Some("backend-token"));
    let _ = wait_for(&client, |s| s.is_connected).await;
    let _ = wait_for(&backend, |s| s.is_connected).await;
    (client, backend)
}

/// A connected client whose backend is a raw peer.
async fn with_peer() -> (Connection, MemoryPeer) {
    let connector = Arc::new(MemoryConnector::new());
    let peer = connector.accept();
    let conn = Connection::new(config(), connector);
    conn.connect(Some("tok"));
    let _ = wait_for(&conn, |s| s.is_connected).await;
    (conn, peer)
}

// ── Example scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn call_resolves_with_remote_handler_result() {
    let (client, backend) = linked().await;
    backend.registry().register_fn("getUiContext", |_| async {
        Ok::<_, HandlerError>(json!({"route": "/admin"}))
    });

    let started = Instant::now();
    let result = client
        .client()
        .call("getUiContext", None, None)
        .await
        .unwrap();
    assert_eq!(result, json!({"route": "/admin"}));
    assert!(started.elapsed() < Duration::from_secs(1));

    client.disconnect().await;
    backend.disconnect().await;
}

#[tokio::test]
async fn unregistered_method_yields_method_not_found() {
    let (client, backend) = linked().await;

    let err = client
        .client()
        .call("showNotification", Some(json!({"message": "hi"})), None)
        .await
        .unwrap_err();
    assert_matches!(err, CallError::Remote { code, message, .. } => {
        assert_eq!(code, errors::METHOD_NOT_FOUND);
        assert_eq!(message, "Method not found: showNotification");
    });
    // The channel stays healthy.
    assert!(client.is_connected());
    assert!(backend.is_connected());

    client.disconnect().await;
    backend.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out_and_leaves_no_entry() {
    let (conn, mut peer) = with_peer().await;
    let client = conn.client();

    let started = Instant::now();
    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call("slowOp", Some(json!({})), Some(Duration::from_millis(100)))
                .await
        }
    });
    let request = peer.recv_json().await.unwrap();
    assert_eq!(request["method"], "slowOp");

    let err = call.await.unwrap().unwrap_err();
    assert_matches!(err, CallError::Timeout { timeout_ms: 100, .. });
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(conn.pending().is_empty());

    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_token_stops_reconnecting() {
    let connector = Arc::new(MemoryConnector::new());
    connector.reject(TransportError::Handshake("invalid token".into()));
    let conn = Connection::new(config(), connector.clone());

    conn.connect(Some("stale"));
    let status = wait_for(&conn, |s| {
        s.has_auth_error && s.state == ConnectionState::Disconnected
    })
    .await;
    assert!(!status.is_connected);
    assert!(status.last_error.unwrap().contains("invalid token"));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 1);

    // A fresh token is an explicit new connect.
    let _peer = connector.accept();
    conn.connect(Some("fresh"));
    let status = wait_for(&conn, |s| s.is_connected).await;
    assert!(!status.has_auth_error);
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(connector.tokens(), vec!["stale", "fresh"]);

    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn out_of_order_response_settles_only_its_call() {
    let (conn, mut peer) = with_peer().await;
    let client = conn.client();

    let call_a = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call("loadWorkspaceFile", Some(json!({"path": "a"})), Some(Duration::from_secs(2)))
                .await
        }
    });
    let req_a = peer.recv_json().await.unwrap();
    let call_b = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .call("loadWorkspaceFile", Some(json!({"path": "b"})), Some(Duration::from_secs(2)))
                .await
        }
    });
    let req_b = peer.recv_json().await.unwrap();
    assert_ne!(req_a["id"], req_b["id"]);

    let _ = peer
        .send_json(&json!({"jsonrpc": "2.0", "id": req_b["id"], "result": "B"}))
        .await;
    assert_eq!(call_b.await.unwrap().unwrap(), json!("B"));

    assert!(!call_a.is_finished());
    assert_eq!(conn.pending().len(), 1);

    assert_matches!(call_a.await.unwrap(), Err(CallError::Timeout { .. }));
    assert!(conn.pending().is_empty());
    conn.disconnect().await;
}

// ── Inbound dispatch over the wire ──────────────────────────────────

struct PanickingHandler;

#[async_trait]
impl MethodHandler for PanickingHandler {
    async fn handle(&self, _params: Option<Value>) -> Result<Value, HandlerError> {
        panic!("handler bug");
    }
}

#[tokio::test]
async fn every_inbound_request_gets_exactly_one_response() {
    let (conn, mut peer) = with_peer().await;
    conn.registry().register_fn("ok", |params| async move {
        Ok::<_, HandlerError>(params.unwrap_or(Value::Null))
    });
    conn.registry().register_fn("fails", |_| async {
        Err::<Value, _>(HandlerError::internal("disk full"))
    });
    conn.registry().register("panics", PanickingHandler);

    for (id, method) in [(1, "ok"), (2, "fails"), (3, "panics"), (4, "missing")] {
        let _ = peer
            .send_json(&json!({"jsonrpc": "2.0", "method": method, "params": {"n": id}, "id": id}))
            .await;
    }

    let mut by_id = std::collections::HashMap::new();
    for _ in 0..4 {
        let reply = timeout(TIMEOUT, peer.recv_json()).await.unwrap().unwrap();
        let id = reply["id"].as_i64().unwrap();
        assert!(by_id.insert(id, reply).is_none(), "duplicate response for {id}");
    }

    assert_eq!(by_id[&1]["result"]["n"], 1);
    assert_eq!(by_id[&2]["error"]["code"], errors::INTERNAL_ERROR);
    assert_eq!(by_id[&2]["error"]["message"], "disk full");
    assert_eq!(by_id[&3]["error"]["code"], errors::INTERNAL_ERROR);
    assert_eq!(by_id[&4]["error"]["code"], errors::METHOD_NOT_FOUND);

    // Nothing further arrives.
    assert!(
        timeout(Duration::from_millis(100), peer.recv_json())
            .await
            .is_err()
    );
    assert!(conn.is_connected());
    conn.disconnect().await;
}

#[tokio::test]
async fn calls_with_a_broken_envelope_are_still_answered() {
    let (conn, mut peer) = with_peer().await;
    conn.registry().register_fn("showNotification", |_| async {
        Ok::<_, HandlerError>(Value::Null)
    });

    // No jsonrpc member.
    let _ = peer
        .send_json(&json!({"method": "showNotification", "id": 7}))
        .await;
    let reply = timeout(TIMEOUT, peer.recv_json()).await.unwrap().unwrap();
    assert_eq!(reply["jsonrpc"], "2.0");
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["code"], errors::INVALID_REQUEST);
    assert!(reply.get("result").is_none());

    // Non-string method.
    let _ = peer
        .send_json(&json!({"jsonrpc": "2.0", "method": 12, "id": "srv-3"}))
        .await;
    let reply = timeout(TIMEOUT, peer.recv_json()).await.unwrap().unwrap();
    assert_eq!(reply["id"], "srv-3");
    assert_eq!(reply["error"]["code"], errors::INVALID_REQUEST);

    // Without an id there is nobody to answer.
    let _ = peer.send_json(&json!({"method": "showNotification"})).await;
    assert!(
        timeout(Duration::from_millis(100), peer.recv_json())
            .await
            .is_err()
    );
    assert!(conn.is_connected());
    conn.disconnect().await;
}

#[tokio::test]
async fn notifications_run_without_reply() {
    let (conn, mut peer) = with_peer().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    conn.registry().register_fn("showNotification", move |params| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(params);
            Ok::<_, HandlerError>(Value::Null)
        }
    });

    let _ = peer
        .send_json(&json!({"jsonrpc": "2.0", "method": "showNotification", "params": {"message": "hi"}}))
        .await;

    let params = timeout(TIMEOUT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(params.unwrap()["message"], "hi");
    assert!(
        timeout(Duration::from_millis(100), peer.recv_json())
            .await
            .is_err()
    );
    conn.disconnect().await;
}

#[tokio::test]
async fn handlers_can_change_while_connected() {
    let (conn, mut peer) = with_peer().await;
    let request = json!({"jsonrpc": "2.0", "method": "navigateToPage", "id": "n1"});

    let _ = peer.send_json(&request).await;
    let reply = timeout(TIMEOUT, peer.recv_json()).await.unwrap().unwrap();
    assert_eq!(reply["error"]["code"], errors::METHOD_NOT_FOUND);

    conn.registry().register_fn("navigateToPage", |_| async {
        Ok::<_, HandlerError>(json!({"navigated": true}))
    });
    let _ = peer.send_json(&request).await;
    let reply = timeout(TIMEOUT, peer.recv_json()).await.unwrap().unwrap();
    assert_eq!(reply["id"], "n1");
    assert_eq!(reply["result"]["navigated"], true);

    assert!(conn.registry().unregister("navigateToPage"));
    let _ = peer.send_json(&request).await;
    let reply = timeout(TIMEOUT, peer.recv_json()).await.unwrap().unwrap();
    assert_eq!(reply["error"]["message"], "Method not found: navigateToPage");

    conn.disconnect().await;
}

// ── Legacy commands ─────────────────────────────────────────────────

#[tokio::test]
async fn legacy_commands_reach_the_bus_and_get_no_reply() {
    let (conn, mut peer) = with_peer().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    conn.commands().register_fn("navigate", move |payload| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(payload);
            Ok::<_, CommandError>(())
        }
    });

    let _ = peer
        .send_json(&json!({"type": "open-file", "data": {"path": "ignored.md"}}))
        .await;
    let _ = peer
        .send_json(&json!({"type": "navigate", "data": {"path": "/teams"}}))
        .await;

    let payload = timeout(TIMEOUT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(payload["path"], "/teams");
    assert!(seen_rx.try_recv().is_err());
    assert!(
        timeout(Duration::from_millis(100), peer.recv_json())
            .await
            .is_err()
    );
    conn.disconnect().await;
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn calls_fail_fast_while_reconnecting() {
    let connector = Arc::new(MemoryConnector::new());
    let peer = connector.accept();
    let conn = Connection::new(config(), connector.clone());
    conn.connect(Some("tok"));
    let _ = wait_for(&conn, |s| s.is_connected).await;

    drop(peer);
    let status = wait_for(&conn, |s| s.state == ConnectionState::Reconnecting).await;
    assert!(!status.is_connected);

    let err = conn.client().call("listWorkspaceFiles", None, None).await.unwrap_err();
    assert_matches!(err, CallError::NotConnected);
    assert!(conn.pending().is_empty());

    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn transport_error_drops_session_and_reconnects() {
    let connector = Arc::new(MemoryConnector::new());
    let first = connector.accept();
    let _second = connector.accept();
    let conn = Connection::new(config(), connector.clone());
    conn.connect(Some("tok"));
    let _ = wait_for(&conn, |s| s.is_connected).await;

    assert!(first.fail(TransportError::Io("connection reset".into())).await);
    let status = wait_for(&conn, |s| s.state == ConnectionState::Reconnecting).await;
    assert!(status.last_error.unwrap().contains("connection reset"));

    let status = wait_for(&conn, |s| s.is_connected).await;
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(connector.attempts(), 2);
    conn.disconnect().await;
}
