//! Outbound RPC client.
//!
//! [`RpcClient::call`] sends one request over the live connection and waits
//! for the correlated response. Calls are never queued while disconnected
//! and never retried.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_rpc::{RequestId, RpcRequest};
use tracing::{debug, warn};

use crate::catalog::MethodSpec;
use crate::connection::Connection;
use crate::metrics as names;

/// Why an outbound call produced no result.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// No live transport; nothing was sent.
    #[error("not connected")]
    NotConnected,
    /// No response within the call's timeout.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Method that timed out.
        method: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// The backend answered with an error object.
    #[error("remote error {code}: {message}")]
    Remote {
        /// Error code.
        code: i64,
        /// Error message.
        message: String,
        /// Optional detail.
        data: Option<Value>,
    },
    /// The transport dropped before a response arrived.
    #[error("connection lost before a response arrived")]
    ConnectionLost,
    /// The connection was closed locally before a response arrived.
    #[error("connection closed by the client")]
    Disconnected,
    /// Params or result did not (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The pending entry went away without being settled.
    #[error("call abandoned without a response")]
    Abandoned,
}

impl CallError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Timeout { .. } => "timeout",
            Self::Remote { .. } => "remote",
            Self::ConnectionLost => "connection_lost",
            Self::Disconnected => "disconnected",
            Self::Serialization(_) => "serialization",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Issues calls to the backend over a [`Connection`].
#[derive(Clone)]
pub struct RpcClient {
    connection: Connection,
}

impl RpcClient {
    /// Bind a client to `connection`.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Call `method` and wait for its result.
    ///
    /// Without an explicit `timeout`, catalog methods use their own default
    /// and anything else uses the connection's default call timeout.
    /// Dropping the returned future abandons the call; a late response is
    /// then ignored.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, CallError> {
        let timeout = timeout.unwrap_or_else(|| {
            MethodSpec::lookup(method)
                .map_or(self.connection.config().default_call_timeout, |spec| spec.timeout)
        });
        counter!(names::OUTBOUND_REQUESTS_TOTAL, "method" => method.to_owned()).increment(1);
        let start = Instant::now();

        let result = self.exchange(method, params, timeout).await;

        histogram!(names::OUTBOUND_DURATION_SECONDS, "method" => method.to_owned())
            .record(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            counter!(names::OUTBOUND_ERRORS_TOTAL, "method" => method.to_owned(), "error_type" => e.kind())
                .increment(1);
            debug!(method, error = %e, "outbound call failed");
        }
        result
    }

    /// Call with typed params and result.
    ///
    /// Params serializing to `null` (e.g. `()`) are omitted from the request.
    pub async fn call_typed<P, R>(
        &self,
        method: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> Result<R, CallError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params =
            serde_json::to_value(params).map_err(|e| CallError::Serialization(e.to_string()))?;
        let params = (!params.is_null()).then_some(params);
        let value = self.call(method, params, timeout).await?;
        serde_json::from_value(value).map_err(|e| {
            CallError::Serialization(format!("unexpected result for '{method}': {e}"))
        })
    }

    /// Call a catalog method with its default timeout.
    pub async fn call_method(
        &self,
        spec: &MethodSpec,
        params: Option<Value>,
    ) -> Result<Value, CallError> {
        self.call(spec.name, params, Some(spec.timeout)).await
    }

    async fn exchange(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        if !self.connection.is_connected() {
            return Err(CallError::NotConnected);
        }

        let id = RequestId::from(self.connection.next_id());
        let request = RpcRequest::new(id.clone(), method, params);
        let text =
            serde_json::to_string(&request).map_err(|e| CallError::Serialization(e.to_string()))?;

        // Dropping the guard (timeout, cancellation, early return) removes the entry.
        let (rx, _guard) = self.connection.pending().register(id);
        let exchange = async {
            if !self.connection.enqueue(text).await {
                return Err(CallError::NotConnected);
            }
            rx.await.unwrap_or(Err(CallError::Abandoned))
        };

        if let Ok(result) = tokio::time::timeout(timeout, exchange).await {
            result
        } else {
            let timeout_ms = timeout.as_millis() as u64;
            warn!(method, timeout_ms, "outbound call timed out");
            Err(CallError::Timeout {
                method: method.to_owned(),
                timeout_ms,
            })
        }
    }
}
