//! Pending-request table.
//!
//! One entry per in-flight outbound call, keyed by request id. Every entry
//! is removed exactly once, by whichever comes first: the matching response,
//! the call's timeout, the caller dropping the call future, or a reject-all
//! when the transport goes away.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tether_rpc::{RequestId, ResponseOutcome, RpcResponse};
use tokio::sync::oneshot;
use tracing::debug;

use crate::client::CallError;

type Settlement = Result<Value, CallError>;

/// Table of calls awaiting a response.
#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<RequestId, oneshot::Sender<Settlement>>>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry for `id`.
    ///
    /// The returned guard removes the entry when dropped unless it has been
    /// settled in the meantime.
    pub fn register(&self, id: RequestId) -> (oneshot::Receiver<Settlement>, PendingGuard<'_>) {
        let (tx, rx) = oneshot::channel();
        let previous = self.entries.lock().insert(id.clone(), tx);
        debug_assert!(previous.is_none(), "request id {id} reused while in flight");
        (rx, PendingGuard { table: self, id })
    }

    /// Settle the entry matching `response`. Returns `false` when no entry
    /// exists (late, duplicate, or unknown response).
    pub fn settle(&self, response: RpcResponse) -> bool {
        let Some(tx) = self.entries.lock().remove(&response.id) else {
            return false;
        };
        let outcome = match response.outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(CallError::Remote {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
        };
        // The caller may have given up between removal and send.
        let _ = tx.send(outcome);
        true
    }

    /// Remove the entry for `id` without settling it.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Settle every entry with an error built by `reason`. Returns how many
    /// calls were rejected.
    pub fn reject_all(&self, reason: impl Fn() -> CallError) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, tx) in drained {
            debug!(%id, "rejecting pending call");
            let _ = tx.send(Err(reason()));
        }
        count
    }

    /// Number of calls in flight.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no calls are in flight.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Whether `id` is in flight.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.lock().contains_key(id)
    }
}

/// Removes a pending entry when the owning call ends.
pub struct PendingGuard<'a> {
    table: &'a PendingRequests,
    id: RequestId,
}

impl PendingGuard<'_> {
    /// Id of the guarded entry.
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.table.remove(&self.id) {
            debug!(id = %self.id, "pending call abandoned");
        }
    }
}
