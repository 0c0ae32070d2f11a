//! Wire-format types for the command channel.
//!
//! RPC traffic is JSON-RPC 2.0 in both directions. Legacy commands use the
//! older `{ "type": ..., "data": ... }` event shape and carry no id.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of the `jsonrpc` member on every RPC envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id of a request/response pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id (what this client generates).
    Number(i64),
    /// String id (what some servers generate).
    String(String),
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id as i64)
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A method call that expects exactly one correlated response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name (e.g. `getUiContext`).
    pub method: String,
    /// Optional parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlation id.
    pub id: RequestId,
}

impl RpcRequest {
    /// Build a request envelope.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
            id: id.into(),
        }
    }
}

/// A method call without an id; no response is ever sent for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Optional parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcNotification {
    /// Build a notification envelope.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            method: method.into(),
            params,
        }
    }
}

/// Structured error carried in an error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Numeric error code (see [`crate::errors`]).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Error object without detail.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Exactly one of `result` / `error`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseOutcome {
    /// Successful call.
    Result(Value),
    /// Failed call.
    Error(RpcErrorObject),
}

/// Response correlated to a request by `id`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request being answered.
    pub id: RequestId,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: id.into(),
            outcome: ResponseOutcome::Result(result),
        }
    }

    /// Build an error response.
    pub fn failure(id: impl Into<RequestId>, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: id.into(),
            outcome: ResponseOutcome::Error(error),
        }
    }

    /// Whether this is a success response.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Result(_))
    }

    /// The result payload, if successful.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            ResponseOutcome::Result(v) => Some(v),
            ResponseOutcome::Error(_) => None,
        }
    }

    /// The error object, if failed.
    pub fn error(&self) -> Option<&RpcErrorObject> {
        match &self.outcome {
            ResponseOutcome::Result(_) => None,
            ResponseOutcome::Error(e) => Some(e),
        }
    }
}

/// One-way named event from the older protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegacyCommand {
    /// Event name (e.g. `navigate`).
    #[serde(rename = "type")]
    pub name: String,
    /// Event payload.
    #[serde(rename = "data", default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl LegacyCommand {
    /// Build a legacy command frame.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}
