//! RPC error codes and the error type returned by method handlers.

use serde_json::{Value, json};

use crate::types::RpcErrorObject;

// ── Error code constants ────────────────────────────────────────────

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler is registered for the method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// The handler failed.
pub const INTERNAL_ERROR: i64 = -32603;

/// Error returned by a method handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Params missing or of the wrong shape.
    #[error("{message}")]
    InvalidParams {
        /// Description of what is wrong.
        message: String,
    },

    /// The handler failed while doing its work.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
        /// Optional structured detail (e.g. error source chain).
        data: Option<Value>,
    },

    /// Application-defined error code.
    #[error("{message}")]
    Custom {
        /// Numeric code.
        code: i64,
        /// Human-readable message.
        message: String,
        /// Optional structured detail.
        data: Option<Value>,
    },
}

impl HandlerError {
    /// Internal error without detail.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            data: None,
        }
    }

    /// Invalid-params error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Internal error built from any error, recording its source chain as detail.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self::Internal {
            message: err.to_string(),
            data: (!causes.is_empty()).then(|| json!({ "causes": causes })),
        }
    }

    /// Numeric code for this variant.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Custom { code, .. } => *code,
        }
    }

    /// Convert to the wire-format error object.
    pub fn to_error_object(&self) -> RpcErrorObject {
        RpcErrorObject {
            code: self.code(),
            message: self.to_string(),
            data: match self {
                Self::InvalidParams { .. } => None,
                Self::Internal { data, .. } | Self::Custom { data, .. } => data.clone(),
            },
        }
    }
}
