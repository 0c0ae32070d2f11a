//! Inbound frame classification.
//!
//! Every text frame is parsed once and routed by shape:
//!
//! | shape                                   | frame            |
//! |-----------------------------------------|------------------|
//! | `method` + `id`                         | [`Frame::Request`]      |
//! | `method`, no `id`                       | [`Frame::Notification`] |
//! | `id` + exactly one of `result`/`error`  | [`Frame::Response`]     |
//! | string `type`                           | [`Frame::Legacy`]       |
//!
//! A call whose envelope is broken but whose id is usable fails with
//! [`FrameError::InvalidRequest`] so the caller can still be answered.

use serde_json::{Map, Value};

use crate::errors::{INVALID_REQUEST, PARSE_ERROR};
use crate::types::{
    JSONRPC_VERSION, LegacyCommand, RequestId, RpcErrorObject, RpcNotification, RpcRequest,
    RpcResponse,
};

/// A classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Server-to-client call awaiting one response.
    Request(RpcRequest),
    /// Server-to-client call without a response.
    Notification(RpcNotification),
    /// Answer to a call this client issued.
    Response(RpcResponse),
    /// Legacy one-way event.
    Legacy(LegacyCommand),
}

/// Why a frame could not be classified.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Frame text is not JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Frame is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// `jsonrpc` missing or not `"2.0"`.
    #[error("unsupported jsonrpc version: {found:?}")]
    Version {
        /// What the frame carried.
        found: Option<String>,
    },
    /// `id` is neither a string nor an integer.
    #[error("invalid request id: {0}")]
    InvalidId(Value),
    /// A member has the wrong type.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Response carries both or neither of `result` and `error`.
    #[error("response {id} must carry exactly one of result/error")]
    Ambiguous {
        /// Id of the offending response.
        id: RequestId,
    },
    /// Frame matches no known shape.
    #[error("frame matches no known shape")]
    Unroutable,
    /// Call with a usable id but an invalid envelope. The caller is owed a
    /// response.
    #[error("invalid request {id}: {reason}")]
    InvalidRequest {
        /// Id to answer.
        id: RequestId,
        /// What was wrong with the envelope.
        reason: String,
    },
}

impl FrameError {
    /// JSON-RPC error code matching this failure.
    pub fn code(&self) -> i64 {
        match self {
            Self::Json(_) => PARSE_ERROR,
            _ => INVALID_REQUEST,
        }
    }
}

impl Frame {
    /// Parse and classify a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Classify an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let Value::Object(mut map) = value else {
            return Err(FrameError::NotAnObject);
        };

        if let Some(method) = map.remove("method") {
            let id = match map.remove("id") {
                None | Some(Value::Null) => None,
                Some(id) => Some(parse_id(id)?),
            };
            let method = match (check_version(&map), method) {
                (Ok(()), Value::String(method)) => method,
                (Err(e), _) => return Err(with_id(id, e)),
                (Ok(()), _) => {
                    let e = FrameError::Malformed("method must be a string".into());
                    return Err(with_id(id, e));
                }
            };
            let params = map.remove("params").filter(|p| !p.is_null());
            return Ok(match id {
                None => Self::Notification(RpcNotification::new(method, params)),
                Some(id) => Self::Request(RpcRequest::new(id, method, params)),
            });
        }

        if let Some(id) = map.remove("id") {
            check_version(&map)?;
            let id = parse_id(id)?;
            return match (map.remove("result"), map.remove("error")) {
                (Some(result), None) => Ok(Self::Response(RpcResponse::success(id, result))),
                (None, Some(error)) => {
                    let error: RpcErrorObject = serde_json::from_value(error)
                        .map_err(|e| FrameError::Malformed(format!("error object: {e}")))?;
                    Ok(Self::Response(RpcResponse::failure(id, error)))
                }
                _ => Err(FrameError::Ambiguous { id }),
            };
        }

        if let Some(Value::String(name)) = map.remove("type") {
            let payload = map.remove("data").unwrap_or(Value::Null);
            return Ok(Self::Legacy(LegacyCommand::new(name, payload)));
        }

        Err(FrameError::Unroutable)
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Notification(_) => "notification",
            Self::Response(_) => "response",
            Self::Legacy(_) => "legacy",
        }
    }
}

fn check_version(map: &Map<String, Value>) -> Result<(), FrameError> {
    match map.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => Ok(()),
        other => Err(FrameError::Version {
            found: other.map(ToString::to_string),
        }),
    }
}

/// Keep the id of a call whose envelope is broken so it can still be answered.
fn with_id(id: Option<RequestId>, err: FrameError) -> FrameError {
    match id {
        Some(id) => FrameError::InvalidRequest {
            id,
            reason: err.to_string(),
        },
        None => err,
    }
}

fn parse_id(id: Value) -> Result<RequestId, FrameError> {
    match id {
        Value::String(s) => Ok(RequestId::String(s)),
        Value::Number(n) => match n.as_i64() {
            Some(n) => Ok(RequestId::Number(n)),
            None => Err(FrameError::InvalidId(Value::Number(n))),
        },
        other => Err(FrameError::InvalidId(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn request_frame() {
        let frame =
            Frame::parse(r#"{"jsonrpc":"2.0","method":"getUiContext","params":{},"id":"s-1"}"#)
                .unwrap();
        assert_matches!(frame, Frame::Request(req) => {
            assert_eq!(req.method, "getUiContext");
            assert_eq!(req.id, RequestId::String("s-1".into()));
            assert_eq!(req.params, Some(json!({})));
        });
    }

    #[test]
    fn null_params_become_none() {
        let frame =
            Frame::parse(r#"{"jsonrpc":"2.0","method":"m","params":null,"id":1}"#).unwrap();
        assert_matches!(frame, Frame::Request(req) => assert!(req.params.is_none()));
    }

    #[test]
    fn notification_frame() {
        let frame = Frame::parse(r#"{"jsonrpc":"2.0","method":"showNotification"}"#).unwrap();
        assert_matches!(frame, Frame::Notification(n) => assert_eq!(n.method, "showNotification"));
        assert_eq!(
            Frame::parse(r#"{"jsonrpc":"2.0","method":"x","id":null}"#).unwrap().kind(),
            "notification"
        );
    }

    #[test]
    fn success_response_frame() {
        let frame = Frame::parse(r#"{"jsonrpc":"2.0","id":5,"result":{"ok":true}}"#).unwrap();
        assert_matches!(frame, Frame::Response(resp) => {
            assert_eq!(resp.id, RequestId::Number(5));
            assert_eq!(resp.result().unwrap()["ok"], true);
        });
    }

    #[test]
    fn error_response_frame() {
        let frame = Frame::parse(
            r#"{"jsonrpc":"2.0","id":6,"error":{"code":-32000,"message":"quota exceeded","data":{"limit":3}}}"#,
        )
        .unwrap();
        assert_matches!(frame, Frame::Response(resp) => {
            let err = resp.error().unwrap();
            assert_eq!(err.code, -32000);
            assert_eq!(err.message, "quota exceeded");
            assert_eq!(err.data.as_ref().unwrap()["limit"], 3);
        });
    }

    #[test]
    fn null_result_is_success() {
        let frame = Frame::parse(r#"{"jsonrpc":"2.0","id":8,"result":null}"#).unwrap();
        assert_matches!(frame, Frame::Response(resp) => assert!(resp.is_success()));
    }

    #[test]
    fn response_with_both_result_and_error_is_rejected() {
        let err = Frame::parse(
            r#"{"jsonrpc":"2.0","id":9,"result":1,"error":{"code":1,"message":"x"}}"#,
        )
        .unwrap_err();
        assert_matches!(err, FrameError::Ambiguous { id } => assert_eq!(id, RequestId::Number(9)));
    }

    #[test]
    fn response_with_neither_is_rejected() {
        let err = Frame::parse(r#"{"jsonrpc":"2.0","id":9}"#).unwrap_err();
        assert_matches!(err, FrameError::Ambiguous { .. });
    }

    #[test]
    fn legacy_frame() {
        let frame = Frame::parse(r#"{"type":"open-file","data":{"path":"a.md"}}"#).unwrap();
        assert_matches!(frame, Frame::Legacy(cmd) => {
            assert_eq!(cmd.name, "open-file");
            assert_eq!(cmd.payload["path"], "a.md");
        });
    }

    #[test]
    fn invalid_json_is_error() {
        assert_matches!(Frame::parse("not json"), Err(FrameError::Json(_)));
        assert_matches!(Frame::parse(""), Err(FrameError::Json(_)));
    }

    #[test]
    fn non_object_is_error() {
        assert_matches!(Frame::parse("[1,2,3]"), Err(FrameError::NotAnObject));
    }

    #[test]
    fn wrong_version_is_error() {
        assert_matches!(
            Frame::parse(r#"{"jsonrpc":"1.0","method":"m"}"#),
            Err(FrameError::Version { found: Some(_) })
        );
        assert_matches!(
            Frame::parse(r#"{"id":1,"result":true}"#),
            Err(FrameError::Version { found: None })
        );
    }

    #[test]
    fn call_with_bad_envelope_keeps_its_id() {
        let err = Frame::parse(r#"{"method":"showNotification","id":7}"#).unwrap_err();
        assert_eq!(err.code(), crate::errors::INVALID_REQUEST);
        assert_matches!(err, FrameError::InvalidRequest { id, reason } => {
            assert_eq!(id, RequestId::Number(7));
            assert!(reason.contains("jsonrpc"));
        });

        assert_matches!(
            Frame::parse(r#"{"jsonrpc":"1.0","method":"m","id":"srv-2"}"#),
            Err(FrameError::InvalidRequest { id: RequestId::String(id), .. }) => assert_eq!(id, "srv-2")
        );
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            Frame::parse("{oops").unwrap_err().code(),
            crate::errors::PARSE_ERROR
        );
        assert_eq!(
            Frame::parse(r#"{"hello":"world"}"#).unwrap_err().code(),
            crate::errors::INVALID_REQUEST
        );
    }

    #[test]
    fn invalid_ids_are_rejected() {
        assert_matches!(
            Frame::parse(r#"{"jsonrpc":"2.0","method":"m","id":1.5}"#),
            Err(FrameError::InvalidId(_))
        );
        assert_matches!(
            Frame::parse(r#"{"jsonrpc":"2.0","id":{"a":1},"result":1}"#),
            Err(FrameError::InvalidId(_))
        );
    }

    #[test]
    fn non_string_method_is_malformed() {
        assert_matches!(
            Frame::parse(r#"{"jsonrpc":"2.0","method":42}"#),
            Err(FrameError::Malformed(_))
        );
        assert_matches!(
            Frame::parse(r#"{"jsonrpc":"2.0","method":42,"id":1}"#),
            Err(FrameError::InvalidRequest { id: RequestId::Number(1), .. })
        );
    }

    #[test]
    fn unknown_shape_is_unroutable() {
        assert_matches!(Frame::parse(r#"{"hello":"world"}"#), Err(FrameError::Unroutable));
        assert_matches!(Frame::parse(r#"{"type":5}"#), Err(FrameError::Unroutable));
    }
}
