//! JSON-RPC 2.0 frame model.
//!
//! A single [`Frame`] struct covers requests, notifications, and responses in
//! both directions. Classification is structural: a frame with a `method` is a
//! call, a frame with `result` or `error` and an `id` is a reply.

use std::fmt::{Display, Formatter};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version literal carried by every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal error, also used when no turn is bound to receive a callback.
pub const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error object without `data`.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32600` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    /// `-32601` error naming the unknown method.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    /// `-32602` error.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// `-32603` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// One newline-delimited JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Always `"2.0"` on outbound frames; not enforced inbound.
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Correlation id. Absent on notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name for calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Call parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Successful reply payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failed reply payload.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_error"
    )]
    pub error: Option<RpcError>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// Accept either a proper error object or a bare string, which some agents
/// emit for internal failures.
fn lenient_error<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<RpcError>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(message)) => Ok(Some(RpcError::internal(message))),
        Some(other) => serde_json::from_value(other)
            .map(Some)
            .map_err(de::Error::custom),
    }
}

impl Frame {
    /// Outbound call expecting a reply.
    #[must_use]
    pub fn request(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Outbound call without an id.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: None,
            method: Some(method.into()),
            params: Some(params),
            result: None,
            error: None,
        }
    }

    /// Successful reply to an inbound call.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Error reply to an inbound call. `id` is `null` when the offending
    /// frame carried none.
    #[must_use]
    pub fn failure(id: Option<Value>, error: RpcError) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(id.unwrap_or(Value::Null)),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// `true` when the frame is a call (request or notification).
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.method.is_some()
    }

    /// `true` when the frame is a reply to an earlier call.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.method.is_none() && self.id.is_some()
    }
}

/// Render a JSON-RPC id as a map key. String ids are used as-is, numeric ids
/// by their decimal form, so `7` and `"7"` correlate with each other.
#[must_use]
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
