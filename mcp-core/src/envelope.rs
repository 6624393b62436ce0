//! JSON-RPC 2.0 envelope types exchanged with a peer over stdio.
//!
//! A peer conversation is a stream of newline-delimited JSON values, each
//! one of a request, a response, or a notification. This module models the
//! three shapes plus the untyped identifier that correlates requests with
//! responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON-RPC id: either a string, a number, or absent (notifications carry
/// no id at all and are modeled by a separate type below).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId::Number(value)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId::String(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId::String(value.to_string())
    }
}

/// A JSON-RPC 2.0 request: expects a matching response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// The method's category: the prefix before the first `/`, used by the
    /// Version Catalog to gate operations by capability.
    pub fn category(&self) -> &str {
        self.method.split('/').next().unwrap_or(&self.method)
    }
}

/// A JSON-RPC 2.0 error object, as embedded in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A JSON-RPC 2.0 response: either a result or an error, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn result_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.result.clone().unwrap_or(Value::Null))
    }
}

/// A JSON-RPC 2.0 notification: no id, no response expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }

    pub fn category(&self) -> &str {
        self.method.split('/').next().unwrap_or(&self.method)
    }
}

/// Any one of the three envelope shapes, as read off the wire.
///
/// Variant order matters here: `serde(untagged)` tries each variant in
/// declaration order and keeps the first one that deserializes without
/// error. `JsonRpcResponse` has no required fields beyond `jsonrpc`/`id`,
/// so a request or notification object would parse into it too (its
/// `method`/`params` keys are simply ignored as unrecognized) unless the
/// variants requiring a non-optional `method` field are tried first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcEnvelope {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl RpcEnvelope {
    pub fn method(&self) -> Option<&str> {
        match self {
            RpcEnvelope::Request(r) => Some(&r.method),
            RpcEnvelope::Notification(n) => Some(&n.method),
            RpcEnvelope::Response(_) => None,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            RpcEnvelope::Request(r) => Some(&r.id),
            RpcEnvelope::Response(r) => Some(&r.id),
            RpcEnvelope::Notification(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips() {
        let req = JsonRpcRequest::new(1, "tools/call", Some(json!({"name": "echo"})));
        let encoded = serde_json::to_string(&req).unwrap();
        let decoded: JsonRpcRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.method, "tools/call");
        assert_eq!(decoded.category(), "tools");
    }

    #[test]
    fn response_distinguishes_success_and_error() {
        let ok = JsonRpcResponse::success(RequestId::Number(1), json!({"ok": true}));
        assert!(!ok.is_error());
        let err = JsonRpcResponse::failure(
            RequestId::Number(1),
            JsonRpcError::new(JsonRpcError::METHOD_NOT_FOUND, "nope"),
        );
        assert!(err.is_error());
    }

    #[test]
    fn envelope_untagged_parse_distinguishes_shapes() {
        let req: RpcEnvelope = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
        )
        .unwrap();
        assert!(matches!(req, RpcEnvelope::Request(_)));

        let notif: RpcEnvelope = serde_json::from_str(
            r#"{"jsonrpc":"2.0","method":"notifications/tools/list_changed"}"#,
        )
        .unwrap();
        assert!(matches!(notif, RpcEnvelope::Notification(_)));

        let resp: RpcEnvelope = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
        )
        .unwrap();
        assert!(matches!(resp, RpcEnvelope::Response(_)));
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::from(42).to_string(), "42");
        assert_eq!(RequestId::from("abc").to_string(), "abc");
    }
}
