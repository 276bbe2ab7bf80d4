//! JSON-RPC 2.0 envelopes exchanged over the line channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only version tag this harness speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound request. Immutable once built by the correlator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl Request {
    pub(crate) fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Request id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Parameters, if any.
    #[must_use]
    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Compact single-line JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outbound notification: a request without an id; no response expected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    jsonrpc: &'static str,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl Notification {
    /// Build a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    /// Compact single-line JSON encoding.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialization fails.
    pub fn to_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Exactly one of `result` / `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// Successful result payload.
    Result(Value),
    /// Server-reported error.
    Error(RpcError),
}

/// Parsed, envelope-validated response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id echoed by the server.
    pub id: u64,
    /// Result or error.
    pub body: ResponseBody,
}

impl Response {
    /// Result payload, if the response succeeded.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Result(value) => Some(value),
            ResponseBody::Error(_) => None,
        }
    }

    /// Error object, if the response failed.
    #[must_use]
    pub fn error(&self) -> Option<&RpcError> {
        match &self.body {
            ResponseBody::Result(_) => None,
            ResponseBody::Error(err) => Some(err),
        }
    }
}

/// Any line the server may send while a request is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A response envelope.
    Response(Response),
    /// A server-initiated message (notification or request) to be skipped.
    ServerMessage {
        /// Method named by the server.
        method: String,
    },
}
