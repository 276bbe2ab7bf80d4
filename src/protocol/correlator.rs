//! Request construction, response validation and id correlation.
//!
//! Ids start at 1 and increase by one per request for the lifetime of the
//! owning session. Response parsing is strict: a version tag of `"2.0"`, an
//! integer id and exactly one of `result` / `error` are required.

use serde_json::{Map, Value};
use tracing::debug;

use crate::protocol::envelope::{Inbound, Request, Response, ResponseBody, RpcError, JSONRPC_VERSION};
use crate::{AppError, Result};

/// Mints request ids and validates responses for one session.
#[derive(Debug, Clone)]
pub struct RequestCorrelator {
    next_id: u64,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    /// Correlator whose first request carries id 1.
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Id the next [`RequestCorrelator::build`] call will use.
    #[must_use]
    pub fn peek_next_id(&self) -> u64 {
        self.next_id
    }

    /// Build a request with a freshly minted id.
    pub fn build(&mut self, method: &str, params: Option<Value>) -> Request {
        let id = self.next_id;
        self.next_id += 1;
        debug!(request_id = id, method, "request built");
        Request::new(id, method, params)
    }

    /// Parse one received line into a validated [`Response`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when the line is not a JSON object, the
    /// version tag is missing or wrong, the id is missing or not an
    /// unsigned integer, or the envelope does not carry exactly one of
    /// `result` / `error`.
    pub fn parse(raw: &str) -> Result<Response> {
        let obj = parse_object(raw)?;
        parse_response_object(&obj)
    }

    /// Parse one received line, separating server-initiated messages from
    /// responses.
    ///
    /// # Errors
    ///
    /// Same conditions as [`RequestCorrelator::parse`] for anything that is
    /// not a server-initiated message.
    pub fn classify(raw: &str) -> Result<Inbound> {
        let obj = parse_object(raw)?;
        if let Some(method) = obj.get("method").and_then(Value::as_str) {
            return Ok(Inbound::ServerMessage {
                method: method.to_owned(),
            });
        }
        parse_response_object(&obj).map(Inbound::Response)
    }

    /// Confirm `response` answers `request`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Correlation` when the ids differ.
    pub fn correlate(request: &Request, response: Response) -> Result<Response> {
        if response.id == request.id() {
            Ok(response)
        } else {
            Err(AppError::Correlation {
                expected: request.id(),
                received: response.id,
            })
        }
    }
}

fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw.trim())?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Protocol(format!(
            "envelope must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn parse_response_object(obj: &Map<String, Value>) -> Result<Response> {
    match obj.get("jsonrpc") {
        Some(Value::String(tag)) if tag == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(AppError::Protocol(format!(
                "unsupported version tag: {other}"
            )));
        }
        None => {
            return Err(AppError::Protocol(
                "missing required field: `jsonrpc`".into(),
            ));
        }
    }

    let id = match obj.get("id") {
        Some(value) => value.as_u64().ok_or_else(|| {
            AppError::Protocol(format!("`id` must be an unsigned integer, got {value}"))
        })?,
        None => {
            return Err(AppError::Protocol("missing required field: `id`".into()));
        }
    };

    let body = match (obj.get("result"), obj.get("error")) {
        (Some(result), None) => ResponseBody::Result(result.clone()),
        (None, Some(error)) => {
            let error: RpcError = serde_json::from_value(error.clone()).map_err(|e| {
                AppError::Protocol(format!("malformed `error` object: {e}"))
            })?;
            ResponseBody::Error(error)
        }
        (Some(_), Some(_)) => {
            return Err(AppError::Protocol(
                "response carries both `result` and `error`".into(),
            ));
        }
        (None, None) => {
            return Err(AppError::Protocol(
                "response carries neither `result` nor `error`".into(),
            ));
        }
    };

    Ok(Response { id, body })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
