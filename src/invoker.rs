//! Tool invocation over a session: one call in, one [`ToolOutcome`] out.
//!
//! Every exchange follows the same path: the session's correlator mints the
//! request, the session lends its streams to a supervised worker which
//! writes the line and awaits the answer, and the response is correlated
//! against the request before its payload is interpreted.
//!
//! Tool results arrive as a `content` sequence of `{type, text}` items. A
//! text body that is itself a serialized JSON object or array is exposed as
//! [`Payload::Structured`]; anything else stays [`Payload::Raw`]. The
//! fallback is an ordinary outcome, never an error.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{HandshakeConfig, HarnessConfig};
use crate::protocol::messages::{
    Implementation, InitializeParams, InitializeResult, ToolCallParams, ToolCallResult,
    ToolDescriptor, ToolsListResult, WireContent, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::protocol::{Inbound, Notification, RequestCorrelator, Response, ResponseBody};
use crate::session::process::deadline_after;
use crate::session::{ProcessSession, SessionIo};
use crate::supervisor::TimeoutSupervisor;
use crate::{AppError, Result};

/// Text body of a content item, parsed when it carries structured data.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain text, or text that did not parse as a JSON object/array.
    Raw(String),
    /// Text that parsed as a JSON object or array.
    Structured(Value),
}

impl Payload {
    /// Classify `text`. Total: every input yields exactly one variant.
    ///
    /// JSON scalars (`"42"`, `"true"`) stay raw; only objects and arrays
    /// count as structured payloads.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(value @ (Value::Object(_) | Value::Array(_))) => Self::Structured(value),
            _ => Self::Raw(text.to_owned()),
        }
    }

    /// Structured value, if any.
    #[must_use]
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Raw text, if the payload did not parse.
    #[must_use]
    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Raw(text) => Some(text),
            Self::Structured(_) => None,
        }
    }
}

/// One normalized content item.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem {
    /// Wire `type` tag.
    pub kind: String,
    /// Parsed text body. Non-text items carry an empty raw payload.
    pub payload: Payload,
}

impl From<WireContent> for ContentItem {
    fn from(wire: WireContent) -> Self {
        let payload = wire
            .text
            .as_deref()
            .map_or_else(|| Payload::Raw(String::new()), Payload::from_text);
        Self {
            kind: wire.kind,
            payload,
        }
    }
}

/// Normalized content of a successful tool call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolContent {
    /// Items in server order.
    pub items: Vec<ContentItem>,
}

impl ToolContent {
    /// First item's payload, which is where single-result tools answer.
    #[must_use]
    pub fn primary(&self) -> Option<&Payload> {
        self.items.first().map(|item| &item.payload)
    }

    /// First structured payload in the content, if any.
    #[must_use]
    pub fn structured(&self) -> Option<&Value> {
        self.items.iter().find_map(|item| item.payload.as_structured())
    }

    /// Short human-readable preview of the primary payload.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let full = match self.primary() {
            None => return String::from("<empty>"),
            Some(Payload::Raw(text)) => text.clone(),
            Some(Payload::Structured(value)) => value.to_string(),
        };
        if full.chars().count() <= max_chars {
            full
        } else {
            let cut: String = full.chars().take(max_chars).collect();
            format!("{cut}…")
        }
    }
}

/// Result of one tool call, produced once and never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool ran and returned content.
    Success(ToolContent),
    /// The server reported a failure executing the tool.
    ToolError(String),
    /// The exchange broke: malformed envelope, id mismatch, or lost process.
    ProtocolError(String),
    /// No response within the bound.
    Timeout,
}

impl ToolOutcome {
    /// Whether the call succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Content of a successful call.
    #[must_use]
    pub fn content(&self) -> Option<&ToolContent> {
        match self {
            Self::Success(content) => Some(content),
            _ => None,
        }
    }

    /// One-line description for reports.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Success(content) => format!("success: {}", content.preview(120)),
            Self::ToolError(msg) => format!("tool error: {msg}"),
            Self::ProtocolError(msg) => format!("protocol error: {msg}"),
            Self::Timeout => "timeout".to_owned(),
        }
    }
}

impl From<Result<ToolContent>> for ToolOutcome {
    fn from(result: Result<ToolContent>) -> Self {
        match result {
            Ok(content) => Self::Success(content),
            Err(AppError::Tool(msg)) => Self::ToolError(msg),
            Err(AppError::Timeout(_)) => Self::Timeout,
            Err(other) => Self::ProtocolError(other.to_string()),
        }
    }
}

/// A tool outcome together with its wall-clock latency.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedOutcome {
    /// The outcome.
    pub outcome: ToolOutcome,
    /// Time from request construction to outcome.
    pub elapsed: Duration,
}

/// Composes correlator, supervisor and session into protocol operations.
#[derive(Debug, Clone)]
pub struct ToolInvoker {
    supervisor: TimeoutSupervisor,
    call_timeout: Duration,
    handshake: HandshakeConfig,
}

impl ToolInvoker {
    /// Invoker with the given supervisor and default call bound.
    #[must_use]
    pub fn new(supervisor: TimeoutSupervisor, call_timeout: Duration) -> Self {
        Self {
            supervisor,
            call_timeout,
            handshake: HandshakeConfig::default(),
        }
    }

    /// Invoker configured from the harness configuration.
    #[must_use]
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            TimeoutSupervisor::new(config.timeouts.cancel_grace()),
            config.timeouts.call(),
        )
        .with_handshake(config.handshake.clone())
    }

    /// Replace the handshake settings.
    #[must_use]
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Replace the default bound applied to each exchange.
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Default bound applied to each exchange.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Send one request and return its correlated response.
    ///
    /// A timed-out exchange leaves `session` terminated.
    ///
    /// # Errors
    ///
    /// `AppError::Timeout`, `AppError::Protocol`, `AppError::Correlation` or
    /// `AppError::Process` as described in the module docs.
    pub async fn request(
        &self,
        session: &mut ProcessSession,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Response> {
        let request = session.correlator_mut().build(method, params);
        let line = request.to_line()?;
        let io = session.take_io()?;
        let span = info_span!("exchange", session = session.label(), request_id = request.id(), method);

        let worker = move |cancel: CancellationToken| {
            async move {
                let mut io = io;
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(AppError::Interrupted),
                    result = exchange_once(&mut io, &line, timeout) => result,
                };
                Ok((io, outcome))
            }
            .instrument(span)
        };

        let (io, outcome) = self
            .supervisor
            .run_with_timeout(worker, timeout, session)
            .await?;
        session.restore_io(io);

        let response = match outcome {
            Ok(response) => response,
            Err(err @ AppError::Timeout(_)) => {
                // The late answer would desynchronize the channel.
                session.terminate().await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        RequestCorrelator::correlate(&request, response)
    }

    /// Send a notification; nothing is read back.
    ///
    /// # Errors
    ///
    /// `AppError::Process` if the write fails, `AppError::Timeout` if it
    /// does not complete within the call bound.
    pub async fn notify(
        &self,
        session: &mut ProcessSession,
        method: &str,
        params: Option<Value>,
    ) -> Result<()> {
        let line = Notification::new(method, params).to_line()?;
        let io = session.take_io()?;

        let worker = move |_cancel: CancellationToken| async move {
            let mut io = io;
            let outcome = io.write(&line).await;
            Ok((io, outcome))
        };

        let (io, outcome) = self
            .supervisor
            .run_with_timeout(worker, self.call_timeout, session)
            .await?;
        session.restore_io(io);
        outcome
    }

    /// Perform the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// Exchange errors, or `AppError::Protocol` if the server rejects the
    /// handshake or answers with a malformed result.
    pub async fn initialize(&self, session: &mut ProcessSession) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: self.handshake.protocol_version.clone(),
            capabilities: json!({}),
            client_info: Implementation {
                name: self.handshake.client_name.clone(),
                version: self.handshake.client_version.clone(),
            },
        };
        let response = self
            .request(
                session,
                METHOD_INITIALIZE,
                Some(serde_json::to_value(params)?),
                self.call_timeout,
            )
            .await?;
        let result: InitializeResult = decode_result(METHOD_INITIALIZE, response)?;

        info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            "handshake complete"
        );

        if self.handshake.send_initialized {
            self.notify(session, METHOD_INITIALIZED, None).await?;
        }

        Ok(result)
    }

    /// List the server's tools in server order.
    ///
    /// # Errors
    ///
    /// Exchange errors, or `AppError::Protocol` for a rejected or malformed
    /// listing.
    pub async fn list_tools(&self, session: &mut ProcessSession) -> Result<Vec<ToolDescriptor>> {
        let response = self
            .request(session, METHOD_TOOLS_LIST, None, self.call_timeout)
            .await?;
        let result: ToolsListResult = decode_result(METHOD_TOOLS_LIST, response)?;
        debug!(count = result.tools.len(), "tools listed");
        Ok(result.tools)
    }

    /// Call `tool`, surfacing every failure as a typed error.
    ///
    /// # Errors
    ///
    /// `AppError::Tool` for server-reported failures (an `error` response or
    /// a result flagged `isError`), plus all exchange errors.
    pub async fn try_call(
        &self,
        session: &mut ProcessSession,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolContent> {
        let params = ToolCallParams {
            name: tool.to_owned(),
            arguments,
        };
        let response = self
            .request(
                session,
                METHOD_TOOLS_CALL,
                Some(serde_json::to_value(params)?),
                timeout,
            )
            .await?;

        let result = match response.body {
            ResponseBody::Error(err) => {
                return Err(AppError::Tool(format!("{} (code {})", err.message, err.code)));
            }
            ResponseBody::Result(value) => value,
        };

        let result: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| AppError::Protocol(format!("malformed tools/call result: {e}")))?;

        if result.is_error == Some(true) {
            let message = result
                .content
                .iter()
                .filter_map(|item| item.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(AppError::Tool(message));
        }

        Ok(ToolContent {
            items: result.content.into_iter().map(ContentItem::from).collect(),
        })
    }

    /// Call `tool` with the default bound.
    pub async fn call(&self, session: &mut ProcessSession, tool: &str, arguments: Value) -> ToolOutcome {
        self.call_timed(session, tool, arguments, self.call_timeout)
            .await
            .outcome
    }

    /// Call `tool` with an explicit bound, measuring latency.
    pub async fn call_timed(
        &self,
        session: &mut ProcessSession,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> TimedOutcome {
        let started = Instant::now();
        let outcome = ToolOutcome::from(self.try_call(session, tool, arguments, timeout).await);
        let elapsed = started.elapsed();

        match &outcome {
            ToolOutcome::Success(_) => debug!(tool, ?elapsed, "tool call succeeded"),
            other => warn!(tool, ?elapsed, outcome = %other.summary(), "tool call failed"),
        }

        TimedOutcome { outcome, elapsed }
    }
}

/// Write one request line and wait for its response line, skipping
/// server-initiated messages.
async fn exchange_once(io: &mut SessionIo, line: &str, timeout: Duration) -> Result<Response> {
    let deadline = deadline_after(timeout);
    io.write(line).await?;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(AppError::Timeout(timeout));
        }
        let raw = io
            .read_response(remaining)
            .await
            .map_err(|err| match err {
                AppError::Timeout(_) => AppError::Timeout(timeout),
                other => other,
            })?;

        match RequestCorrelator::classify(&raw)? {
            Inbound::Response(response) => return Ok(response),
            Inbound::ServerMessage { method } => {
                debug!(method, "skipping server-initiated message");
            }
        }
    }
}

fn decode_result<T: serde::de::DeserializeOwned>(method: &str, response: Response) -> Result<T> {
    match response.body {
        ResponseBody::Error(err) => Err(AppError::Protocol(format!(
            "{method} rejected: {} (code {})",
            err.message, err.code
        ))),
        ResponseBody::Result(value) => serde_json::from_value(value)
            .map_err(|e| AppError::Protocol(format!("malformed {method} result: {e}"))),
    }
}
