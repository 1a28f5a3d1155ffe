//! Log records and the hooks used to build them.
//!
//! A [`LogRecord`] is the sink-independent description of one event. Request
//! records carry [`HttpMetadata`]; out-of-band records built through
//! [`GcpLog::log`](crate::GcpLog::log) and friends do not.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::{
    capture::CapturedResponse, request::RequestInfo, severity::Severity, trace::TraceContext,
};

/// One structured log event.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub severity: Severity,
    /// Summary for INFO records, error text otherwise. Arbitrary JSON.
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub http: Option<HttpMetadata>,
    pub trace: Option<TraceContext>,
    /// Present exactly when `severity` is WARNING or ERROR.
    pub error: Option<ErrorDetail>,
    pub user: Option<String>,
}

impl LogRecord {
    pub fn new(severity: Severity, payload: impl Into<Value>) -> Self {
        Self {
            severity,
            payload: payload.into(),
            timestamp: Utc::now(),
            http: None,
            trace: None,
            error: None,
            user: None,
        }
    }

    pub fn with_http(mut self, http: HttpMetadata) -> Self {
        self.http = Some(http);
        self
    }

    /// Attach a trace context; empty contexts are discarded.
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = (!trace.is_empty()).then_some(trace);
        self
    }

    pub fn with_error(mut self, error: ErrorDetail) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach a user label; empty strings are discarded.
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user.filter(|u| !u.is_empty());
        self
    }

    /// Labels attached to the entry (`user` only, for now).
    pub fn labels(&self) -> Option<BTreeMap<&'static str, &str>> {
        self.user
            .as_deref()
            .map(|user| BTreeMap::from([("user", user)]))
    }
}

/// Underlying error of a WARNING/ERROR record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    /// Rendered backtrace, when one was captured.
    pub stack: Option<String>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Message followed by the stack trace, the layout Error Reporting
    /// parses.
    pub fn report_text(&self) -> String {
        match &self.stack {
            Some(stack) if !stack.is_empty() => format!("{}\n{}", self.message, stack),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Request/response descriptor in Cloud Logging's `HttpRequest` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMetadata {
    pub request_method: String,
    pub request_url: String,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_decimal")]
    pub request_size: Option<u64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_decimal")]
    pub response_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "as_duration")]
    pub latency: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl HttpMetadata {
    /// Request-side fields only.
    pub fn from_request(request: &RequestInfo) -> Self {
        Self {
            request_method: request.method.to_string(),
            request_url: request.url(),
            request_size: request.content_length(),
            user_agent: request.user_agent().map(str::to_owned),
            remote_ip: request.client_ip(),
            referer: request.referer().map(str::to_owned),
            protocol: Some(request.protocol().to_owned()),
            ..Self::default()
        }
    }

    /// Full exchange descriptor.
    pub fn from_exchange(
        request: &RequestInfo,
        response: &CapturedResponse,
        latency: Duration,
    ) -> Self {
        Self {
            status: response.status().as_u16(),
            response_size: Some(response.size()),
            latency: Some(latency),
            ..Self::from_request(request)
        }
    }
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

// int64 fields are JSON strings in the logging API.
fn as_decimal<S: Serializer>(v: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(n) => s.collect_str(n),
        None => s.serialize_none(),
    }
}

fn as_duration<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(d) => s.collect_str(&format_args!("{}.{:09}s", d.as_secs(), d.subsec_nanos())),
        None => s.serialize_none(),
    }
}

/// Optional context for out-of-band records.
#[derive(Debug, Clone, Default)]
pub struct LogMetadata {
    pub user: Option<String>,
    pub trace: Option<TraceContext>,
    pub http: Option<HttpMetadata>,
}

/// An out-of-band warning or error.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub error: ErrorDetail,
    pub meta: LogMetadata,
}

impl ErrorEntry {
    pub fn new(error: impl fmt::Display) -> Self {
        Self {
            error: ErrorDetail::new(error.to_string()),
            meta: LogMetadata::default(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.error.stack = Some(stack.into());
        self
    }

    pub fn with_meta(mut self, meta: LogMetadata) -> Self {
        self.meta = meta;
        self
    }
}

pub type SummaryFn = Arc<dyn Fn(&RequestInfo) -> String + Send + Sync>;
pub type ErrorMessageFn = Arc<dyn Fn(&RequestInfo, &CapturedResponse) -> String + Send + Sync>;
pub type UserFn = Arc<dyn Fn(&RequestInfo) -> Option<String> + Send + Sync>;

/// Pluggable pieces of the record builder.
#[derive(Clone)]
pub struct Hooks {
    pub summary: SummaryFn,
    /// Only consulted for WARNING and ERROR records.
    pub error_message: ErrorMessageFn,
    pub user: UserFn,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            summary: Arc::new(default_summary),
            error_message: Arc::new(default_error_message),
            user: Arc::new(|_: &RequestInfo| None::<String>),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

/// `"<METHOD> <PATH>"`, prefixed with `[<request-id>] ` when the request
/// carries `X-Request-ID`.
pub fn default_summary(request: &RequestInfo) -> String {
    let line = format!("{} {}", request.method, request.path());
    match request.request_id() {
        Some(id) => format!("[{id}] {line}"),
        None => line,
    }
}

/// Marker appended to a body-derived message when the mirrored copy hit its cap.
pub const TRUNCATED_MARKER: &str = "...[truncated]";

/// Handler-attached error, else the captured body, else `"<METHOD> <PATH>"`.
pub fn default_error_message(request: &RequestInfo, response: &CapturedResponse) -> String {
    if let Some(error) = response.handler_error() {
        return error.to_owned();
    }
    let mut body = response.body_text();
    if !body.trim().is_empty() {
        if response.is_body_truncated() {
            body.push_str(TRUNCATED_MARKER);
        }
        return body;
    }
    format!("{} {}", request.method, request.path())
}
