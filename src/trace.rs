//! `X-Cloud-Trace-Context` parsing.
//!
//! The header has the shape `TRACE_ID[/SPAN_ID][;o=TRACE_SAMPLED]`, every part
//! optional. A missing or unparseable header is not an error; it just yields
//! an empty [`TraceContext`].

use std::sync::LazyLock;

use axum::http::HeaderMap;
use regex::Regex;
use serde::Serialize;

/// Name of the trace propagation header set by Google front ends.
pub const TRACE_HEADER: &str = "x-cloud-trace-context";

static TRACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-fA-F]*)(?:/([0-9a-fA-F]*))?(?:;o=([0-9]))?$")
        .expect("trace header pattern is valid")
});

/// Trace identifiers derived once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceContext {
    /// Raw trace id, or `projects/<id>/traces/<trace>` once qualified.
    pub trace_id: String,
    /// Span id; span `0` means "no span" and is stored as empty.
    pub span_id: String,
    pub sampled: bool,
}

impl TraceContext {
    /// Parse a raw header value.
    pub fn parse(header: &str) -> Self {
        let Some(caps) = TRACE_PATTERN.captures(header.trim()) else {
            return Self::default();
        };
        let group = |i| caps.get(i).map(|m| m.as_str()).unwrap_or_default();

        let span_id = match group(2) {
            "0" => "",
            span => span,
        };

        Self {
            trace_id: group(1).to_owned(),
            span_id: span_id.to_owned(),
            sampled: group(3) == "1",
        }
    }

    /// Extract from request headers. Absent or non-UTF-8 values yield an
    /// empty context.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(TRACE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Self::parse)
            .unwrap_or_default()
    }

    /// Rewrite a non-empty trace id into its fully-qualified resource name.
    pub fn qualified(mut self, project_id: &str) -> Self {
        if !self.trace_id.is_empty() && !project_id.is_empty() {
            self.trace_id = format!("projects/{project_id}/traces/{}", self.trace_id);
        }
        self
    }

    /// No trace or span id. `sampled` is ignored: a sampling decision
    /// without an id has nothing to correlate.
    pub fn is_empty(&self) -> bool {
        self.trace_id.is_empty() && self.span_id.is_empty()
    }
}
