//! Structured JSON lines on a byte stream.
//!
//! The line layout follows Cloud Logging's structured-logging convention:
//! `severity`, `message`, `httpRequest` and `timestamp` are top-level keys and
//! trace data goes under the `logging.googleapis.com/*` special keys. Error
//! reports become an extra line tagged with the `ReportedErrorEvent` type so
//! Error Reporting picks them up from the same stream.

use std::{
    collections::BTreeMap,
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::ErrorEvent;
use crate::{
    error::Error,
    record::{HttpMetadata, LogRecord},
    severity::Severity,
};

const REPORTED_ERROR_EVENT: &str =
    "type.googleapis.com/google.devtools.clouderrorreporting.v1beta1.ReportedErrorEvent";

/// Writes one JSON object per line to a shared writer (stderr by default).
pub struct StreamSink {
    out: Mutex<Box<dyn Write + Send>>,
    service_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamEntry<'a> {
    severity: Severity,
    message: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_request: Option<&'a HttpMetadata>,
    timestamp: DateTime<Utc>,
    #[serde(
        rename = "logging.googleapis.com/labels",
        skip_serializing_if = "Option::is_none"
    )]
    labels: Option<BTreeMap<&'static str, &'a str>>,
    #[serde(
        rename = "logging.googleapis.com/spanId",
        skip_serializing_if = "Option::is_none"
    )]
    span_id: Option<&'a str>,
    #[serde(
        rename = "logging.googleapis.com/trace",
        skip_serializing_if = "Option::is_none"
    )]
    trace: Option<&'a str>,
    #[serde(
        rename = "logging.googleapis.com/trace_sampled",
        skip_serializing_if = "std::ops::Not::not"
    )]
    trace_sampled: bool,
}

impl<'a> StreamEntry<'a> {
    fn new(record: &'a LogRecord) -> Self {
        let trace = record.trace.as_ref();
        let non_empty = |s: &'a String| (!s.is_empty()).then_some(s.as_str());
        Self {
            severity: record.severity,
            message: &record.payload,
            http_request: record.http.as_ref(),
            timestamp: record.timestamp,
            labels: record.labels(),
            span_id: trace.and_then(|t| non_empty(&t.span_id)),
            trace: trace.and_then(|t| non_empty(&t.trace_id)),
            trace_sampled: trace.is_some_and(|t| t.sampled),
        }
    }
}

#[derive(Serialize)]
struct ErrorLine<'a> {
    #[serde(rename = "@type")]
    kind: &'static str,
    severity: Severity,
    #[serde(flatten)]
    entry: ErrorEvent<'a>,
    #[serde(
        rename = "logging.googleapis.com/trace",
        skip_serializing_if = "Option::is_none"
    )]
    trace: Option<&'a str>,
}

impl StreamSink {
    pub fn stderr(service_name: impl Into<String>) -> Self {
        Self::new(io::stderr(), service_name)
    }

    pub fn new(writer: impl Write + Send + 'static, service_name: impl Into<String>) -> Self {
        Self {
            out: Mutex::new(Box::new(writer)),
            service_name: service_name.into(),
        }
    }

    pub fn write_log(&self, record: &LogRecord) -> Result<(), Error> {
        self.write_line(&StreamEntry::new(record))
    }

    pub fn report_error(&self, record: &LogRecord) -> Result<(), Error> {
        let line = ErrorLine {
            kind: REPORTED_ERROR_EVENT,
            severity: record.severity,
            entry: ErrorEvent::new(record, &self.service_name),
            trace: record
                .trace
                .as_ref()
                .map(|t| t.trace_id.as_str())
                .filter(|t| !t.is_empty()),
        };
        self.write_line(&line)
    }

    pub fn flush(&self) -> Result<(), Error> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.flush()?;
        Ok(())
    }

    /// Encode fully before taking the lock so a failed encode never leaves a
    /// partial line behind.
    ///
    /// This is a blocking write on the calling (runtime worker) thread. The
    /// lock is held for one `write_all` of a single line, which stderr
    /// absorbs without stalling; a writer that can block for long belongs
    /// behind `spawn_blocking` instead.
    fn write_line<T: Serialize>(&self, value: &T) -> Result<(), Error> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        Ok(())
    }
}
