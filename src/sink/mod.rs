//! Record delivery.
//!
//! Exactly one [`Sink`] is active per [`GcpLog`](crate::GcpLog). Both
//! variants accept the same [`LogRecord`] and are interchangeable:
//!
//! - [`RemoteSink`] calls the Cloud Logging and Error Reporting REST APIs.
//! - [`StreamSink`] writes the structured-logging JSON convention to stderr,
//!   for runtimes whose agent ingests stderr directly.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    config::{LogConfig, SinkKind},
    error::Error,
    record::LogRecord,
};

mod remote;
mod stream;

pub use remote::RemoteSink;
pub use stream::StreamSink;

pub enum Sink {
    Remote(RemoteSink),
    Stream(StreamSink),
}

impl Sink {
    /// Build the sink selected by `config.sink`.
    pub fn from_config(config: &LogConfig) -> Result<Self, Error> {
        Ok(match config.sink {
            SinkKind::Remote => Self::Remote(RemoteSink::new(config)?),
            SinkKind::Stderr => Self::Stream(StreamSink::stderr(&config.service_name)),
        })
    }

    pub fn kind(&self) -> SinkKind {
        match self {
            Self::Remote(_) => SinkKind::Remote,
            Self::Stream(_) => SinkKind::Stderr,
        }
    }

    /// Deliver one log entry.
    pub async fn write_log(&self, record: &LogRecord) -> Result<(), Error> {
        match self {
            Self::Remote(sink) => sink.write_log(record).await,
            Self::Stream(sink) => sink.write_log(record),
        }
    }

    /// Deliver one error event.
    pub async fn report_error(&self, record: &LogRecord) -> Result<(), Error> {
        match self {
            Self::Remote(sink) => sink.report_error(record).await,
            Self::Stream(sink) => sink.report_error(record),
        }
    }

    /// Push out anything buffered. Remote calls are unbuffered.
    pub fn flush(&self) -> Result<(), Error> {
        match self {
            Self::Remote(_) => Ok(()),
            Self::Stream(sink) => sink.flush(),
        }
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Sink").field(&self.kind()).finish()
    }
}

/// Error Reporting `ReportedErrorEvent`, shared by both sinks.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorEvent<'a> {
    pub event_time: DateTime<Utc>,
    pub service_context: ServiceContext<'a>,
    pub message: String,
    #[serde(skip_serializing_if = "ErrorContext::is_empty")]
    pub context: ErrorContext<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ServiceContext<'a> {
    pub service: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorContext<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_request: Option<HttpRequestContext<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<&'a str>,
}

impl ErrorContext<'_> {
    fn is_empty(&self) -> bool {
        self.http_request.is_none() && self.user.is_none()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HttpRequestContext<'a> {
    pub method: &'a str,
    pub url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<&'a str>,
}

impl<'a> ErrorEvent<'a> {
    pub fn new(record: &'a LogRecord, service: &'a str) -> Self {
        let message = match &record.error {
            Some(error) => error.report_text(),
            None => payload_text(record),
        };
        let http_request = record.http.as_ref().map(|http| HttpRequestContext {
            method: &http.request_method,
            url: &http.request_url,
            user_agent: http.user_agent.as_deref(),
            referrer: http.referer.as_deref(),
            response_status_code: (http.status != 0).then_some(http.status),
            remote_ip: http.remote_ip.as_deref(),
        });

        Self {
            event_time: record.timestamp,
            service_context: ServiceContext { service },
            message,
            context: ErrorContext {
                http_request,
                user: record.user.as_deref(),
            },
        }
    }
}

/// Payload rendered as plain text: strings verbatim, anything else as JSON.
pub(crate) fn payload_text(record: &LogRecord) -> String {
    match &record.payload {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::{ErrorDetail, HttpMetadata},
        severity::Severity,
    };
    use serde_json::json;

    #[test]
    fn error_event_carries_stack_and_request_context() {
        let record = LogRecord::new(Severity::Error, "boom")
            .with_error(ErrorDetail::new("boom").with_stack("frame 0"))
            .with_user(Some("alice".into()))
            .with_http(HttpMetadata {
                request_method: "GET".into(),
                request_url: "/panic".into(),
                status: 500,
                remote_ip: Some("10.0.0.1".into()),
                ..HttpMetadata::default()
            });

        let json = serde_json::to_value(ErrorEvent::new(&record, "svc")).unwrap();
        assert_eq!(json["serviceContext"], json!({ "service": "svc" }));
        assert_eq!(json["message"], "boom\nframe 0");
        assert_eq!(
            json["context"],
            json!({
                "httpRequest": {
                    "method": "GET",
                    "url": "/panic",
                    "responseStatusCode": 500,
                    "remoteIp": "10.0.0.1",
                },
                "user": "alice",
            })
        );
    }

    #[test]
    fn error_event_without_context_omits_it() {
        let record = LogRecord::new(Severity::Warning, json!({ "code": 7 }));
        let json = serde_json::to_value(ErrorEvent::new(&record, "svc")).unwrap();
        assert!(json.get("context").is_none());
        assert_eq!(json["message"], "{\"code\":7}");
    }

    #[test]
    fn stderr_is_the_default_sink() {
        let sink = Sink::from_config(&LogConfig::new("p", "s")).unwrap();
        assert_eq!(sink.kind(), SinkKind::Stderr);
    }
}
