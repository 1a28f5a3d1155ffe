//! Cloud Logging / Error Reporting REST client.
//!
//! One [`RemoteSink`] is built at startup and shared by every request. It
//! holds a single [`reqwest::Client`] (pooled connections, internally
//! synchronised), so concurrent requests need no extra locking here.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::{header, Client};
use serde::Serialize;
use serde_json::Value;

use super::{payload_text, ErrorEvent};
use crate::{
    config::LogConfig,
    error::Error,
    record::{HttpMetadata, LogRecord},
    severity::Severity,
};

/// Sink that writes entries through the logging APIs.
pub struct RemoteSink {
    client: Client,
    entries_url: String,
    report_url: String,
    log_name: String,
    resource: MonitoredResource,
    service_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct MonitoredResource {
    #[serde(rename = "type")]
    kind: String,
    labels: BTreeMap<&'static str, String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteEntriesRequest<'a> {
    log_name: &'a str,
    resource: &'a MonitoredResource,
    entries: [Entry<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Entry<'a> {
    severity: Severity,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_payload: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    http_request: Option<&'a HttpMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    span_id: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    trace_sampled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    labels: Option<BTreeMap<&'static str, &'a str>>,
}

impl<'a> Entry<'a> {
    fn new(record: &'a LogRecord) -> Self {
        // jsonPayload must be an object; everything else goes out as text.
        let (text_payload, json_payload) = match &record.payload {
            Value::Object(_) => (None, Some(&record.payload)),
            _ => (Some(payload_text(record)), None),
        };
        let trace = record.trace.as_ref();
        Self {
            severity: record.severity,
            timestamp: record.timestamp,
            text_payload,
            json_payload,
            http_request: record.http.as_ref(),
            trace: trace
                .map(|t| t.trace_id.as_str())
                .filter(|t| !t.is_empty()),
            span_id: trace.map(|t| t.span_id.as_str()).filter(|s| !s.is_empty()),
            trace_sampled: trace.is_some_and(|t| t.sampled),
            labels: record.labels(),
        }
    }
}

impl RemoteSink {
    /// Build the shared client.
    ///
    /// Resolves the access token from the environment variable named in
    /// `config.remote.access_token_env`. A configured but unset variable is an
    /// error: without credentials every write would be rejected.
    pub fn new(config: &LogConfig) -> Result<Self, Error> {
        let remote = &config.remote;
        let mut headers = header::HeaderMap::new();

        if let Some(var) = remote.access_token_env.as_deref() {
            let token = std::env::var(var)
                .ok()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| Error::MissingCredentials { var: var.to_owned() })?;
            let mut value = header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::InvalidCredentials)?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(remote.timeout_ms))
            .build()
            .map_err(|source| Error::ClientBuild {
                sink: "logging",
                source,
            })?;

        let project = &config.project_id;
        let mut labels = BTreeMap::from([("project_id", project.clone())]);
        let kind = match config.resource_type() {
            Some(kind) => {
                labels.insert("service_name", config.service_name.clone());
                kind.to_owned()
            }
            None => "global".to_owned(),
        };

        Ok(Self {
            client,
            entries_url: format!("{}/v2/entries:write", remote.logging_url.trim_end_matches('/')),
            report_url: format!(
                "{}/v1beta1/projects/{project}/events:report",
                remote.error_reporting_url.trim_end_matches('/')
            ),
            log_name: format!(
                "projects/{project}/logs/{}",
                config.service_name.replace('/', "%2F")
            ),
            resource: MonitoredResource { kind, labels },
            service_name: config.service_name.clone(),
        })
    }

    /// `POST /v2/entries:write` with a single entry.
    pub async fn write_log(&self, record: &LogRecord) -> Result<(), Error> {
        let body = WriteEntriesRequest {
            log_name: &self.log_name,
            resource: &self.resource,
            entries: [Entry::new(record)],
        };
        self.post(&self.entries_url, &body).await
    }

    /// `POST /v1beta1/projects/<id>/events:report`.
    pub async fn report_error(&self, record: &LogRecord) -> Result<(), Error> {
        let body = ErrorEvent::new(record, &self.service_name);
        self.post(&self.report_url, &body).await
    }

    async fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<(), Error> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| Error::Transport {
                url: url.to_owned(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Rejected {
                url: url.to_owned(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
