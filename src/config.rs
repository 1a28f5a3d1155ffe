//! Configuration types for gcplog.
//!
//! Config is loaded once at startup from a TOML file and validated before the
//! server opens any ports. A missing project or service name is rejected with
//! a typed [`ConfigError`] rather than silently producing unlabelled logs.
//!
//! # Example
//! ```toml
//! [server]
//! port = 8080
//!
//! [logging]
//! project_id    = "my-project"
//! service_name  = "orders-api"
//! resource_type = "cloud_run_revision"
//! sink          = "remote"
//!
//! [logging.remote]
//! access_token_env = "GCP_ACCESS_TOKEN"
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::capture::CaptureSettings;

/// Where records are delivered.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Cloud Logging and Error Reporting REST APIs.
    Remote,
    /// One JSON object per line on stderr, for platforms that ingest stderr
    /// (Cloud Run, GKE, Cloud Functions).
    #[default]
    Stderr,
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::Stderr => "stderr",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("logging.project_id is required")]
    MissingProjectId,
    #[error("logging.service_name is required")]
    MissingServiceName,
    #[error("logging.remote.timeout_ms must be greater than zero")]
    ZeroTimeout,
}

/// Top-level configuration for the demo binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub logging: LogConfig,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).context("parsing config TOML")?;
        config.logging.validate()?;
        Ok(config)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen port (default: 8080).
    #[serde(default = "defaults::port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::port(),
        }
    }
}

/// Everything [`GcpLog`](crate::GcpLog) needs to construct its sinks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Google Cloud project that owns the logs.
    #[serde(default)]
    pub project_id: String,

    /// Log name and Error Reporting service name.
    #[serde(default)]
    pub service_name: String,

    /// Monitored resource type, e.g. `cloud_run_revision`. Entries use the
    /// `global` resource when unset.
    #[serde(default)]
    pub resource_type: Option<String>,

    #[serde(default)]
    pub sink: SinkKind,

    /// Environment variable holding the deployment environment name.
    #[serde(default = "defaults::environment_var")]
    pub environment_var: String,

    /// Value of `environment_var` that enables error reporting.
    #[serde(default = "defaults::production_value")]
    pub production_value: String,

    /// Mirror response bodies so 4xx/5xx records can quote them.
    #[serde(default = "defaults::capture_body")]
    pub capture_body: bool,

    /// Cap on the mirrored body copy, in bytes (default: 8192).
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,

    /// Include the serialized response headers in `responseSize`.
    #[serde(default = "defaults::count_header_bytes")]
    pub count_header_bytes: bool,

    #[serde(default)]
    pub remote: RemoteConfig,
}

impl LogConfig {
    /// Config with every optional field at its default.
    pub fn new(project_id: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            service_name: service_name.into(),
            resource_type: None,
            sink: SinkKind::default(),
            environment_var: defaults::environment_var(),
            production_value: defaults::production_value(),
            capture_body: defaults::capture_body(),
            max_body_bytes: defaults::max_body_bytes(),
            count_header_bytes: defaults::count_header_bytes(),
            remote: RemoteConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingProjectId);
        }
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingServiceName);
        }
        if self.remote.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Resource type with blank values treated as unset.
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn capture(&self) -> CaptureSettings {
        CaptureSettings {
            capture_body: self.capture_body,
            max_body_bytes: self.max_body_bytes,
            count_header_bytes: self.count_header_bytes,
        }
    }

    /// Whether the process environment marks this deployment as production.
    pub fn is_production(&self) -> bool {
        std::env::var(&self.environment_var).is_ok_and(|v| v == self.production_value)
    }
}

/// Endpoints and credentials for [`SinkKind::Remote`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "defaults::logging_url")]
    pub logging_url: String,

    #[serde(default = "defaults::error_reporting_url")]
    pub error_reporting_url: String,

    /// Environment variable whose value is an OAuth2 access token. Leave unset
    /// when a proxy in front of the APIs injects credentials.
    #[serde(default)]
    pub access_token_env: Option<String>,

    /// Per-request timeout in milliseconds (default: 10 000).
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            logging_url: defaults::logging_url(),
            error_reporting_url: defaults::error_reporting_url(),
            access_token_env: None,
            timeout_ms: defaults::timeout_ms(),
        }
    }
}

mod defaults {
    pub fn port() -> u16 { 8080 }
    pub fn environment_var() -> String { "APP_ENV".into() }
    pub fn production_value() -> String { "production".into() }
    pub fn capture_body() -> bool { true }
    pub fn max_body_bytes() -> usize { 8 * 1024 }
    pub fn count_header_bytes() -> bool { true }
    pub fn logging_url() -> String { "https://logging.googleapis.com".into() }
    pub fn error_reporting_url() -> String { "https://clouderrorreporting.googleapis.com".into() }
    pub fn timeout_ms() -> u64 { 10_000 }
}
