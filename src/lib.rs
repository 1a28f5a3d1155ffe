//! HTTP request logging and error reporting for Google Cloud.
//!
//! Every request passing through [`GcpLogLayer`] (or the
//! [`gcplog_middleware`] `from_fn` adapter) produces exactly one structured
//! log record carrying Cloud Logging `httpRequest` metadata and, when the
//! `X-Cloud-Trace-Context` header is present, trace correlation. Responses
//! with status `>= 400` are logged as WARNING/ERROR and, in production, also
//! sent to Error Reporting. A panicking handler is turned into a plain
//! `500 Internal Server Error` and reported with its stack.
//!
//! ```rust,ignore
//! let logger = GcpLog::new(&config.logging)?;
//! let app = Router::new()
//!     .route("/", get(index))
//!     .layer(GcpLogLayer::new(logger.clone()));
//! axum::serve(listener, app).await?;
//! logger.close().await;
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod logger;
pub mod middleware;
pub mod record;
pub mod request;
pub mod severity;
pub mod sink;
pub mod trace;

#[cfg(test)]
mod test_support;

pub use capture::{CaptureSettings, CapturedResponse};
pub use config::{Config, LogConfig, RemoteConfig, ServerConfig, SinkKind};
pub use error::{AppError, Error, HandlerError};
pub use logger::{GcpLog, GcpLogBuilder};
pub use middleware::{gcplog_middleware, GcpLogLayer, GcpLogService};
pub use record::{ErrorDetail, ErrorEntry, HttpMetadata, LogMetadata, LogRecord};
pub use request::RequestInfo;
pub use severity::Severity;
pub use trace::TraceContext;
