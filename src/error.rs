//! Error types.
//!
//! [`Error`] covers everything that can go wrong inside gcplog: bad
//! configuration and sink construction are returned from
//! [`GcpLog::new`](crate::GcpLog::new) so the caller can refuse to start;
//! transport and encoding failures only ever surface in local diagnostics.
//!
//! [`AppError`] is for the *application's* handlers. It wraps
//! [`anyhow::Error`], renders a 500 JSON body, and tags the response with a
//! [`HandlerError`] extension so the middleware reports the real cause rather
//! than the generic body.
//!
//! # Example
//!
//! ```rust,ignore
//! async fn my_handler(State(db): State<Db>) -> Result<Json<Value>, AppError> {
//!     let row = db.fetch().await?;
//!     Ok(Json(row))
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("credentials variable `{var}` is not set")]
    MissingCredentials { var: String },

    #[error("access token contains characters not allowed in an Authorization header")]
    InvalidCredentials,

    #[error("building {sink} client: {source}")]
    ClientBuild {
        sink: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("POST {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },

    #[error("encoding log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("writing log entry: {0}")]
    Io(#[from] std::io::Error),
}

/// Response extension carrying the error a handler failed with.
///
/// Insert it into any response to override the body-derived error message:
///
/// ```rust,ignore
/// let mut resp = StatusCode::CONFLICT.into_response();
/// resp.extensions_mut().insert(HandlerError::new("version mismatch"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Wraps [`anyhow::Error`] so it can be returned from axum handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    /// Use a status other than 500.
    pub fn with_status(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = format!("{:#}", self.error);
        let mut response = (self.status, Json(json!({ "error": message.clone() }))).into_response();
        response.extensions_mut().insert(HandlerError(message));
        response
    }
}

/// Convert any `Into<anyhow::Error>` into a 500 [`AppError`].
impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, e)
    }
}
