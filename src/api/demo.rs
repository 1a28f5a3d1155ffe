//! Demo routes, one per logging outcome.
//!
//! | Route      | Response                        | Record            |
//! |------------|---------------------------------|-------------------|
//! | `/hello`   | 200 text                        | INFO, plus one out-of-band INFO |
//! | `/missing` | 404 `not found`                 | WARNING           |
//! | `/reject`  | 422 JSON via [`AppError`]       | WARNING           |
//! | `/fail`    | 500 JSON via [`AppError`]       | ERROR             |
//! | `/panic`   | handler panic → 500             | ERROR with stack  |

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use gcplog::{request::REQUEST_ID_HEADER, AppError, GcpLog};
use serde_json::json;

use super::health::healthz;

pub fn router(logger: GcpLog) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/hello", get(hello))
        .route("/missing", get(missing))
        .route("/reject", get(reject))
        .route("/fail", get(fail))
        .route("/panic", get(explode))
        .with_state(logger)
}

async fn hello(State(logger): State<GcpLog>, headers: HeaderMap) -> &'static str {
    logger.log(json!({
        "event": "greeted",
        "request_id": headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()),
    }));
    "hello"
}

async fn missing() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

async fn reject() -> Result<&'static str, AppError> {
    Err(AppError::with_status(
        StatusCode::UNPROCESSABLE_ENTITY,
        anyhow::anyhow!("quantity must be positive"),
    ))
}

async fn fail() -> Result<String, AppError> {
    let quantity: u32 = "not-a-number".parse()?;
    Ok(format!("ordered {quantity}"))
}

async fn explode() -> &'static str {
    panic!("demo handler panicked")
}
