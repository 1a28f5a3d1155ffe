//! Request/response observation.
//!
//! Two adapters share the same core:
//!
//! - [`GcpLogLayer`] is a plain [`tower::Layer`], usable around any
//!   `Service<Request<B>>` (handler → handler composition).
//! - [`gcplog_middleware`] plugs into axum's handler chain through
//!   [`axum::middleware::from_fn_with_state`].
//!
//! Per request: `ENTERED → HANDLER_RUNNING → {COMPLETED | PANICKED} →
//! EMITTED`. A panicking handler is absorbed here and the client receives a
//! complete `500 Internal Server Error`.

use std::{any::Any, backtrace::Backtrace, time::Instant};

use axum::http::{header, HeaderValue, Response, StatusCode};
use bytes::Bytes;
use tracing::error;

use crate::{
    capture::{CapturedResponse, Recorder, RecordingBody},
    error::HandlerError,
    logger::GcpLog,
    record::ErrorDetail,
    request::RequestInfo,
};

mod from_fn;
mod layer;

pub use from_fn::gcplog_middleware;
pub use layer::{GcpLogLayer, GcpLogService, ResponseFuture};

/// COMPLETED: install the interceptor on a response produced by the handler.
pub(crate) fn observe<B>(
    logger: &GcpLog,
    request: RequestInfo,
    started: Instant,
    response: Response<B>,
) -> Response<RecordingBody<B>>
where
    B: http_body::Body,
{
    let (parts, body) = response.into_parts();

    // The server derives Content-Length from an exact size hint after this
    // layer has run.
    let mut captured = CapturedResponse::new(logger.capture_settings());
    captured.commit_head(parts.status, &parts.headers, body.size_hint().exact());
    if let Some(HandlerError(message)) = parts.extensions.get::<HandlerError>() {
        captured.set_handler_error(message.clone());
    }

    let recorder = Recorder::new(logger.clone(), request, captured, started, None);
    Response::from_parts(parts, RecordingBody::new(body, recorder))
}

/// PANICKED: synthesize the 500 and report the panic.
pub(crate) fn recover<B>(
    logger: &GcpLog,
    request: RequestInfo,
    started: Instant,
    panic: Box<dyn Any + Send>,
) -> Response<RecordingBody<B>> {
    let message = panic_message(panic.as_ref());
    // Captured here; the panicking frames have already unwound.
    let stack = Backtrace::force_capture().to_string();
    error!(
        method = %request.method,
        path = %request.path(),
        panic = %message,
        "handler panicked"
    );

    let body = Bytes::from_static(b"Internal Server Error");
    let mut response = Response::new(());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));

    let mut captured = CapturedResponse::new(logger.capture_settings());
    captured.set_status(response.status(), response.headers());

    let detail = ErrorDetail::new(message).with_stack(stack);
    let recorder = Recorder::new(logger.clone(), request, captured, started, Some(detail));
    response.map(|()| RecordingBody::fixed(body, recorder))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_str_and_string_payloads() {
        let p: Box<dyn Any + Send> = Box::new("static msg");
        assert_eq!(panic_message(p.as_ref()), "static msg");

        let p: Box<dyn Any + Send> = Box::new(String::from("owned msg"));
        assert_eq!(panic_message(p.as_ref()), "owned msg");

        let p: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(p.as_ref()), "handler panicked");
    }
}
