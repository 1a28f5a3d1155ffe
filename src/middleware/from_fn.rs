//! axum `from_fn` adapter.

use std::{panic::AssertUnwindSafe, time::Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use futures_util::FutureExt as _;

use super::{observe, recover};
use crate::{logger::GcpLog, request::RequestInfo};

/// Logs the exchange handled by `next`.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/", get(index))
///     .layer(axum::middleware::from_fn_with_state(logger.clone(), gcplog_middleware));
/// ```
pub async fn gcplog_middleware(
    State(logger): State<GcpLog>,
    req: Request,
    next: Next,
) -> Response {
    let request = RequestInfo::from_request(&req);
    let started = Instant::now();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => observe(&logger, request, started, response).map(Body::new),
        Err(panic) => recover::<Body>(&logger, request, started, panic).map(Body::new),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::to_bytes,
        http::StatusCode,
        middleware::from_fn_with_state,
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt as _;

    use super::*;
    use crate::{
        config::LogConfig,
        sink::{Sink, StreamSink},
        test_support::SharedBuf,
    };

    fn setup() -> (Router, GcpLog, SharedBuf) {
        let buf = SharedBuf::default();
        let logger = GcpLog::builder(&LogConfig::new("proj", "svc"))
            .sink(Sink::Stream(StreamSink::new(buf.clone(), "svc")))
            .production(false)
            .build()
            .unwrap();

        let app = Router::new()
            .route("/hello", get(|| async { "hi" }))
            .route("/echo", post(|body: String| async move { body }))
            .route(
                "/teapot",
                get(|| async { (StatusCode::IM_A_TEAPOT, "short and stout") }),
            )
            .route("/panic", get(boom))
            .layer(from_fn_with_state(logger.clone(), gcplog_middleware));
        (app, logger, buf)
    }

    async fn boom() -> &'static str {
        panic!("from_fn boom")
    }

    fn get_req(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn success_passes_through_and_logs_info() {
        let (app, logger, buf) = setup();
        let resp = app.oneshot(get_req("/hello")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hi");
        logger.flush().await;

        let line = &buf.lines()[0];
        assert_eq!(line["severity"], "INFO");
        assert_eq!(line["message"], "GET /hello");
    }

    #[tokio::test]
    async fn request_size_comes_from_content_length() {
        let (app, logger, buf) = setup();
        let req = Request::builder()
            .method("POST")
            .uri("/echo")
            .header("content-length", "5")
            .body(Body::from("hello"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello");
        logger.flush().await;

        let line = &buf.lines()[0];
        assert_eq!(line["httpRequest"]["requestMethod"], "POST");
        assert_eq!(line["httpRequest"]["requestSize"], "5");
    }

    #[tokio::test]
    async fn client_error_quotes_body() {
        let (app, logger, buf) = setup();
        let resp = app.oneshot(get_req("/teapot")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
        to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        logger.flush().await;

        let line = &buf.lines()[0];
        assert_eq!(line["severity"], "WARNING");
        assert_eq!(line["message"], "short and stout");
        assert_eq!(line["httpRequest"]["status"], 418);
    }

    #[tokio::test]
    async fn panic_is_absorbed() {
        let (app, logger, buf) = setup();
        let resp = app.oneshot(get_req("/panic")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Internal Server Error");
        logger.flush().await;

        let lines = buf.lines();
        assert_eq!(lines.len(), 1, "no error report outside production");
        assert_eq!(lines[0]["severity"], "ERROR");
        assert_eq!(lines[0]["message"], "from_fn boom");
    }
}
