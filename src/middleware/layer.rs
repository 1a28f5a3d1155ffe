//! [`tower::Layer`] adapter.

use std::{
    panic::{self, AssertUnwindSafe},
    task::{Context, Poll},
    time::Instant,
};

use axum::http::{Request, Response};
use futures_util::{future::BoxFuture, FutureExt as _};
use tower::{Layer, Service};

use super::{observe, recover};
use crate::{capture::RecordingBody, logger::GcpLog, request::RequestInfo};

/// Wraps a service so every exchange is logged through a [`GcpLog`].
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/", get(index))
///     .layer(GcpLogLayer::new(logger.clone()));
/// ```
#[derive(Clone, Debug)]
pub struct GcpLogLayer {
    logger: GcpLog,
}

impl GcpLogLayer {
    pub fn new(logger: GcpLog) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for GcpLogLayer {
    type Service = GcpLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GcpLogService {
            inner,
            logger: self.logger.clone(),
        }
    }
}

/// Service produced by [`GcpLogLayer`].
#[derive(Clone, Debug)]
pub struct GcpLogService<S> {
    inner: S,
    logger: GcpLog,
}

pub type ResponseFuture<B, E> = BoxFuture<'static, Result<Response<RecordingBody<B>>, E>>;

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for GcpLogService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    ResBody: http_body::Body + Send + 'static,
{
    type Response = Response<RecordingBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<ResBody, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let request = RequestInfo::from_request(&req);
        let started = Instant::now();
        let logger = self.logger.clone();

        // A service may panic while building its future as well as while
        // polling it.
        let inner = &mut self.inner;
        let called = panic::catch_unwind(AssertUnwindSafe(move || inner.call(req)));

        Box::pin(async move {
            let outcome = match called {
                Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            match outcome {
                Ok(Ok(response)) => Ok(observe(&logger, request, started, response)),
                // Service errors are the server's to handle; no response exists to log.
                Ok(Err(err)) => Err(err),
                Err(panic) => Ok(recover(&logger, request, started, panic)),
            }
        })
    }
}
