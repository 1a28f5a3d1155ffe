//! The long-lived logging handle.
//!
//! [`GcpLog`] is built once at startup and cloned into the middleware; clones
//! share one sink and one task tracker. Every record is delivered on a
//! background task so a slow or hung sink never delays a response. Use
//! [`GcpLog::flush`] to wait for in-flight deliveries and [`GcpLog::close`] at
//! shutdown.

use std::{
    backtrace::Backtrace,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::{
    capture::{CaptureSettings, CapturedResponse},
    config::LogConfig,
    error::Error,
    record::{ErrorDetail, ErrorEntry, Hooks, HttpMetadata, LogMetadata, LogRecord},
    request::RequestInfo,
    severity::Severity,
    sink::Sink,
    trace::TraceContext,
};

/// Cheap-to-clone handle onto the shared sink.
#[derive(Clone)]
pub struct GcpLog {
    inner: Arc<Inner>,
}

struct Inner {
    project_id: String,
    capture: CaptureSettings,
    production: bool,
    hooks: Hooks,
    sink: Sink,
    /// Tracker for deliveries dispatched since the last flush.
    tasks: Mutex<TaskTracker>,
    /// Serializes flushes so each one covers everything dispatched before it.
    flush_lock: tokio::sync::Mutex<()>,
}

/// Builder for [`GcpLog`] with overridable hooks.
pub struct GcpLogBuilder {
    config: LogConfig,
    hooks: Hooks,
    sink: Option<Sink>,
    production: Option<bool>,
}

impl GcpLogBuilder {
    /// Replace the summary builder (default: `"[<request-id>] <METHOD> <PATH>"`).
    pub fn summary<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestInfo) -> String + Send + Sync + 'static,
    {
        self.hooks.summary = Arc::new(f);
        self
    }

    /// Replace the error-message builder used for WARNING/ERROR records
    /// (default: handler error, else body text, else method and path).
    pub fn error_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestInfo, &CapturedResponse) -> String + Send + Sync + 'static,
    {
        self.hooks.error_message = Arc::new(f);
        self
    }

    /// Set a user-identity extractor (default: none).
    pub fn user<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestInfo) -> Option<String> + Send + Sync + 'static,
    {
        self.hooks.user = Arc::new(f);
        self
    }

    /// Use a pre-built sink instead of the one `config.sink` selects.
    pub fn sink(mut self, sink: Sink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Override the production gate instead of reading the environment.
    pub fn production(mut self, production: bool) -> Self {
        self.production = Some(production);
        self
    }

    pub fn build(self) -> Result<GcpLog, Error> {
        self.config.validate()?;
        let sink = match self.sink {
            Some(sink) => sink,
            None => Sink::from_config(&self.config)?,
        };
        let production = self
            .production
            .unwrap_or_else(|| self.config.is_production());

        debug!(
            project_id = %self.config.project_id,
            service = %self.config.service_name,
            sink = %sink.kind(),
            production,
            "gcplog initialised"
        );

        Ok(GcpLog {
            inner: Arc::new(Inner {
                project_id: self.config.project_id.clone(),
                capture: self.config.capture(),
                production,
                hooks: self.hooks,
                sink,
                tasks: Mutex::new(TaskTracker::new()),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

impl GcpLog {
    /// Build a handle with default hooks.
    ///
    /// # Errors
    /// Returns an error when the config is incomplete or the sink cannot be
    /// constructed. Callers are expected to treat both as fatal.
    pub fn new(config: &LogConfig) -> Result<Self, Error> {
        Self::builder(config).build()
    }

    pub fn builder(config: &LogConfig) -> GcpLogBuilder {
        GcpLogBuilder {
            config: config.clone(),
            hooks: Hooks::default(),
            sink: None,
            production: None,
        }
    }

    pub fn is_production(&self) -> bool {
        self.inner.production
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        self.inner.capture
    }

    /// INFO record with no request context.
    pub fn log(&self, payload: impl Into<Value>) {
        self.dispatch(LogRecord::new(Severity::Info, payload));
    }

    /// INFO record with optional user/trace/HTTP context.
    pub fn log_with(&self, payload: impl Into<Value>, meta: LogMetadata) {
        self.dispatch(apply_meta(LogRecord::new(Severity::Info, payload), meta));
    }

    /// WARNING record; also reported as an error in production.
    pub fn warn(&self, entry: ErrorEntry) {
        self.dispatch(self.error_record(Severity::Warning, entry));
    }

    /// ERROR record; also reported as an error in production.
    pub fn error(&self, entry: ErrorEntry) {
        self.dispatch(self.error_record(Severity::Error, entry));
    }

    /// In production a missing stack is captured here, at the call site of
    /// `warn`/`error`; Error Reporting rejects events without one.
    fn error_record(&self, severity: Severity, entry: ErrorEntry) -> LogRecord {
        let mut error = entry.error;
        if error.stack.is_none() && self.inner.production {
            error = error.with_stack(Backtrace::force_capture().to_string());
        }
        let record = LogRecord::new(severity, error.message.clone()).with_error(error);
        apply_meta(record, entry.meta)
    }

    /// Build and dispatch the record for one finished exchange.
    pub(crate) fn record_exchange(
        &self,
        request: &RequestInfo,
        response: &CapturedResponse,
        latency: Duration,
        panic: Option<ErrorDetail>,
    ) {
        self.dispatch(self.build_record(request, response, latency, panic));
    }

    /// Pure record construction for one exchange.
    pub(crate) fn build_record(
        &self,
        request: &RequestInfo,
        response: &CapturedResponse,
        latency: Duration,
        panic: Option<ErrorDetail>,
    ) -> LogRecord {
        let hooks = &self.inner.hooks;
        let severity = Severity::from_status(response.status());
        let trace = TraceContext::from_headers(&request.headers).qualified(&self.inner.project_id);

        let record = if severity.is_reportable() {
            let error = panic.unwrap_or_else(|| {
                let detail = ErrorDetail::new((hooks.error_message)(request, response));
                // Stacks only matter to Error Reporting, which is production-only.
                if self.inner.production {
                    detail.with_stack(Backtrace::force_capture().to_string())
                } else {
                    detail
                }
            });
            LogRecord::new(severity, error.message.clone()).with_error(error)
        } else {
            LogRecord::new(severity, (hooks.summary)(request))
        };

        record
            .with_http(HttpMetadata::from_exchange(request, response, latency))
            .with_trace(trace)
            .with_user((hooks.user)(request))
    }

    /// Hand a record to the sink on a background task.
    ///
    /// Failures are logged locally and dropped; they never reach the client.
    fn dispatch(&self, record: LogRecord) {
        let Ok(handle) = Handle::try_current() else {
            warn!(severity = %record.severity, "no tokio runtime available; log record dropped");
            return;
        };
        let inner = Arc::clone(&self.inner);
        let tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.spawn_on(
            async move {
                if let Err(e) = inner.sink.write_log(&record).await {
                    warn!(error = %e, severity = %record.severity, "failed to write log entry");
                }
                if record.severity.is_reportable() && inner.production {
                    if let Err(e) = inner.sink.report_error(&record).await {
                        warn!(error = %e, "failed to report error event");
                    }
                }
            },
            &handle,
        );
    }

    /// Wait until every record dispatched so far has been delivered (or has
    /// failed), then flush the sink.
    ///
    /// Records dispatched while the flush is waiting go to a fresh tracker,
    /// so ongoing traffic cannot hold a flush open.
    pub async fn flush(&self) {
        let _serial = self.inner.flush_lock.lock().await;
        let pending = {
            let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *tasks, TaskTracker::new())
        };
        pending.close();
        pending.wait().await;
        if let Err(e) = self.inner.sink.flush() {
            warn!(error = %e, "failed to flush log sink");
        }
    }

    /// Drain in-flight deliveries at shutdown.
    pub async fn close(&self) {
        self.flush().await;
        debug!("gcplog closed");
    }
}

impl fmt::Debug for GcpLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpLog")
            .field("project_id", &self.inner.project_id)
            .field("sink", &self.inner.sink)
            .field("production", &self.inner.production)
            .finish_non_exhaustive()
    }
}

fn apply_meta(record: LogRecord, meta: LogMetadata) -> LogRecord {
    let record = record.with_user(meta.user);
    let record = match meta.trace {
        Some(trace) => record.with_trace(trace),
        None => record,
    };
    match meta.http {
        Some(http) => record.with_http(http),
        None => record,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SinkKind, sink::StreamSink, test_support::SharedBuf};
    use axum::{
        body::Body,
        http::{HeaderMap, Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn config() -> LogConfig {
        LogConfig::new("proj", "svc")
    }

    fn stream_logger(production: bool) -> (GcpLog, SharedBuf) {
        let buf = SharedBuf::default();
        let logger = GcpLog::builder(&config())
            .sink(Sink::Stream(StreamSink::new(buf.clone(), "svc")))
            .production(production)
            .build()
            .unwrap();
        (logger, buf)
    }

    fn request(uri: &str) -> RequestInfo {
        RequestInfo::from_request(
            &Request::builder()
                .uri(uri)
                .header("x-cloud-trace-context", "abc123/456;o=1")
                .body(Body::empty())
                .unwrap(),
        )
    }

    fn response(status: StatusCode, body: &[u8]) -> CapturedResponse {
        let mut captured = CapturedResponse::new(CaptureSettings::default());
        captured.set_status(status, &HeaderMap::new());
        captured.write(body);
        captured
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn new_rejects_missing_identifiers() {
        let err = GcpLog::new(&LogConfig::new("", "svc")).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err}");
        let err = GcpLog::new(&LogConfig::new("proj", "")).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err}");
    }

    #[test]
    fn new_fails_when_remote_credentials_are_missing() {
        let mut cfg = config();
        cfg.sink = SinkKind::Remote;
        cfg.remote.access_token_env = Some("GCPLOG_LOGGER_TEST_NO_SUCH_TOKEN".into());
        let err = GcpLog::new(&cfg).unwrap_err();
        assert!(matches!(err, Error::MissingCredentials { .. }), "got {err}");
    }

    #[test]
    fn production_override_wins_over_environment() {
        let (logger, _) = stream_logger(true);
        assert!(logger.is_production());
    }

    // -----------------------------------------------------------------------
    // build_record
    // -----------------------------------------------------------------------

    #[test]
    fn success_record_uses_summary_and_trace() {
        let (logger, _) = stream_logger(false);
        let record = logger.build_record(
            &request("/ok"),
            &response(StatusCode::OK, b"fine"),
            Duration::from_millis(3),
            None,
        );
        assert_eq!(record.severity, Severity::Info);
        assert_eq!(record.payload, json!("GET /ok"));
        assert!(record.error.is_none());
        let trace = record.trace.unwrap();
        assert_eq!(trace.trace_id, "projects/proj/traces/abc123");
        assert_eq!(trace.span_id, "456");
        assert!(trace.sampled);
        assert_eq!(record.http.unwrap().status, 200);
    }

    #[test]
    fn client_error_record_quotes_body() {
        let (logger, _) = stream_logger(false);
        let record = logger.build_record(
            &request("/missing"),
            &response(StatusCode::NOT_FOUND, b"not found"),
            Duration::ZERO,
            None,
        );
        assert_eq!(record.severity, Severity::Warning);
        let error = record.error.unwrap();
        assert_eq!(error.message, "not found");
        assert!(error.stack.is_none(), "no stack outside production");
        assert_eq!(record.payload, json!("not found"));
    }

    #[test]
    fn server_error_record_in_production_has_stack() {
        let (logger, _) = stream_logger(true);
        let record = logger.build_record(
            &request("/fail"),
            &response(StatusCode::BAD_GATEWAY, b""),
            Duration::ZERO,
            None,
        );
        assert_eq!(record.severity, Severity::Error);
        let error = record.error.unwrap();
        assert_eq!(error.message, "GET /fail");
        assert!(error.stack.is_some());
    }

    #[test]
    fn panic_detail_overrides_error_builder() {
        let (logger, _) = stream_logger(false);
        let record = logger.build_record(
            &request("/panic"),
            &response(StatusCode::INTERNAL_SERVER_ERROR, b"Internal Server Error"),
            Duration::ZERO,
            Some(ErrorDetail::new("kaboom").with_stack("frames")),
        );
        let error = record.error.unwrap();
        assert_eq!(error.message, "kaboom");
        assert_eq!(error.stack.as_deref(), Some("frames"));
    }

    #[test]
    fn custom_hooks_are_used() {
        let logger = GcpLog::builder(&config())
            .sink(Sink::Stream(StreamSink::new(SharedBuf::default(), "svc")))
            .production(false)
            .summary(|req| format!("handled {}", req.path()))
            .error_message(|_, resp| format!("status {}", resp.status().as_u16()))
            .user(|req| req.header("x-user").map(str::to_owned))
            .build()
            .unwrap();

        let req = RequestInfo::from_request(
            &Request::builder()
                .uri("/me")
                .header("x-user", "carol")
                .body(Body::empty())
                .unwrap(),
        );
        let ok = logger.build_record(&req, &response(StatusCode::OK, b""), Duration::ZERO, None);
        assert_eq!(ok.payload, json!("handled /me"));
        assert_eq!(ok.user.as_deref(), Some("carol"));

        let bad = logger.build_record(
            &req,
            &response(StatusCode::FORBIDDEN, b"nope"),
            Duration::ZERO,
            None,
        );
        assert_eq!(bad.error.unwrap().message, "status 403");
    }

    // -----------------------------------------------------------------------
    // Out-of-band API + dispatch
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn out_of_band_log_has_no_http_metadata() {
        let (logger, buf) = stream_logger(false);
        logger.log("cache warmed");
        logger.flush().await;

        let lines = buf.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["severity"], "INFO");
        assert_eq!(lines[0]["message"], "cache warmed");
        assert!(lines[0].get("httpRequest").is_none());
    }

    #[tokio::test]
    async fn log_with_attaches_metadata() {
        let (logger, buf) = stream_logger(false);
        logger.log_with(
            json!({ "event": "login" }),
            LogMetadata {
                user: Some("dave".into()),
                trace: Some(TraceContext::parse("beef").qualified("proj")),
                http: None,
            },
        );
        logger.flush().await;

        let line = &buf.lines()[0];
        assert_eq!(line["message"], json!({ "event": "login" }));
        assert_eq!(line["logging.googleapis.com/labels"]["user"], "dave");
        assert_eq!(line["logging.googleapis.com/trace"], "projects/proj/traces/beef");
    }

    #[tokio::test]
    async fn errors_are_only_reported_in_production() {
        let (dev, dev_buf) = stream_logger(false);
        dev.error(ErrorEntry::new("disk full"));
        dev.warn(ErrorEntry::new("slow query"));
        dev.flush().await;
        let lines = dev_buf.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.get("@type").is_none()));

        let (prod, prod_buf) = stream_logger(true);
        prod.error(ErrorEntry::new("disk full").with_stack("trace"));
        prod.flush().await;
        let lines = prod_buf.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["severity"], "ERROR");
        assert_eq!(lines[0]["message"], "disk full");
        assert_eq!(lines[1]["message"], "disk full\ntrace");
        assert!(lines[1]["@type"].as_str().unwrap().ends_with("ReportedErrorEvent"));
    }

    #[tokio::test]
    async fn production_error_without_stack_gets_one() {
        let (prod, buf) = stream_logger(true);
        prod.error(ErrorEntry::new("disk full"));
        prod.flush().await;

        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "disk full");
        let report = lines[1]["message"].as_str().unwrap();
        assert!(report.starts_with("disk full\n"), "no stack in report: {report:?}");
        assert!(report.len() > "disk full\n".len());
    }

    #[tokio::test]
    async fn explicit_stack_is_kept_and_dev_errors_skip_capture() {
        let (prod, prod_buf) = stream_logger(true);
        prod.warn(ErrorEntry::new("slow").with_stack("given"));
        prod.flush().await;
        assert_eq!(prod_buf.lines()[1]["message"], "slow\ngiven");

        let (dev, _) = stream_logger(false);
        let record = dev.error_record(Severity::Error, ErrorEntry::new("quiet"));
        assert!(record.error.unwrap().stack.is_none());
    }

    #[tokio::test]
    async fn concurrent_flushes_cover_prior_records() {
        let (logger, buf) = stream_logger(false);
        for i in 0..20 {
            logger.log(format!("record {i}"));
        }
        let (a, b) = (logger.clone(), logger.clone());
        tokio::join!(a.flush(), b.flush());
        assert_eq!(buf.lines().len(), 20);
    }

    #[tokio::test]
    async fn flush_is_not_held_open_by_new_traffic() {
        let (logger, _) = stream_logger(false);
        let stop = Arc::new(AtomicBool::new(false));
        let producer = {
            let logger = logger.clone();
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                while !stop.load(Ordering::Relaxed) {
                    logger.log("tick");
                    tokio::task::yield_now().await;
                }
            })
        };

        let flushed = tokio::time::timeout(Duration::from_secs(5), logger.flush()).await;
        stop.store(true, Ordering::Relaxed);
        producer.await.unwrap();
        assert!(flushed.is_ok(), "flush waited on records dispatched after it began");
    }

    #[tokio::test]
    async fn info_is_never_reported() {
        let (logger, buf) = stream_logger(true);
        logger.log("hello");
        logger.flush().await;
        assert_eq!(buf.lines().len(), 1);
    }

    #[tokio::test]
    async fn sink_failure_does_not_panic_or_propagate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/entries:write"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = config();
        cfg.sink = SinkKind::Remote;
        cfg.remote.logging_url = server.uri();
        let logger = GcpLog::builder(&cfg).production(false).build().unwrap();
        logger.log("will be rejected");
        logger.close().await;
    }

    #[test]
    fn dispatch_without_runtime_drops_record() {
        let (logger, buf) = stream_logger(false);
        logger.log("nowhere to run");
        assert!(buf.lines().is_empty());
    }
}
