//! Response interception.
//!
//! [`CapturedResponse`] accumulates what the downstream handler sent: the
//! status (committed once), the byte count and, optionally, a bounded copy of
//! the body. [`RecordingBody`] feeds it by wrapping the real response body and
//! forwarding every frame untouched, so size hints, trailers and streaming
//! behaviour reach the client exactly as the handler produced them.
//!
//! The log record is finalized when the body reaches end-of-stream or is
//! dropped, whichever happens first; an aborted response is still logged.

use std::{
    pin::Pin,
    task::{ready, Context, Poll},
    time::Instant,
};

use axum::http::{header, HeaderMap, StatusCode};
use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;

use crate::{logger::GcpLog, record::ErrorDetail, request::RequestInfo};

/// Knobs controlling how much of a response is mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Keep a copy of the body for the default error builder.
    pub capture_body: bool,
    /// Upper bound on the mirrored copy; the byte count is never capped.
    pub max_body_bytes: usize,
    /// Add the serialized header block to the byte count.
    pub count_header_bytes: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            capture_body: true,
            max_body_bytes: 8 * 1024,
            count_header_bytes: true,
        }
    }
}

/// Mutable response metadata owned by a single in-flight request.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    status: StatusCode,
    bytes_written: u64,
    body: Option<Vec<u8>>,
    body_limit: usize,
    body_truncated: bool,
    header_committed: bool,
    count_header_bytes: bool,
    handler_error: Option<String>,
}

impl CapturedResponse {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            status: StatusCode::OK,
            bytes_written: 0,
            body: settings.capture_body.then(Vec::new),
            body_limit: settings.max_body_bytes,
            body_truncated: false,
            header_committed: false,
            count_header_bytes: settings.count_header_bytes,
            handler_error: None,
        }
    }

    /// Commit the response head. Only the first call has any effect.
    ///
    /// Returns `true` when this call committed the status.
    pub fn set_status(&mut self, status: StatusCode, headers: &HeaderMap) -> bool {
        self.commit_head(status, headers, None)
    }

    /// Like [`set_status`](Self::set_status) for a head that has not been
    /// finalized yet: when `Content-Length` is absent but the body length is
    /// known exactly, the line the server will add is counted too.
    pub fn commit_head(
        &mut self,
        status: StatusCode,
        headers: &HeaderMap,
        body_len: Option<u64>,
    ) -> bool {
        if self.header_committed {
            return false;
        }
        self.status = status;
        if self.count_header_bytes {
            self.bytes_written += encoded_header_len(headers);
            let implied = body_len.filter(|_| !headers.contains_key(header::CONTENT_LENGTH));
            if let Some(len) = implied {
                self.bytes_written +=
                    header_line_len(header::CONTENT_LENGTH.as_str(), len.to_string());
            }
        }
        self.header_committed = true;
        true
    }

    /// Account for a chunk of body bytes sent to the client.
    pub fn write(&mut self, chunk: &[u8]) {
        self.bytes_written += chunk.len() as u64;

        if let Some(body) = self.body.as_mut() {
            let room = self.body_limit.saturating_sub(body.len());
            if chunk.len() > room {
                self.body_truncated = true;
            }
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    /// Committed status, or `200 OK` if the head was never committed.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Bytes written so far, including the header block when enabled.
    pub fn size(&self) -> u64 {
        self.bytes_written
    }

    /// Mirrored body bytes, `None` when capture is disabled.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Mirrored body as text (lossy), empty when capture is disabled.
    pub fn body_text(&self) -> String {
        self.body()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    pub fn is_body_truncated(&self) -> bool {
        self.body_truncated
    }

    pub fn is_committed(&self) -> bool {
        self.header_committed
    }

    /// Error text a handler attached to its response, if any.
    pub fn handler_error(&self) -> Option<&str> {
        self.handler_error.as_deref()
    }

    pub(crate) fn set_handler_error(&mut self, error: impl Into<String>) {
        self.handler_error = Some(error.into());
    }
}

/// Length of the header block as `Name: value\r\n` lines.
fn encoded_header_len(headers: &HeaderMap) -> u64 {
    headers
        .iter()
        .map(|(name, value)| header_line_len(name.as_str(), value.as_bytes()))
        .sum()
}

fn header_line_len(name: &str, value: impl AsRef<[u8]>) -> u64 {
    (name.len() + value.as_ref().len() + 4) as u64
}

/// Emits the request's record exactly once, when dropped.
pub(crate) struct Recorder {
    pending: Option<Pending>,
}

struct Pending {
    logger: GcpLog,
    request: RequestInfo,
    captured: CapturedResponse,
    started: Instant,
    panic: Option<ErrorDetail>,
}

impl Recorder {
    pub(crate) fn new(
        logger: GcpLog,
        request: RequestInfo,
        captured: CapturedResponse,
        started: Instant,
        panic: Option<ErrorDetail>,
    ) -> Self {
        Self {
            pending: Some(Pending {
                logger,
                request,
                captured,
                started,
                panic,
            }),
        }
    }

    fn write(&mut self, chunk: &[u8]) {
        if let Some(pending) = self.pending.as_mut() {
            pending.captured.write(chunk);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(p) = self.pending.take() {
            let latency = p.started.elapsed();
            p.logger
                .record_exchange(&p.request, &p.captured, latency, p.panic);
        }
    }
}

pin_project! {
    /// Response body wrapper that mirrors data frames into a
    /// [`CapturedResponse`].
    pub struct RecordingBody<B> {
        #[pin]
        inner: Option<B>,
        fixed: Option<Bytes>,
        recorder: Option<Recorder>,
    }
}

impl<B> RecordingBody<B> {
    pub(crate) fn new(inner: B, recorder: Recorder) -> Self {
        Self {
            inner: Some(inner),
            fixed: None,
            recorder: Some(recorder),
        }
    }

    /// A body with fixed content, used for responses the middleware
    /// synthesizes itself.
    pub(crate) fn fixed(data: Bytes, recorder: Recorder) -> Self {
        Self {
            inner: None,
            fixed: Some(data),
            recorder: Some(recorder),
        }
    }
}

impl<B> Body for RecordingBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = match this.inner.as_pin_mut() {
            Some(inner) => ready!(inner.poll_frame(cx)),
            None => this.fixed.take().map(|data| Ok(Frame::data(data))),
        };

        match &polled {
            Some(Ok(frame)) => {
                if let (Some(data), Some(recorder)) = (frame.data_ref(), this.recorder.as_mut()) {
                    recorder.write(data);
                }
            }
            Some(Err(_)) => {}
            // End of stream: finalize now rather than waiting for the drop.
            None => drop(this.recorder.take()),
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        match &self.inner {
            Some(inner) => inner.is_end_stream(),
            None => self.fixed.is_none(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match &self.inner {
            Some(inner) => inner.size_hint(),
            None => SizeHint::with_exact(self.fixed.as_ref().map_or(0, |b| b.len() as u64)),
        }
    }
}
