//! Request-scoped state shared by every stage and the handler.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{AppError, Envelope, Payload, Request, Tracker};
use crate::crash::{CrashReporter, PanicReport};
use crate::sink::{lock, ResponseSink, SinkError, SseWriter};

/// Everything one request carries through the pipeline.
///
/// Shared as `Arc<RequestContext>` between stages, the handler and the
/// supervised worker, so every field sits behind its own lock.
///
/// - the error slot: written by anyone, read by the error stage
/// - annotations: log fields collected along the way
/// - values: typed key/value storage for stage-to-handler hand-off
/// - the output target: the sink handlers write to; stages only wrap it
pub struct RequestContext {
    request: Request,
    error: Mutex<Option<AppError>>,
    annotations: Mutex<serde_json::Map<String, serde_json::Value>>,
    values: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    output: Mutex<Arc<dyn ResponseSink>>,
    payload: Mutex<Option<Payload>>,
    written: AtomicBool,
    streaming: AtomicBool,
    cancel: CancellationToken,
    tracker: Tracker,
    crash_reporter: Arc<dyn CrashReporter>,
    started_at: Instant,
}

impl RequestContext {
    pub fn new(
        request: Request,
        output: Arc<dyn ResponseSink>,
        crash_reporter: Arc<dyn CrashReporter>,
    ) -> Self {
        let tracker = Tracker::new(request.request_id());
        Self {
            request,
            error: Mutex::new(None),
            annotations: Mutex::new(serde_json::Map::new()),
            values: Mutex::new(HashMap::new()),
            output: Mutex::new(output),
            payload: Mutex::new(None),
            written: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tracker,
            crash_reporter,
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Log id of this request (`X-Request-Id` or generated).
    pub fn request_id(&self) -> String {
        self.tracker.log_id()
    }

    #[inline]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    // ---- error slot ----

    /// Record an error. A later call replaces an earlier one.
    pub fn set_error(&self, err: AppError) {
        *lock(&self.error) = Some(err);
    }

    pub fn error(&self) -> Option<AppError> {
        lock(&self.error).clone()
    }

    pub fn has_error(&self) -> bool {
        lock(&self.error).is_some()
    }

    pub fn take_error(&self) -> Option<AppError> {
        lock(&self.error).take()
    }

    pub fn clear_error(&self) {
        *lock(&self.error) = None;
    }

    // ---- annotations ----

    /// Add a field to this request's access log entry.
    pub fn annotate(&self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        lock(&self.annotations).insert(key.into(), value);
    }

    pub fn annotation(&self, key: &str) -> Option<serde_json::Value> {
        lock(&self.annotations).get(key).cloned()
    }

    pub fn annotations(&self) -> serde_json::Map<String, serde_json::Value> {
        lock(&self.annotations).clone()
    }

    // ---- typed values ----

    pub fn set_value<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        lock(&self.values).insert(key.into(), Arc::new(value));
    }

    pub fn value<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = lock(&self.values).get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn remove_value(&self, key: &str) -> bool {
        lock(&self.values).remove(key).is_some()
    }

    // ---- output ----

    /// The sink handlers should write to right now.
    pub fn output(&self) -> Arc<dyn ResponseSink> {
        Arc::clone(&lock(&self.output))
    }

    /// Wrap the current output. `wrap` receives the current sink and
    /// returns its replacement.
    pub fn wrap_output<F>(&self, wrap: F) -> Arc<dyn ResponseSink>
    where
        F: FnOnce(Arc<dyn ResponseSink>) -> Arc<dyn ResponseSink>,
    {
        let mut output = lock(&self.output);
        let wrapped = wrap(Arc::clone(&output));
        *output = Arc::clone(&wrapped);
        wrapped
    }

    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.output().set_header(name, value);
    }

    pub fn write_header(&self, status: StatusCode) {
        self.output().write_header(status);
    }

    pub fn write(&self, data: impl AsRef<[u8]>) -> Result<usize, SinkError> {
        self.written.store(true, Ordering::Release);
        self.output().write(data.as_ref())
    }

    /// True once the handler wrote body bytes through this context.
    pub fn has_written(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    /// Open a server-sent event stream on the current output. The
    /// response is committed immediately.
    pub fn open_sse(&self) -> Result<SseWriter, SinkError> {
        self.written.store(true, Ordering::Release);
        self.streaming.store(true, Ordering::Release);
        SseWriter::open(self.output())
    }

    /// True once a stream was opened and the head is on the wire.
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    // ---- served payloads ----

    pub fn serve_json<T: Serialize>(&self, value: &T) -> Result<(), AppError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| AppError::internal("response serialization failed").with_cause(e))?;
        self.set_payload(Payload::Json(Bytes::from(body)));
        Ok(())
    }

    /// Serve `data` inside the success envelope.
    pub fn serve_data<T: Serialize>(&self, data: T) -> Result<(), AppError> {
        let logid = self.request_id();
        self.serve_json(&Envelope::ok(data, &logid))
    }

    pub fn serve_text(&self, text: impl Into<String>) {
        self.set_payload(Payload::Text(text.into()));
    }

    pub fn serve_html(&self, html: impl Into<String>) {
        self.set_payload(Payload::Html(html.into()));
    }

    pub fn serve_bytes(&self, bytes: impl Into<Bytes>) {
        self.set_payload(Payload::Bytes(bytes.into()));
    }

    pub fn set_payload(&self, payload: Payload) {
        *lock(&self.payload) = Some(payload);
    }

    pub fn take_payload(&self) -> Option<Payload> {
        lock(&self.payload).take()
    }

    // ---- cancellation ----

    /// Token cancelled when the request deadline passes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the request is cancelled. Long-running handlers
    /// should `select!` on this.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    // ---- crash reporting ----

    pub fn crash_reporter(&self) -> &Arc<dyn CrashReporter> {
        &self.crash_reporter
    }

    /// Build a crash report for a panic raised by this request.
    pub fn panic_report(&self, payload: &(dyn Any + Send)) -> PanicReport {
        PanicReport::new(
            self.request_id(),
            self.request.method().as_str(),
            self.request.path(),
            payload,
        )
    }
}
