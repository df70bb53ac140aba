//! Outermost stage: turns recorded errors and panics into one response.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use tracing::{debug, warn};

use super::{Next, Stage};
use crate::core::{AppError, Envelope, RequestContext};
use crate::crash::{PanicReport, ReportedPanic};
use crate::sink::{DeferredSink, ResponseSink};

/// Writes the body of an error response.
pub type ErrorFormatter = Arc<dyn Fn(&RequestContext, &AppError, &dyn ResponseSink) + Send + Sync>;
/// Observes every error before it is rendered.
pub type ErrorObserver = Arc<dyn Fn(&RequestContext, &AppError) + Send + Sync>;
/// Observes every caught panic.
pub type PanicObserver = Arc<dyn Fn(&RequestContext, &PanicReport) + Send + Sync>;

const PANIC_MESSAGE: &str = "Internal Server Error";

/// Hooks of the error stage. Unset hooks use the defaults.
#[derive(Clone, Default)]
pub struct ErrorHandlerOptions {
    /// Body writer. Default: the JSON error envelope.
    pub formatter: Option<ErrorFormatter>,
    /// Default: a `warn!` with kind, message and cause.
    pub on_error: Option<ErrorObserver>,
    pub on_panic: Option<PanicObserver>,
}

impl ErrorHandlerOptions {
    pub fn formatter<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext, &AppError, &dyn ResponseSink) + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext, &AppError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_panic<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestContext, &PanicReport) + Send + Sync + 'static,
    {
        self.on_panic = Some(Arc::new(f));
        self
    }
}

/// Error interception stage.
///
/// Installs a [`DeferredSink`] so nothing reaches the connection while
/// the chain runs. When the chain returns it inspects the error slot:
/// with no error the buffered response is committed as is, otherwise the
/// buffer is discarded and an error envelope is written in its place.
/// Panics from anywhere below are caught here and always rendered as a
/// generic 500; the panic payload never reaches the client.
///
/// A response that already started streaming cannot be replaced; a late
/// error is then only logged.
#[derive(Default)]
pub struct ErrorHandlerStage {
    options: ErrorHandlerOptions,
}

impl ErrorHandlerStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ErrorHandlerOptions) -> Self {
        Self { options }
    }

    fn observe_error(&self, ctx: &RequestContext, err: &AppError) {
        match &self.options.on_error {
            Some(on_error) => on_error(ctx, err),
            None => warn!(
                request_id = %ctx.request_id(),
                kind = %err.kind,
                status = err.status().as_u16(),
                message = %err.message,
                cause = ?err.cause.as_ref().map(|c| c.to_string()),
                "request failed"
            ),
        }
    }

    fn render(&self, ctx: &RequestContext, deferred: &DeferredSink, err: &AppError) {
        if !deferred.reset() {
            warn!(
                request_id = %ctx.request_id(),
                status = err.status().as_u16(),
                message = %err.message,
                "error after response was committed, not rendered"
            );
            return;
        }

        for (name, value) in &err.headers {
            deferred.append_header(name.clone(), value.clone());
        }
        match &self.options.formatter {
            Some(formatter) => formatter(ctx, err, deferred),
            None => write_error_envelope(ctx, err, deferred),
        }
    }

    fn recover(&self, ctx: &RequestContext, deferred: &DeferredSink, payload: Box<dyn Any + Send>) {
        let report = ctx.panic_report(&*payload);
        if payload.is::<ReportedPanic>() {
            debug!(request_id = %report.request_id, "panic already reported by supervisor");
        } else {
            ctx.crash_reporter().report(&report);
        }
        if let Some(on_panic) = &self.options.on_panic {
            on_panic(ctx, &report);
        }

        let err = AppError::internal(PANIC_MESSAGE);
        ctx.set_error(err.clone());
        self.render(ctx, deferred, &err);
    }
}

#[async_trait]
impl Stage for ErrorHandlerStage {
    fn name(&self) -> &'static str {
        "error_handler"
    }

    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
        let deferred = Arc::new(DeferredSink::new(ctx.output()));
        ctx.wrap_output(|_| deferred.clone());

        match AssertUnwindSafe(next.run(Arc::clone(&ctx))).catch_unwind().await {
            Ok(()) => {
                if let Some(err) = ctx.error() {
                    self.observe_error(&ctx, &err);
                    self.render(&ctx, &deferred, &err);
                }
            }
            Err(payload) => self.recover(&ctx, &deferred, payload),
        }

        if let Err(e) = deferred.commit() {
            debug!(request_id = %ctx.request_id(), error = %e, "response commit failed");
        }
    }
}

/// Default formatter: `{"status":..,"msg":..,"logid":..}` as JSON.
pub fn write_error_envelope(ctx: &RequestContext, err: &AppError, sink: &dyn ResponseSink) {
    let logid = ctx.request_id();
    let status = err.status();
    let body = match serde_json::to_vec(&Envelope::error(status.as_u16(), &err.message, &logid)) {
        Ok(body) => body,
        Err(_) => Vec::new(),
    };

    sink.set_header(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&logid) {
        sink.set_header(HeaderName::from_static("x-request-id"), value);
    }
    sink.write_header(status);
    if let Err(e) = sink.write(&body) {
        debug!(error = %e, "error body write failed");
    }
}
