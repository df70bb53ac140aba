//! Crash reporting for handler panics.

use std::any::Any;
use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

/// Details of one panic raised while serving a request.
#[derive(Debug, Clone)]
pub struct PanicReport {
    pub request_id: String,
    pub method: String,
    pub path: String,
    /// Panic message, for logs only. Never sent to the client.
    pub message: String,
    /// Stack captured where the panic was caught. Empty unless
    /// `RUST_BACKTRACE` is set.
    pub backtrace: String,
}

impl PanicReport {
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        payload: &(dyn Any + Send),
    ) -> Self {
        let backtrace = Backtrace::capture();
        Self {
            request_id: request_id.into(),
            method: method.into(),
            path: path.into(),
            message: panic_message(payload),
            backtrace: match backtrace.status() {
                std::backtrace::BacktraceStatus::Captured => backtrace.to_string(),
                _ => String::new(),
            },
        }
    }
}

/// Text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(reported) = payload.downcast_ref::<ReportedPanic>() {
        panic_message(reported.payload())
    } else {
        "non-string panic payload".to_string()
    }
}

/// Panic payload that has already been handed to a [`CrashReporter`].
///
/// The timeout supervisor re-raises worker panics wrapped in this type so
/// the error stage does not report them a second time.
pub struct ReportedPanic(Box<dyn Any + Send>);

impl ReportedPanic {
    pub fn new(payload: Box<dyn Any + Send>) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &(dyn Any + Send) {
        &*self.0
    }
}

/// Receives every handler panic.
pub trait CrashReporter: Send + Sync {
    fn report(&self, report: &PanicReport);
}

/// Writes panics to the log with target `panic` and counts them.
#[derive(Debug, Default)]
pub struct TracingCrashReporter {
    reported: AtomicU64,
}

impl TracingCrashReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of panics reported so far.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

impl CrashReporter for TracingCrashReporter {
    fn report(&self, report: &PanicReport) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        error!(
            target: "panic",
            request_id = %report.request_id,
            method = %report.method,
            path = %report.path,
            panic = %report.message,
            backtrace = %report.backtrace,
            "handler panicked"
        );
    }
}
