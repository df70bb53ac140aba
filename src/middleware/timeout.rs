//! Deadline supervision for the inner chain.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{Next, Stage};
use crate::config::{RequestTimeout, ServerConfig};
use crate::core::{AppError, RequestContext};
use crate::crash::ReportedPanic;
use crate::sink::GuardedSink;

/// Public message of the timeout error.
pub const TIMEOUT_MESSAGE: &str = "request timeout";

/// How a supervised run resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    TimedOut,
}

enum WorkerSignal {
    Completed,
    Panicked(Box<dyn Any + Send>),
}

/// Races the rest of the chain against a deadline.
///
/// The chain runs on its own task behind a [`GuardedSink`]. Whichever of
/// completion, deadline or panic comes first decides the request:
///
/// - completion: nothing to do;
/// - deadline: the guarded sink is closed for good, the request is
///   cancelled and a timeout error is recorded;
/// - panic: the worker reports it, and the panic is re-raised here as a
///   [`ReportedPanic`] for the error stage to render.
///
/// Cancellation is cooperative. A timed-out worker is not aborted; it
/// stops at the next stage boundary or handler hook, or wherever it awaits
/// [`RequestContext::cancelled`]. A handler that never reaches such a
/// point keeps running in the background, but its output goes nowhere.
#[derive(Debug, Clone, Copy)]
pub struct Supervisor {
    deadline: Duration,
}

impl Supervisor {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn run(&self, ctx: Arc<RequestContext>, next: Next) -> Outcome {
        let guard = Arc::new(GuardedSink::new(ctx.output()));
        ctx.wrap_output(|_| guard.clone());

        let (tx, rx) = oneshot::channel();
        let worker_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let result = AssertUnwindSafe(next.run(Arc::clone(&worker_ctx)))
                .catch_unwind()
                .await;
            let signal = match result {
                Ok(()) => WorkerSignal::Completed,
                Err(payload) => {
                    if worker_ctx.is_cancelled() {
                        debug!(
                            request_id = %worker_ctx.request_id(),
                            "panic after cancellation, ignored"
                        );
                        return;
                    }
                    if !payload.is::<ReportedPanic>() {
                        let report = worker_ctx.panic_report(&*payload);
                        worker_ctx.crash_reporter().report(&report);
                    }
                    WorkerSignal::Panicked(payload)
                }
            };
            let _ = tx.send(signal);
        });

        tokio::select! {
            signal = rx => match signal {
                Ok(WorkerSignal::Completed) => Outcome::Completed,
                Ok(WorkerSignal::Panicked(payload)) => {
                    let payload: Box<dyn Any + Send> = if payload.is::<ReportedPanic>() {
                        payload
                    } else {
                        Box::new(ReportedPanic::new(payload))
                    };
                    std::panic::resume_unwind(payload)
                }
                Err(_) => {
                    debug!(request_id = %ctx.request_id(), "worker ended without a result");
                    Outcome::Completed
                }
            },
            _ = tokio::time::sleep(self.deadline) => {
                guard.mark_timed_out();
                ctx.cancel();
                ctx.set_error(AppError::timeout(TIMEOUT_MESSAGE));
                warn!(
                    request_id = %ctx.request_id(),
                    method = %ctx.request().method(),
                    path = %ctx.request().path(),
                    timeout_ms = self.deadline.as_millis() as u64,
                    "request timed out"
                );
                Outcome::TimedOut
            }
        }
    }
}

/// Applies the request deadline, or the longer stream deadline when the
/// client accepts `text/event-stream`. A disabled deadline runs the chain
/// inline with no supervision.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutStage {
    request_timeout: RequestTimeout,
    sse_timeout: RequestTimeout,
}

impl TimeoutStage {
    pub fn new(request_timeout: RequestTimeout, sse_timeout: RequestTimeout) -> Self {
        Self {
            request_timeout,
            sse_timeout,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.request_timeout, config.sse_timeout)
    }

    fn timeout_for(&self, ctx: &RequestContext) -> RequestTimeout {
        if ctx.request().accepts_event_stream() {
            self.sse_timeout
        } else {
            self.request_timeout
        }
    }
}

#[async_trait]
impl Stage for TimeoutStage {
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
        match self.timeout_for(&ctx).as_duration() {
            Some(deadline) => {
                Supervisor::new(deadline).run(ctx, next).await;
            }
            None => next.run(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::TracingCrashReporter;
    use crate::middleware::{service_fn, testing, ErrorHandlerStage, Service, StageQueue};
    use crate::sink::{MemorySink, ResponseSink};
    use http::StatusCode;

    fn timeout(ms: u64) -> RequestTimeout {
        RequestTimeout::from_duration(Duration::from_millis(ms))
    }

    fn supervised_queue(ms: u64) -> StageQueue {
        StageQueue::new()
            .with(ErrorHandlerStage::new())
            .with(TimeoutStage::new(timeout(ms), RequestTimeout::DISABLED))
    }

    fn context_with(reporter: Arc<TracingCrashReporter>) -> (Arc<MemorySink>, Arc<RequestContext>) {
        let memory = Arc::new(MemorySink::new());
        let ctx = RequestContext::new(
            testing::request(http::Method::GET, "/slow"),
            memory.clone(),
            reporter,
        );
        (memory, Arc::new(ctx))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_completes_before_deadline() {
        let (memory, ctx) = testing::context();
        supervised_queue(500)
            .apply(Arc::new(service_fn(|ctx: Arc<RequestContext>| async move {
                ctx.write("fast").unwrap();
            })))
            .call(ctx.clone())
            .await;

        assert!(!ctx.has_error());
        assert_eq!(memory.body_string(), "fast");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deadline_wins_and_late_write_is_dropped() {
        let (memory, ctx) = testing::context();
        supervised_queue(50)
            .apply(Arc::new(service_fn(|ctx: Arc<RequestContext>| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = ctx.write("late");
            })))
            .call(ctx.clone())
            .await;

        assert_eq!(memory.status(), Some(StatusCode::REQUEST_TIMEOUT));
        assert!(ctx.is_cancelled());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!memory.body_string().contains("late"));
        let body: serde_json::Value = serde_json::from_slice(&memory.body()).unwrap();
        assert_eq!(body["msg"], TIMEOUT_MESSAGE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_panic_is_reported_once() {
        let reporter = Arc::new(TracingCrashReporter::new());
        let (memory, ctx) = context_with(reporter.clone());
        supervised_queue(500)
            .apply(Arc::new(service_fn(|_ctx| async move {
                panic!("boom");
            })))
            .call(ctx)
            .await;

        assert_eq!(memory.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!memory.body_string().contains("boom"));
        assert_eq!(reporter.reported(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panic_after_timeout_is_swallowed() {
        let reporter = Arc::new(TracingCrashReporter::new());
        let (memory, ctx) = context_with(reporter.clone());
        supervised_queue(30)
            .apply(Arc::new(service_fn(|_ctx| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                panic!("too late to matter");
            })))
            .call(ctx)
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(memory.status(), Some(StatusCode::REQUEST_TIMEOUT));
        assert_eq!(reporter.reported(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_worker_skips_remaining_stages() {
        struct Slow;

        #[async_trait]
        impl Stage for Slow {
            fn name(&self) -> &'static str {
                "slow"
            }

            async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
                tokio::time::sleep(Duration::from_millis(100)).await;
                next.run(ctx).await;
            }
        }

        let reached = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = reached.clone();
        let (_, ctx) = testing::context();
        StageQueue::new()
            .with(TimeoutStage::new(timeout(20), RequestTimeout::DISABLED))
            .with(Slow)
            .apply(Arc::new(service_fn(move |_ctx| {
                let flag = flag.clone();
                async move { flag.store(true, std::sync::atomic::Ordering::SeqCst) }
            })))
            .call(ctx.clone())
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ctx.error().unwrap().message, TIMEOUT_MESSAGE);
        assert!(!reached.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_disabled_timeout_runs_inline() {
        let (memory, ctx) = testing::context();
        StageQueue::new()
            .with(TimeoutStage::new(RequestTimeout::DISABLED, RequestTimeout::DISABLED))
            .apply(Arc::new(service_fn(|ctx: Arc<RequestContext>| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ctx.write("inline").unwrap();
            })))
            .call(ctx.clone())
            .await;

        assert_eq!(memory.body_string(), "inline");
        assert!(!ctx.has_error());
    }

    #[test]
    fn test_event_stream_uses_sse_timeout() {
        let stage = TimeoutStage::new(timeout(10), timeout(1000));
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::ACCEPT, "text/event-stream".parse().unwrap());
        let request = crate::core::Request::new(
            http::Method::GET,
            "/events".parse().unwrap(),
            headers,
            bytes::Bytes::new(),
        );
        let (_, ctx) = testing::context_for(request);
        assert_eq!(stage.timeout_for(&ctx).as_millis(), 1000);

        let (_, plain) = testing::context();
        assert_eq!(stage.timeout_for(&plain).as_millis(), 10);
    }
}
