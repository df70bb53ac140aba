//! Stage pipeline wrapped around every handler.
//!
//! A [`Stage`] is one cross-cutting behavior. Stages run in registration
//! order on the way in and in reverse order on the way out:
//!
//! ```text
//! ErrorHandler → AccessLog → Tracker → RateLimit → Timeout → Finalize → handler
//!      ↑                                                                  │
//!      └────────────────────────── return ────────────────────────────────┘
//! ```
//!
//! Each stage receives the shared [`RequestContext`] and a [`Next`] that
//! runs the rest of the chain. A stage short-circuits by not calling it.
//!
//! # Example
//!
//! ```rust,ignore
//! use litekit::middleware::{Next, Stage};
//!
//! struct Banner;
//!
//! #[async_trait::async_trait]
//! impl Stage for Banner {
//!     fn name(&self) -> &'static str { "banner" }
//!
//!     async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
//!         ctx.set_header(HeaderName::from_static("x-banner"), HeaderValue::from_static("hi"));
//!         next.run(ctx).await;
//!     }
//! }
//! ```

mod chain;

pub mod access_log;
pub mod error_handler;
pub mod finalize;
pub mod rate_limit;
pub mod timeout;
pub mod tracker;

pub use access_log::AccessLogStage;
pub use chain::{Pipeline, StageQueue};
pub use error_handler::{ErrorHandlerOptions, ErrorHandlerStage};
pub use finalize::FinalizeStage;
pub use rate_limit::{RateKey, RateLimitStage, RateLimiter};
pub use timeout::{Supervisor, TimeoutStage};
pub use tracker::TrackerStage;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::RequestContext;

/// The innermost callable of a pipeline: a handler, or anything else that
/// produces a response for a context.
#[async_trait]
pub trait Service: Send + Sync {
    async fn call(&self, ctx: Arc<RequestContext>);
}

pub type BoxService = Arc<dyn Service>;

/// One cross-cutting unit in the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name used in logs and [`StageQueue::names`].
    fn name(&self) -> &'static str;

    /// Run this stage. Call `next.run(ctx)` to continue the chain.
    async fn handle(&self, ctx: Arc<RequestContext>, next: Next);
}

/// The remainder of a pipeline, as seen from one stage.
///
/// Owned and `'static`, so a stage can move it onto another task.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn Stage>]>,
    index: usize,
    endpoint: BoxService,
}

impl Next {
    pub(crate) fn new(stages: Arc<[Arc<dyn Stage>]>, endpoint: BoxService) -> Self {
        Self {
            stages,
            index: 0,
            endpoint,
        }
    }

    /// Run the rest of the chain.
    ///
    /// Cancelled requests stop here instead of entering the next stage.
    pub async fn run(self, ctx: Arc<RequestContext>) {
        if ctx.is_cancelled() {
            tracing::debug!(
                request_id = %ctx.request_id(),
                "request cancelled, abandoning remaining stages"
            );
            return;
        }

        match self.stages.get(self.index).cloned() {
            Some(stage) => {
                let next = Next {
                    stages: self.stages,
                    index: self.index + 1,
                    endpoint: self.endpoint,
                };
                stage.handle(ctx, next).await
            }
            None => self.endpoint.call(ctx).await,
        }
    }

    /// Stages left before the endpoint.
    pub fn remaining(&self) -> usize {
        self.stages.len().saturating_sub(self.index)
    }
}

/// A [`Service`] built from an async closure.
pub struct ServiceFn<F> {
    f: F,
}

/// Wrap an async closure as a [`Service`].
pub fn service_fn<F, Fut>(f: F) -> ServiceFn<F>
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    ServiceFn { f }
}

#[async_trait]
impl<F, Fut> Service for ServiceFn<F>
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn call(&self, ctx: Arc<RequestContext>) {
        (self.f)(ctx).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use bytes::Bytes;

    use crate::core::{Request, RequestContext};
    use crate::crash::TracingCrashReporter;
    use crate::sink::MemorySink;

    pub(crate) fn request(method: http::Method, uri: &str) -> Request {
        Request::new(method, uri.parse().unwrap(), http::HeaderMap::new(), Bytes::new())
    }

    pub(crate) fn context_for(request: Request) -> (Arc<MemorySink>, Arc<RequestContext>) {
        let memory = Arc::new(MemorySink::new());
        let ctx = RequestContext::new(request, memory.clone(), Arc::new(TracingCrashReporter::new()));
        (memory, Arc::new(ctx))
    }

    pub(crate) fn context() -> (Arc<MemorySink>, Arc<RequestContext>) {
        context_for(request(http::Method::GET, "/test"))
    }
}
