//! Application: the global stage queue, the route table and the shared
//! collaborators every request sees.

use std::sync::Arc;

use http::Method;
use tracing::info;

use super::routing::{join_path, RouteTable};
use crate::config::{Config, ConfigError};
use crate::crash::{CrashReporter, TracingCrashReporter};
use crate::handler::{Handler, HandlerService};
use crate::middleware::{
    AccessLogStage, ErrorHandlerStage, FinalizeStage, RateLimitStage, Stage, StageQueue,
    TimeoutStage, TrackerStage,
};

/// A configured application, ready to be served.
///
/// ```rust,ignore
/// let mut app = App::new(Config::from_env()?);
/// app.get("/hello", handler_fn(|ctx| async move {
///     ctx.serve_text("hello");
///     Ok(())
/// }))?;
///
/// let mut api = app.group("/api");
/// api.use_stage(Auth::new());
/// api.get("/users/{id}", GetUser::default())?;
/// ```
pub struct App {
    config: Config,
    queue: StageQueue,
    routes: RouteTable,
    crash_reporter: Arc<dyn CrashReporter>,
}

impl App {
    /// Create an application with the default global stages:
    /// error handler, access log, tracker, rate limit, timeout, finalize.
    /// Access log and rate limit are skipped when disabled in `config`.
    pub fn new(config: Config) -> Self {
        let mut queue = StageQueue::new();
        queue.use_stage(ErrorHandlerStage::new());
        if config.middleware.access_log {
            queue.use_stage(AccessLogStage::from_config(&config.middleware));
        }
        queue.use_stage(TrackerStage::new());
        if let Some(rate_limit) = RateLimitStage::from_config(&config.middleware) {
            queue.use_stage(rate_limit);
        }
        queue.use_stage(TimeoutStage::from_config(&config.server));
        queue.use_stage(FinalizeStage::new());

        info!(stages = ?queue.names(), "global pipeline");

        Self {
            config,
            queue,
            routes: RouteTable::new(),
            crash_reporter: Arc::new(TracingCrashReporter::new()),
        }
    }

    /// Create an application with an empty global queue.
    pub fn bare(config: Config) -> Self {
        Self {
            config,
            queue: StageQueue::new(),
            routes: RouteTable::new(),
            crash_reporter: Arc::new(TracingCrashReporter::new()),
        }
    }

    /// Replace the crash reporter used for handler panics.
    pub fn with_crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = reporter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn crash_reporter(&self) -> &Arc<dyn CrashReporter> {
        &self.crash_reporter
    }

    /// Global stages, run for every request including 404 and 405.
    pub fn queue(&self) -> &StageQueue {
        &self.queue
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Append a global stage.
    pub fn use_stage<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
        self.queue.use_stage(stage);
        self
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.handle(Method::GET, path, handler)
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.handle(Method::POST, path, handler)
    }

    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.handle(Method::PUT, path, handler)
    }

    pub fn delete<H: Handler>(
        &mut self,
        path: &str,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        self.handle(Method::DELETE, path, handler)
    }

    pub fn patch<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.handle(Method::PATCH, path, handler)
    }

    /// Route every method on `path` to `handler`.
    pub fn any<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.register(None, path, StageQueue::new(), handler)?;
        Ok(self)
    }

    pub fn handle<H: Handler>(
        &mut self,
        method: Method,
        path: &str,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        self.register(Some(method), path, StageQueue::new(), handler)?;
        Ok(self)
    }

    /// Open a route group under `prefix`.
    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            prefix: join_path("", prefix),
            queue: StageQueue::new(),
            app: self,
        }
    }

    fn register<H: Handler>(
        &mut self,
        method: Option<Method>,
        path: &str,
        queue: StageQueue,
        handler: H,
    ) -> Result<(), ConfigError> {
        let service = Arc::new(HandlerService::new(handler));
        self.routes.insert(method, path, queue, service)
    }
}

/// Routes sharing a path prefix and a stage queue.
///
/// The queue is copied when a route is registered, so stages added later
/// only apply to routes registered after them. Nested groups start from a
/// copy of their parent's queue.
pub struct RouteGroup<'a> {
    app: &'a mut App,
    prefix: String,
    queue: StageQueue,
}

impl RouteGroup<'_> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn use_stage<S: Stage + 'static>(&mut self, stage: S) -> &mut Self {
        self.queue.use_stage(stage);
        self
    }

    pub fn group(&mut self, prefix: &str) -> RouteGroup<'_> {
        RouteGroup {
            prefix: join_path(&self.prefix, prefix),
            queue: self.queue.clone(),
            app: &mut *self.app,
        }
    }

    pub fn get<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.handle(Method::GET, path, handler)
    }

    pub fn post<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.handle(Method::POST, path, handler)
    }

    pub fn put<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.handle(Method::PUT, path, handler)
    }

    pub fn delete<H: Handler>(
        &mut self,
        path: &str,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        self.handle(Method::DELETE, path, handler)
    }

    pub fn patch<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        self.handle(Method::PATCH, path, handler)
    }

    pub fn any<H: Handler>(&mut self, path: &str, handler: H) -> Result<&mut Self, ConfigError> {
        let full = join_path(&self.prefix, path);
        self.app.register(None, &full, self.queue.clone(), handler)?;
        Ok(self)
    }

    pub fn handle<H: Handler>(
        &mut self,
        method: Method,
        path: &str,
        handler: H,
    ) -> Result<&mut Self, ConfigError> {
        let full = join_path(&self.prefix, path);
        self.app
            .register(Some(method), &full, self.queue.clone(), handler)?;
        Ok(self)
    }
}
