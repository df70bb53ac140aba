//! Request handlers and their per-request lifecycle.
//!
//! A handler type is registered once per route as a template. Each request
//! gets its own instance through [`InstanceClone`], so hooks take
//! `&mut self` and may keep request state in fields without locking.
//!
//! ```rust,ignore
//! #[derive(Default)]
//! struct GetUser {
//!     id: u64,
//! }
//!
//! instance_clone!(GetUser { id });
//!
//! #[async_trait]
//! impl Handler for GetUser {
//!     async fn parse_request(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
//!         self.id = ctx.request().path_param_parse("id").ok_or_else(|| AppError::bad_request("bad id"))?;
//!         Ok(())
//!     }
//!
//!     async fn serve(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
//!         ctx.serve_data(serde_json::json!({ "id": self.id }))?;
//!         Ok(())
//!     }
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::core::{AppError, BoxError, ErrorKind, RequestContext};
use crate::middleware::Service;
use crate::template::{Callable, InstanceClone};

/// Per-request handler lifecycle.
///
/// Hooks run in order: `init`, `sanity_check`, `parse_request`, `serve`,
/// `finalize`. The first hook that fails stops the chain and its error is
/// recorded on the context. Errors that are not already an [`AppError`]
/// are wrapped with the hook's kind and message:
///
/// | Hook | Kind | Message |
/// |---|---|---|
/// | `init` | Internal | handler init failed |
/// | `sanity_check` | BadRequest | sanity check failed |
/// | `parse_request` | BadRequest | parse request failed |
/// | `serve` | Internal | handler serve failed |
/// | `finalize` | Internal | handler finalize failed |
#[async_trait]
pub trait Handler: InstanceClone + Send + Sync + 'static {
    async fn init(&mut self, _ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        Ok(())
    }

    async fn sanity_check(&mut self, _ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        Ok(())
    }

    async fn parse_request(&mut self, _ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        Ok(())
    }

    async fn serve(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError>;

    async fn finalize(&mut self, _ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Largest accepted request body. `None` leaves only the server limit.
    fn max_body_size(&self) -> Option<usize> {
        None
    }
}

/// Runs a cloned instance of a handler template for every request.
pub struct HandlerService<H> {
    template: Arc<H>,
}

impl<H: Handler> HandlerService<H> {
    pub fn new(template: H) -> Self {
        Self {
            template: Arc::new(template),
        }
    }

    pub fn template(&self) -> &H {
        &self.template
    }
}

/// Run one hook. Returns false when the chain must stop.
macro_rules! run_hook {
    ($ctx:expr, $hook:expr, $kind:expr, $message:expr) => {{
        if $ctx.is_cancelled() {
            debug!(request_id = %$ctx.request_id(), "request cancelled, handler abandoned");
            return;
        }
        if let Err(err) = $hook.await {
            if $ctx.is_cancelled() {
                debug!(request_id = %$ctx.request_id(), error = %err, "hook failed after cancellation");
            } else {
                $ctx.set_error(AppError::from_boxed(err, $kind, $message));
            }
            return;
        }
    }};
}

#[async_trait]
impl<H: Handler> Service for HandlerService<H> {
    async fn call(&self, ctx: Arc<RequestContext>) {
        let mut handler = H::clone_instance(&self.template);

        if let Some(max) = handler.max_body_size() {
            if ctx.request().body().len() > max {
                ctx.set_error(AppError::bad_request("request body too large"));
                return;
            }
        }

        run_hook!(ctx, handler.init(&ctx), ErrorKind::Internal, "handler init failed");
        run_hook!(ctx, handler.sanity_check(&ctx), ErrorKind::BadRequest, "sanity check failed");
        run_hook!(ctx, handler.parse_request(&ctx), ErrorKind::BadRequest, "parse request failed");
        run_hook!(ctx, handler.serve(&ctx), ErrorKind::Internal, "handler serve failed");
        run_hook!(ctx, handler.finalize(&ctx), ErrorKind::Internal, "handler finalize failed");
    }
}

type HandlerFn = dyn Fn(Arc<RequestContext>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync;

/// A handler made from an async function. Only `serve` does anything.
pub struct FnHandler {
    f: Callable<HandlerFn>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let f: Arc<HandlerFn> = Arc::new(
            move |ctx: Arc<RequestContext>| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(f(ctx))
            },
        );
        Self {
            f: Callable::from_arc(f),
        }
    }
}

impl InstanceClone for FnHandler {
    fn clone_instance(&self) -> Self {
        Self {
            f: self.f.clone_instance(),
        }
    }
}

#[async_trait]
impl Handler for FnHandler {
    async fn serve(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        (self.f)(Arc::clone(ctx)).await
    }
}

/// Wrap an async function as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    FnHandler::new(f)
}
