//! litekit - request execution core for async HTTP services on Tokio.
//!
//! Every request gets its own handler instance cloned from a registered
//! template, runs through a composable stage pipeline, and writes through
//! a chain of response sinks that keep late writes from a timed-out
//! handler off the wire.
//!
//! # Features
//!
//! - **Per-request handlers**: [`template::InstanceClone`] copies a route's
//!   template so requests never share mutable state
//! - **Stage pipeline**: onion-ordered [`middleware::Stage`]s composed per
//!   request from global and route-group queues
//! - **Timeout supervision**: a deadline per request; the late handler keeps
//!   running detached but can no longer write
//! - **Error and panic recovery**: buffered output is replaced by a JSON
//!   error envelope, panics are reported once
//! - **Streaming**: server-sent events and connection upgrades
//! - **Access Logging**: Structured JSON logging with tracing
//!
//! # Example
//!
//! ```rust,ignore
//! use litekit::{handler_fn, App, Config, Server};
//!
//! let config = Config::from_env()?;
//! let addr = config.server.listen_addr;
//! let mut app = App::new(config);
//! app.get("/hello/{name}", handler_fn(|ctx| async move {
//!     let name = ctx.request().path_param("name").unwrap_or("world").to_string();
//!     ctx.serve_text(format!("hello, {}", name));
//!     Ok(())
//! }))?;
//!
//! Server::bind(app, addr).await?.run().await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod core;
pub mod crash;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod sink;
pub mod template;

// Re-exports for convenience
pub use crate::config::Config;
pub use crate::core::{AppError, BoxError, ErrorKind, Request, RequestContext};
pub use crate::crash::{CrashReporter, PanicReport, TracingCrashReporter};
pub use crate::handler::{handler_fn, Handler, HandlerService};
pub use crate::middleware::{Next, Stage, StageQueue};
pub use crate::server::{dispatch, App, RouteGroup, Server, ServerError, ShutdownHandle};
pub use crate::template::InstanceClone;
