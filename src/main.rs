use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use litekit::config::ConfigError;
use litekit::sink::SseEvent;
use litekit::{
    handler_fn, instance_clone, logging, App, AppError, BoxError, Config, Handler,
    RequestContext, Server,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env()?;
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!("Starting litekit {}...", litekit::PKG_VERSION);
    config.log_summary();

    let addr = config.server.listen_addr;
    let mut app = App::new(config);
    register_routes(&mut app)?;

    let server = Server::bind(app, addr).await?;
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}

fn register_routes(app: &mut App) -> Result<(), ConfigError> {
    app.get(
        "/",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            ctx.serve_text("litekit\n");
            Ok::<(), BoxError>(())
        }),
    )?
    .get(
        "/hello/{name}",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            let name = ctx.request().path_param("name").unwrap_or("world").to_string();
            ctx.serve_text(format!("hello, {}\n", name));
            Ok::<(), BoxError>(())
        }),
    )?
    .get("/slow", handler_fn(slow))?
    .get("/panic", handler_fn(explode))?
    .get("/events", handler_fn(clock))?;

    let mut users = app.group("/api/users");
    users
        .get("/{id}", GetUser::default())?
        .post("/", CreateUser::default())?;

    Ok(())
}

/// Sleeps `?ms=` milliseconds (default 5000) unless the request is cancelled.
async fn slow(ctx: Arc<RequestContext>) -> Result<(), BoxError> {
    let ms: u64 = ctx.request().query_parse("ms").unwrap_or(5000);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(ms)) => {
            ctx.serve_data(serde_json::json!({ "slept_ms": ms }))?;
        }
        _ = ctx.cancelled() => {
            debug!(request_id = %ctx.request_id(), "slow handler cancelled");
        }
    }
    Ok(())
}

async fn explode(ctx: Arc<RequestContext>) -> Result<(), BoxError> {
    panic!("demo panic on {}", ctx.request().path());
}

/// Streams the current time once per second, `?count=` events (default 10).
async fn clock(ctx: Arc<RequestContext>) -> Result<(), BoxError> {
    let count: u64 = ctx.request().query_parse("count").unwrap_or(10);
    let events = ctx.open_sse()?;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    for seq in 0..count {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.cancelled() => break,
        }
        let now = logging::iso8601(std::time::SystemTime::now());
        let event = SseEvent::new(now).event("tick").id(seq.to_string());
        if events.send(&event).is_err() {
            debug!(request_id = %ctx.request_id(), "client left the stream");
            break;
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct User {
    id: u64,
    name: String,
}

#[derive(Default)]
struct GetUser {
    id: u64,
}

instance_clone!(GetUser { id });

#[async_trait]
impl Handler for GetUser {
    async fn parse_request(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        self.id = ctx
            .request()
            .path_param_parse("id")
            .ok_or_else(|| AppError::bad_request("id must be a number"))?;
        Ok(())
    }

    async fn serve(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        if self.id == 0 {
            return Err(AppError::not_found("user not found").into());
        }
        ctx.serve_data(User {
            id: self.id,
            name: format!("user-{}", self.id),
        })?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[derive(Default)]
struct CreateUser {
    name: String,
}

instance_clone!(CreateUser { name });

#[async_trait]
impl Handler for CreateUser {
    async fn parse_request(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        let body: NewUser = ctx.request().json()?;
        if body.name.trim().is_empty() {
            return Err(AppError::bad_request("name is required").into());
        }
        self.name = body.name;
        Ok(())
    }

    async fn serve(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        ctx.annotate("user_name", &self.name);
        ctx.serve_data(User {
            id: 1,
            name: std::mem::take(&mut self.name),
        })?;
        Ok(())
    }

    fn max_body_size(&self) -> Option<usize> {
        Some(4096)
    }
}
