//! Server-sent events tests

use std::sync::Arc;
use std::time::Duration;

use crate::helpers::*;
use http::StatusCode;
use litekit::sink::SseEvent;
use litekit::{handler_fn, App, AppError, BoxError, RequestContext};

async fn ticks(ctx: Arc<RequestContext>) -> Result<(), BoxError> {
    let events = ctx.open_sse()?;
    for i in 0..3 {
        events.send(&SseEvent::new(format!("tick {}", i)).event("tick").id(i.to_string()))?;
    }
    events.send_data("multi\nline")?;
    Ok(())
}

async fn stream_then_fail(ctx: Arc<RequestContext>) -> Result<(), BoxError> {
    let events = ctx.open_sse()?;
    events.send_event("start", "ok")?;
    Err(AppError::internal("upstream went away").into())
}

fn app() -> TestApp {
    let mut config = test_config(Some(Duration::from_millis(500)));
    config.server.sse_timeout = litekit::config::RequestTimeout(Some(Duration::from_secs(5)));
    let mut app = App::new(config);
    app.get("/ticks", handler_fn(ticks)).unwrap();
    app.get("/broken", handler_fn(stream_then_fail)).unwrap();
    TestApp::new(app)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sse_stream_framing() {
    let resp = app()
        .get_with_headers("/ticks", &[("accept", "text/event-stream")])
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.header("content-type"), Some("text/event-stream"));
    assert_eq!(resp.header("cache-control"), Some("no-cache"));

    let body = resp.text();
    assert!(body.starts_with("id: 0\nevent: tick\ndata: tick 0\n\n"));
    assert!(body.contains("id: 2\nevent: tick\ndata: tick 2\n\n"));
    assert!(body.ends_with("data: multi\ndata: line\n\n"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_after_stream_keeps_stream() {
    let resp = app()
        .get_with_headers("/broken", &[("accept", "text/event-stream")])
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "event: start\ndata: ok\n\n");
}
