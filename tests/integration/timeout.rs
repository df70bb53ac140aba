//! Request deadline tests

use std::sync::Arc;
use std::time::Duration;

use crate::helpers::*;
use http::StatusCode;
use litekit::{handler_fn, App, BoxError, RequestContext};

/// Handler ignores cancellation, sleeps past the deadline, then writes.
async fn sleepy(ctx: Arc<RequestContext>) -> Result<(), BoxError> {
    tokio::time::sleep(Duration::from_millis(300)).await;
    let _ = ctx.write("late");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_late_write_never_reaches_client() {
    let mut app = App::new(test_config(Some(Duration::from_millis(50))));
    app.get("/sleepy", handler_fn(sleepy)).unwrap();
    let app = TestApp::new(app);

    let resp = app.get("/sleepy").await;

    assert_error_envelope(&resp, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(resp.json()["msg"], "request timeout");
    assert!(!resp.text().contains("late"));

    // Give the detached worker time to attempt its write
    tokio::time::sleep(Duration::from_millis(400)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fast_handler_completes() {
    let mut app = App::new(test_config(Some(Duration::from_millis(500))));
    app.get(
        "/fast",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            ctx.serve_text("done");
            Ok::<(), BoxError>(())
        }),
    )
    .unwrap();
    let app = TestApp::new(app);

    let resp = app.get("/fast").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "done");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_timeout_runs_unsupervised() {
    let mut app = App::new(test_config(None));
    app.get(
        "/slowish",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            ctx.serve_text("finished");
            Ok::<(), BoxError>(())
        }),
    )
    .unwrap();
    let app = TestApp::new(app);

    let resp = app.get("/slowish").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "finished");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_stream_requests_use_sse_deadline() {
    let mut config = test_config(Some(Duration::from_millis(50)));
    config.server.sse_timeout = litekit::config::RequestTimeout(Some(Duration::from_secs(5)));
    let mut app = App::new(config);
    app.get(
        "/wait",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            ctx.serve_text("waited");
            Ok::<(), BoxError>(())
        }),
    )
    .unwrap();
    let app = TestApp::new(app);

    let plain = app.get("/wait").await;
    assert_eq!(plain.status, StatusCode::REQUEST_TIMEOUT);

    let streaming = app
        .get_with_headers("/wait", &[("accept", "text/event-stream")])
        .await;
    assert_eq!(streaming.status, StatusCode::OK);
    assert_eq!(streaming.text(), "waited");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cooperative_handler_observes_cancellation() {
    let observed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&observed);

    let mut app = App::new(test_config(Some(Duration::from_millis(50))));
    app.get(
        "/coop",
        handler_fn(move |ctx: Arc<RequestContext>| {
            let flag = Arc::clone(&flag);
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    _ = ctx.cancelled() => flag.store(true, std::sync::atomic::Ordering::SeqCst),
                }
                Ok::<(), BoxError>(())
            }
        }),
    )
    .unwrap();
    let app = TestApp::new(app);

    let resp = app.get("/coop").await;
    assert_eq!(resp.status, StatusCode::REQUEST_TIMEOUT);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(observed.load(std::sync::atomic::Ordering::SeqCst));
}
