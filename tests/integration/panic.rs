//! Panic recovery tests

use std::sync::Arc;
use std::time::Duration;

use crate::helpers::*;
use http::StatusCode;
use litekit::{handler_fn, App, BoxError, RequestContext, TracingCrashReporter};

async fn boom(_ctx: Arc<RequestContext>) -> Result<(), BoxError> {
    panic!("boom");
}

async fn write_then_boom(ctx: Arc<RequestContext>) -> Result<(), BoxError> {
    let _ = ctx.write("partial output");
    panic!("boom");
}

fn app_with(timeout: Option<Duration>, reporter: Arc<TracingCrashReporter>) -> TestApp {
    let mut app = App::new(test_config(timeout)).with_crash_reporter(reporter);
    app.get("/boom", handler_fn(boom)).unwrap();
    app.get("/partial", handler_fn(write_then_boom)).unwrap();
    TestApp::new(app)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panic_under_supervisor_reported_once() {
    let reporter = Arc::new(TracingCrashReporter::new());
    let app = app_with(Some(Duration::from_secs(5)), Arc::clone(&reporter));

    let resp = app.get("/boom").await;

    assert_error_envelope(&resp, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!resp.text().contains("boom"));
    assert_eq!(reporter.reported(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panic_without_supervisor_reported_once() {
    let reporter = Arc::new(TracingCrashReporter::new());
    let app = app_with(None, Arc::clone(&reporter));

    let resp = app.get("/boom").await;

    assert_error_envelope(&resp, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!resp.text().contains("boom"));
    assert_eq!(reporter.reported(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_panic_discards_buffered_output() {
    let reporter = Arc::new(TracingCrashReporter::new());
    let app = app_with(Some(Duration::from_secs(5)), Arc::clone(&reporter));

    let resp = app.get("/partial").await;

    assert_error_envelope(&resp, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!resp.text().contains("partial output"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_server_keeps_serving_after_panic() {
    let reporter = Arc::new(TracingCrashReporter::new());
    let mut app = App::new(test_config(Some(Duration::from_secs(5))))
        .with_crash_reporter(Arc::clone(&reporter) as Arc<dyn litekit::CrashReporter>);
    app.get("/boom", handler_fn(boom)).unwrap();
    app.get(
        "/ok",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            ctx.serve_text("still here");
            Ok::<(), BoxError>(())
        }),
    )
    .unwrap();
    let app = TestApp::new(app);

    for _ in 0..3 {
        assert_eq!(app.get("/boom").await.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
    let resp = app.get("/ok").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "still here");
    assert_eq!(reporter.reported(), 3);
}
