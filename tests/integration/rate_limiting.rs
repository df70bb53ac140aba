//! Rate limiting tests

use std::sync::Arc;

use crate::helpers::*;
use http::StatusCode;
use litekit::{handler_fn, App, BoxError, RequestContext};

fn app(limit: u64) -> TestApp {
    let mut config = test_config(None);
    config.middleware.rate_limit = Some(limit);
    config.middleware.rate_window = 60;
    let mut app = App::new(config);
    app.get(
        "/ping",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            ctx.serve_text("pong");
            Ok::<(), BoxError>(())
        }),
    )
    .unwrap();
    TestApp::new(app)
}

#[tokio::test]
async fn test_rate_limit_headers_present() {
    let resp = app(5).get("/ping").await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.header("x-ratelimit-limit"), Some("5"));
    assert_eq!(resp.header("x-ratelimit-remaining"), Some("4"));
    assert!(resp.header("x-ratelimit-reset").is_some());
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let app = app(2);
    assert_eq!(app.get("/ping").await.status, StatusCode::OK);
    assert_eq!(app.get("/ping").await.status, StatusCode::OK);

    let resp = app.get("/ping").await;
    assert_error_envelope(&resp, StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.header("retry-after").is_some());
    assert_eq!(resp.header("x-ratelimit-remaining"), Some("0"));
    assert!(!resp.text().contains("pong"));
}
