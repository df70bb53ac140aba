//! Tests over a real socket

use std::sync::Arc;

use crate::helpers::*;
use litekit::{handler_fn, App, BoxError, RequestContext};
use reqwest::StatusCode;

fn app(max_body_size: usize) -> App {
    let mut config = test_config(None);
    config.server.max_body_size = max_body_size;
    let mut app = App::new(config);
    app.get(
        "/hello/{name}",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            let name = ctx.request().path_param("name").unwrap_or("world").to_string();
            ctx.serve_text(format!("hello, {}", name));
            Ok::<(), BoxError>(())
        }),
    )
    .unwrap();
    app.post(
        "/echo",
        handler_fn(|ctx: Arc<RequestContext>| async move {
            ctx.serve_bytes(ctx.request().body().clone());
            Ok::<(), BoxError>(())
        }),
    )
    .unwrap();
    app
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_over_tcp() {
    let (base, shutdown) = spawn_server(app(1024)).await;

    let resp = reqwest::get(format!("{}/hello/tcp", base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(resp.text().await.unwrap(), "hello, tcp");

    let missing = reqwest::get(format!("{}/missing", base)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let json: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(json["status"], 404);

    shutdown.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_body_limit_over_tcp() {
    let (base, shutdown) = spawn_server(app(16)).await;
    let client = reqwest::Client::new();

    let small = client
        .post(format!("{}/echo", base))
        .body("tiny")
        .send()
        .await
        .unwrap();
    assert_eq!(small.status(), StatusCode::OK);
    assert_eq!(small.text().await.unwrap(), "tiny");

    let large = client
        .post(format!("{}/echo", base))
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);

    shutdown.shutdown();
}
