//! Routing tests

use std::sync::Arc;

use async_trait::async_trait;
use crate::helpers::*;
use http::header::HeaderValue;
use http::{Method, StatusCode};
use litekit::{handler_fn, App, BoxError, Next, RequestContext, Stage};

struct Tag(&'static str);

#[async_trait]
impl Stage for Tag {
    fn name(&self) -> &'static str {
        "tag"
    }

    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
        ctx.set_header(
            http::header::HeaderName::from_static("x-stage"),
            HeaderValue::from_static(self.0),
        );
        next.run(ctx).await
    }
}

fn echo_param() -> litekit::handler::FnHandler {
    handler_fn(|ctx: Arc<RequestContext>| async move {
        let id = ctx.request().path_param("id").unwrap_or_default().to_string();
        ctx.serve_data(serde_json::json!({ "id": id }))?;
        Ok::<(), BoxError>(())
    })
}

fn app() -> TestApp {
    let mut app = App::new(test_config(None));
    app.get("/items/{id}", echo_param()).unwrap();
    app.delete("/items/{id}", echo_param()).unwrap();

    let mut admin = app.group("/admin");
    admin.use_stage(Tag("admin"));
    admin.get("/items/{id}", echo_param()).unwrap();

    TestApp::new(app)
}

#[tokio::test]
async fn test_path_params_reach_handler() {
    let resp = app().get("/items/abc").await;

    assert_eq!(resp.status, StatusCode::OK);
    let json = resp.json();
    assert_eq!(json["status"], 0);
    assert_eq!(json["data"]["id"], "abc");
    assert_eq!(json["logid"], resp.header("x-request-id").unwrap());
}

#[tokio::test]
async fn test_unknown_path_is_404_envelope() {
    let resp = app().get("/nope").await;
    assert_error_envelope(&resp, StatusCode::NOT_FOUND);
    assert!(resp.header("x-request-id").is_some());
}

#[tokio::test]
async fn test_wrong_method_is_405_with_allow() {
    let resp = app()
        .request(Method::POST, "/items/1", &[], bytes::Bytes::new())
        .await;

    assert_error_envelope(&resp, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.header("allow"), Some("GET, DELETE"));
}

#[tokio::test]
async fn test_group_stage_only_on_group_routes() {
    let app = app();

    let grouped = app.get("/admin/items/7").await;
    assert_eq!(grouped.status, StatusCode::OK);
    assert_eq!(grouped.header("x-stage"), Some("admin"));

    let plain = app.get("/items/7").await;
    assert!(plain.header("x-stage").is_none());
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let resp = app()
        .get_with_headers("/items/1", &[("x-request-id", "req-123")])
        .await;

    assert_eq!(resp.header("x-request-id"), Some("req-123"));
    assert_eq!(resp.json()["logid"], "req-123");
}
