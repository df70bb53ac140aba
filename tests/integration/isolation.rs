//! Per-request handler instance tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crate::helpers::*;
use http::StatusCode;
use litekit::{instance_clone, App, BoxError, Handler, RequestContext};

/// Writer requests store 42 and hold on to it; readers report what they see.
#[derive(Default)]
struct Slot {
    value: Option<Box<i64>>,
    seen: HashMap<String, i64>,
}

instance_clone!(Slot { value, seen });

#[async_trait]
impl Handler for Slot {
    async fn serve(&mut self, ctx: &Arc<RequestContext>) -> Result<(), BoxError> {
        if ctx.request().query_bool("write") {
            self.value = Some(Box::new(42));
            self.seen.insert("writer".into(), 42);
            tokio::time::sleep(Duration::from_millis(100)).await;
        } else {
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        ctx.serve_json(&serde_json::json!({
            "value": self.value.as_deref().copied(),
            "seen": self.seen.len(),
        }))?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_requests_get_separate_instances() {
    let mut app = App::new(test_config(Some(Duration::from_secs(5))));
    app.get("/slot", Slot::default()).unwrap();
    let app = TestApp::new(app);

    let (writer, reader) = tokio::join!(app.get("/slot?write=1"), app.get("/slot"));

    assert_eq!(writer.status, StatusCode::OK);
    assert_eq!(writer.json()["value"], 42);
    assert_eq!(reader.status, StatusCode::OK);
    assert!(reader.json()["value"].is_null());
    assert_eq!(reader.json()["seen"], 0);

    // The template was never touched
    let after = app.get("/slot").await;
    assert!(after.json()["value"].is_null());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_template_defaults_seed_every_instance() {
    let mut template = Slot::default();
    template.value = Some(Box::new(7));

    let mut app = App::new(test_config(None));
    app.get("/slot", template).unwrap();
    let app = TestApp::new(app);

    let first = app.get("/slot?write=1").await;
    let second = app.get("/slot").await;

    assert_eq!(first.json()["value"], 42);
    assert_eq!(second.json()["value"], 7);
}
