//! Service timing stage.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};

use super::{Next, Stage};
use crate::core::RequestContext;

/// Echoes the log id as `X-Request-Id` and, once the chain returns, copies
/// the tracker's timings (`logid`, `<service>_t`, `all_t`, `self_t`) into
/// the request annotations.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrackerStage;

impl TrackerStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for TrackerStage {
    fn name(&self) -> &'static str {
        "tracker"
    }

    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id()) {
            ctx.set_header(HeaderName::from_static("x-request-id"), value);
        }

        next.run(Arc::clone(&ctx)).await;

        for (key, value) in ctx.tracker().fields() {
            ctx.annotate(key, value);
        }
    }
}
