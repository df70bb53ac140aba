//! Writes served payloads once the handler returns.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use tracing::{debug, warn};

use super::{Next, Stage};
use crate::core::RequestContext;

/// Response finalization stage.
///
/// Handlers may hand over a [`Payload`](crate::core::Payload) through
/// `serve_json`/`serve_data`/`serve_text`/... instead of writing bytes.
/// This stage writes it with the matching Content-Type after the chain
/// returns. A payload is dropped when an error was recorded, and ignored
/// with a warning when the handler already wrote the body itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct FinalizeStage;

impl FinalizeStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Stage for FinalizeStage {
    fn name(&self) -> &'static str {
        "finalize"
    }

    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
        next.run(Arc::clone(&ctx)).await;

        let Some(payload) = ctx.take_payload() else {
            return;
        };
        if ctx.has_error() || ctx.is_cancelled() {
            debug!(request_id = %ctx.request_id(), "dropping payload of failed request");
            return;
        }
        if ctx.has_written() {
            warn!(
                request_id = %ctx.request_id(),
                "handler wrote the body directly, served payload ignored"
            );
            return;
        }

        let output = ctx.output();
        output.set_header(CONTENT_TYPE, HeaderValue::from_static(payload.content_type()));
        output.write_header(StatusCode::OK);
        if let Err(e) = output.write(&payload.into_bytes()) {
            debug!(request_id = %ctx.request_id(), error = %e, "payload write rejected");
        }
    }
}
