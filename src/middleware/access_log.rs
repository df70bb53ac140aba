//! Access logging stage.
//!
//! One `access` event per request, emitted after the rest of the chain
//! returns. Everything the request annotated on its context rides along
//! in the `fields` object, which the JSON formatter merges into `data`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use http::{Method, StatusCode};

use super::{Next, Stage};
use crate::config::MiddlewareConfig;
use crate::core::RequestContext;
use crate::sink::CaptureSink;

/// Bodies longer than this are cut in the log.
const DEFAULT_BODY_LIMIT: usize = 4096;

/// Access logging stage.
///
/// Wraps the output in a [`CaptureSink`] to learn the status and size of
/// what the handler wrote. The logged status is the recorded error's
/// status when there is one, since the error stage replaces the response
/// after this stage has finished.
#[derive(Clone, Debug, Default)]
pub struct AccessLogStage {
    log_request_body: bool,
    log_response_body: bool,
    body_limit: usize,
}

impl AccessLogStage {
    pub fn new() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT,
            ..Self::default()
        }
    }

    pub fn from_config(config: &MiddlewareConfig) -> Self {
        Self {
            log_request_body: config.log_request_body,
            log_response_body: config.log_response_body,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn log_request_body(mut self, enabled: bool) -> Self {
        self.log_request_body = enabled;
        self
    }

    pub fn log_response_body(mut self, enabled: bool) -> Self {
        self.log_response_body = enabled;
        self
    }

    fn truncated(&self, body: &[u8]) -> String {
        let end = body.len().min(self.body_limit);
        String::from_utf8_lossy(&body[..end]).into_owned()
    }
}

#[async_trait]
impl Stage for AccessLogStage {
    fn name(&self) -> &'static str {
        "access_log"
    }

    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
        let capture = Arc::new(if self.log_response_body {
            CaptureSink::with_body(ctx.output(), self.body_limit)
        } else {
            CaptureSink::new(ctx.output())
        });
        ctx.wrap_output(|_| capture.clone());

        let request = ctx.request();
        ctx.annotate("method", request.method().as_str());
        ctx.annotate("url", request.uri().to_string());
        if let Some(ip) = request.client_ip() {
            ctx.annotate("client_ip", ip.to_string());
        }
        if self.log_request_body
            && request.method() != Method::GET
            && request.method() != Method::DELETE
            && !request.body().is_empty()
        {
            ctx.annotate("request_body", self.truncated(request.body()));
        }

        let outcome = AssertUnwindSafe(next.run(Arc::clone(&ctx)))
            .catch_unwind()
            .await;

        let status = match (&outcome, ctx.error()) {
            (Err(_), _) => StatusCode::INTERNAL_SERVER_ERROR,
            (Ok(()), Some(err)) => err.status(),
            (Ok(()), None) => capture.captured_status().unwrap_or(StatusCode::OK),
        };
        ctx.annotate("status", status.as_u16());
        ctx.annotate("bytes", capture.bytes_written());
        if let Some(body) = capture.captured_body() {
            ctx.annotate("response_body", self.truncated(&body));
        }

        let request = ctx.request();
        let fields = serde_json::Value::Object(ctx.annotations()).to_string();
        tracing::info!(
            target: "access",
            method = %request.method(),
            path = %request.path(),
            status = status.as_u16(),
            duration_ms = ctx.elapsed().as_secs_f64() * 1000.0,
            request_id = %ctx.request_id(),
            fields = %fields,
            "request completed"
        );

        if let Err(payload) = outcome {
            std::panic::resume_unwind(payload);
        }
    }
}
