//! Rate limiting stage.
//!
//! Fixed window counters keyed by client ip, path or a custom function,
//! plus an optional window-wide global limit.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, RETRY_AFTER};

use super::{Next, Stage};
use crate::config::{MiddlewareConfig, RateKeyKind};
use crate::core::{AppError, Request, RequestContext};

/// Counters are purged of expired windows once the map grows past this.
const PURGE_THRESHOLD: usize = 10_000;

/// Per-key request counter for a time window.
#[derive(Debug)]
struct WindowCounter {
    count: u64,
    window_start: Instant,
}

/// Fixed window rate limiter.
pub struct RateLimiter {
    counters: RwLock<HashMap<String, WindowCounter>>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter.
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            limit,
            window: Duration::from_secs(window_secs.max(1)),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Check if a request for the given key is allowed.
    /// Returns (allowed, remaining, reset_after_secs).
    pub fn check(&self, key: &str) -> (bool, u64, u64) {
        let now = Instant::now();

        // Fast path: read lock to reject keys already over the limit
        {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = counters.get(key) {
                let elapsed = now.duration_since(counter.window_start);
                if elapsed < self.window && counter.count >= self.limit {
                    let reset_after = (self.window - elapsed).as_secs().max(1);
                    return (false, 0, reset_after);
                }
            }
        }

        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        if counters.len() >= PURGE_THRESHOLD {
            let window = self.window;
            counters.retain(|_, c| now.duration_since(c.window_start) < window);
        }

        let counter = counters.entry(key.to_string()).or_insert(WindowCounter {
            count: 0,
            window_start: now,
        });

        let elapsed = now.duration_since(counter.window_start);
        if elapsed >= self.window {
            // Window expired, reset
            counter.count = 1;
            counter.window_start = now;
            (true, self.limit.saturating_sub(1), self.window.as_secs())
        } else if counter.count < self.limit {
            counter.count += 1;
            let remaining = self.limit - counter.count;
            let reset_after = (self.window - elapsed).as_secs().max(1);
            (true, remaining, reset_after)
        } else {
            let reset_after = (self.window - elapsed).as_secs().max(1);
            (false, 0, reset_after)
        }
    }
}

/// What requests are counted by.
#[derive(Clone)]
pub enum RateKey {
    /// Client ip (`X-Forwarded-For`, `X-Real-IP`, then the peer).
    Ip,
    Path,
    Custom(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl RateKey {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        RateKey::Custom(Arc::new(f))
    }

    fn key_for(&self, request: &Request) -> String {
        match self {
            RateKey::Ip => request
                .client_ip()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            RateKey::Path => request.path().to_string(),
            RateKey::Custom(f) => f(request),
        }
    }
}

impl fmt::Debug for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateKey::Ip => f.write_str("Ip"),
            RateKey::Path => f.write_str("Path"),
            RateKey::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Rate limiting stage.
///
/// Requests over the limit get `AppError::too_many_requests` and never
/// reach the rest of the pipeline. Every response carries the
/// `X-RateLimit-*` headers; rejections also carry `Retry-After`.
pub struct RateLimitStage {
    limiter: Option<RateLimiter>,
    global: Option<RateLimiter>,
    key: RateKey,
}

impl RateLimitStage {
    /// Create a new per-key rate limit stage.
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self {
            limiter: Some(RateLimiter::new(limit, window_secs)),
            global: None,
            key: RateKey::Ip,
        }
    }

    /// A stage with only the window-wide limit.
    pub fn global_only(limit: u64, window_secs: u64) -> Self {
        Self {
            limiter: None,
            global: Some(RateLimiter::new(limit, window_secs)),
            key: RateKey::Ip,
        }
    }

    pub fn key(mut self, key: RateKey) -> Self {
        self.key = key;
        self
    }

    pub fn global(mut self, limit: u64, window_secs: u64) -> Self {
        self.global = Some(RateLimiter::new(limit, window_secs));
        self
    }

    /// Create from middleware configuration.
    /// Returns None if rate limiting is not configured.
    pub fn from_config(config: &MiddlewareConfig) -> Option<Self> {
        let key = match config.rate_limit_key {
            RateKeyKind::Ip => RateKey::Ip,
            RateKeyKind::Path => RateKey::Path,
        };
        let stage = match (config.rate_limit, config.global_rate_limit) {
            (None, None) => return None,
            (Some(limit), _) => Self::new(limit, config.rate_window),
            (None, Some(global)) => Self::global_only(global, config.rate_window),
        };
        let stage = match (config.rate_limit, config.global_rate_limit) {
            (Some(_), Some(global)) => stage.global(global, config.rate_window),
            _ => stage,
        };
        Some(stage.key(key))
    }
}

fn header_value(n: u64) -> HeaderValue {
    HeaderValue::from(n)
}

fn reject(ctx: &RequestContext, limit: u64, reset: u64, scope: &str) {
    tracing::debug!(
        request_id = %ctx.request_id(),
        scope = scope,
        limit = limit,
        reset = reset,
        "rate limit exceeded"
    );
    ctx.set_error(
        AppError::too_many_requests("rate limit exceeded")
            .with_header(RETRY_AFTER, header_value(reset))
            .with_header(HeaderName::from_static("x-ratelimit-limit"), header_value(limit))
            .with_header(HeaderName::from_static("x-ratelimit-remaining"), header_value(0))
            .with_header(HeaderName::from_static("x-ratelimit-reset"), header_value(reset)),
    );
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, ctx: Arc<RequestContext>, next: Next) {
        if let Some(global) = &self.global {
            let (allowed, _, reset) = global.check("*");
            if !allowed {
                reject(&ctx, global.limit(), reset, "global");
                return;
            }
        }

        if let Some(limiter) = &self.limiter {
            let key = self.key.key_for(ctx.request());
            let (allowed, remaining, reset) = limiter.check(&key);
            if !allowed {
                reject(&ctx, limiter.limit(), reset, "key");
                return;
            }

            ctx.set_header(
                HeaderName::from_static("x-ratelimit-limit"),
                header_value(limiter.limit()),
            );
            ctx.set_header(
                HeaderName::from_static("x-ratelimit-remaining"),
                header_value(remaining),
            );
            ctx.set_header(HeaderName::from_static("x-ratelimit-reset"), header_value(reset));
        }

        next.run(ctx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{service_fn, testing, Service, StageQueue};
    use crate::sink::{MemorySink, ResponseSink};
    use http::StatusCode;
    use std::net::SocketAddr;

    fn request_from(ip: &str, path: &str) -> Request {
        let addr: SocketAddr = format!("{}:5000", ip).parse().unwrap();
        testing::request(http::Method::GET, path).with_remote_addr(addr)
    }

    async fn hit(stage: &StageQueue, request: Request) -> (Arc<MemorySink>, Arc<RequestContext>) {
        let (memory, ctx) = testing::context_for(request);
        stage
            .apply(Arc::new(service_fn(|ctx: Arc<RequestContext>| async move {
                ctx.write("ok").unwrap();
            })))
            .call(ctx.clone())
            .await;
        (memory, ctx)
    }

    #[test]
    fn test_limiter_window() {
        let limiter = RateLimiter::new(2, 60);
        let (allowed, remaining, _) = limiter.check("a");
        assert!(allowed);
        assert_eq!(remaining, 1);
        assert!(limiter.check("a").0);
        let (allowed, remaining, reset) = limiter.check("a");
        assert!(!allowed);
        assert_eq!(remaining, 0);
        assert!(reset >= 1);

        // Other keys are independent
        assert!(limiter.check("b").0);
    }

    #[tokio::test]
    async fn test_allows_under_limit() {
        let queue = StageQueue::new().with(RateLimitStage::new(5, 60));

        for i in 0..5 {
            let (memory, ctx) = hit(&queue, request_from("127.0.0.1", "/")).await;
            assert!(!ctx.has_error(), "Request {} should be allowed", i);
            assert_eq!(memory.headers()["x-ratelimit-limit"], "5");
        }
    }

    #[tokio::test]
    async fn test_blocks_over_limit() {
        let queue = StageQueue::new().with(RateLimitStage::new(3, 60));

        for _ in 0..3 {
            let (_, ctx) = hit(&queue, request_from("192.168.1.1", "/")).await;
            assert!(!ctx.has_error());
        }

        let (memory, ctx) = hit(&queue, request_from("192.168.1.1", "/")).await;
        let err = ctx.error().unwrap();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(err.headers.iter().any(|(name, _)| name == RETRY_AFTER));
        assert!(memory.status().is_none());
    }

    #[tokio::test]
    async fn test_different_ips_separate_limits() {
        let queue = StageQueue::new().with(RateLimitStage::new(2, 60));

        for _ in 0..2 {
            hit(&queue, request_from("10.0.0.1", "/")).await;
        }
        let (_, ctx) = hit(&queue, request_from("10.0.0.1", "/")).await;
        assert!(ctx.has_error());

        for _ in 0..2 {
            let (_, ctx) = hit(&queue, request_from("10.0.0.2", "/")).await;
            assert!(!ctx.has_error());
        }
    }

    #[tokio::test]
    async fn test_path_key() {
        let queue = StageQueue::new().with(RateLimitStage::new(1, 60).key(RateKey::Path));

        let (_, ctx) = hit(&queue, request_from("10.0.0.1", "/a")).await;
        assert!(!ctx.has_error());
        let (_, ctx) = hit(&queue, request_from("10.0.0.2", "/a")).await;
        assert!(ctx.has_error());
        let (_, ctx) = hit(&queue, request_from("10.0.0.2", "/b")).await;
        assert!(!ctx.has_error());
    }

    #[tokio::test]
    async fn test_global_limit_checked_first() {
        let queue = StageQueue::new().with(RateLimitStage::new(100, 60).global(2, 60));

        hit(&queue, request_from("10.0.0.1", "/")).await;
        hit(&queue, request_from("10.0.0.2", "/")).await;
        let (_, ctx) = hit(&queue, request_from("10.0.0.3", "/")).await;
        assert_eq!(ctx.error().unwrap().kind, crate::core::ErrorKind::TooManyRequests);
    }

    #[test]
    fn test_from_config() {
        let config = MiddlewareConfig {
            rate_limit: Some(100),
            rate_window: 120,
            ..MiddlewareConfig::default()
        };
        assert!(RateLimitStage::from_config(&config).is_some());

        assert!(RateLimitStage::from_config(&MiddlewareConfig::default()).is_none());

        let global_only = MiddlewareConfig {
            global_rate_limit: Some(10),
            ..MiddlewareConfig::default()
        };
        let stage = RateLimitStage::from_config(&global_only).unwrap();
        assert!(stage.limiter.is_none());
        assert!(stage.global.is_some());
    }
}
