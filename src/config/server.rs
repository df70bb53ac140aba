//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use super::parse::{env_duration, env_or, env_parse};
use super::ConfigError;
use crate::sink::DEFAULT_BODY_BUFFER;

/// Deadline for one request. `None` disables supervision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestTimeout(pub Option<Duration>);

impl RequestTimeout {
    pub const DISABLED: RequestTimeout = RequestTimeout(None);

    pub fn from_duration(duration: Duration) -> Self {
        Self(Some(duration).filter(|d| !d.is_zero()))
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    #[inline]
    pub fn as_millis(&self) -> u128 {
        self.0.map(|d| d.as_millis()).unwrap_or(0)
    }

    #[inline]
    pub fn as_duration(&self) -> Option<Duration> {
        self.0
    }
}

impl Default for RequestTimeout {
    fn default() -> Self {
        Self(Some(Duration::from_secs(30)))
    }
}

/// Server configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080).
    pub listen_addr: SocketAddr,
    /// Deadline for ordinary requests.
    pub request_timeout: RequestTimeout,
    /// Deadline for requests that accept `text/event-stream`.
    pub sse_timeout: RequestTimeout,
    /// Graceful shutdown drain timeout.
    pub shutdown_timeout: Duration,
    /// hyper header read timeout.
    pub header_read_timeout: Duration,
    /// Request bodies above this are rejected with 413.
    pub max_body_size: usize,
    /// Response body chunks queued ahead of a slow client.
    pub body_buffer: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr: SocketAddr = env_or("LISTEN_ADDR", "0.0.0.0:8080")
            .parse()
            .map_err(|e| ConfigError::Parse {
                key: "LISTEN_ADDR".into(),
                value: env_or("LISTEN_ADDR", "0.0.0.0:8080"),
                error: format!("{}", e),
            })?;

        let shutdown_timeout = env_duration("SHUTDOWN_TIMEOUT", "2s")?.unwrap_or(Duration::ZERO);
        let header_read_timeout = env_duration("HEADER_READ_TIMEOUT", "5s")?
            .ok_or_else(|| ConfigError::Invalid {
                key: "HEADER_READ_TIMEOUT".into(),
                message: "must be greater than zero".into(),
            })?;

        Ok(Self {
            listen_addr,
            request_timeout: RequestTimeout(env_duration("REQUEST_TIMEOUT", "30s")?),
            sse_timeout: RequestTimeout(env_duration("SSE_TIMEOUT", "30m")?),
            shutdown_timeout,
            header_read_timeout,
            max_body_size: env_parse("MAX_BODY_SIZE", 10 * 1024 * 1024)?,
            body_buffer: env_parse("BODY_BUFFER", DEFAULT_BODY_BUFFER)?,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout: RequestTimeout::default(),
            sse_timeout: RequestTimeout(Some(Duration::from_secs(30 * 60))),
            shutdown_timeout: Duration::from_secs(2),
            header_read_timeout: Duration::from_secs(5),
            max_body_size: 10 * 1024 * 1024,
            body_buffer: DEFAULT_BODY_BUFFER,
        }
    }
}
