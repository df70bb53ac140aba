//! Configuration loaded from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use litekit::config::Config;
//!
//! let config = Config::from_env()?;
//! config.log_summary();
//! ```

mod error;
mod logging;
mod middleware;
mod parse;
mod server;

pub use error::ConfigError;
pub use logging::{LogFormat, LoggingConfig};
pub use middleware::{MiddlewareConfig, RateKeyKind};
pub use parse::parse_duration;
pub use server::{RequestTimeout, ServerConfig};

/// Complete application configuration.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub middleware: MiddlewareConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            middleware: MiddlewareConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Log the effective configuration.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {}", self.server.listen_addr);

        match self.server.request_timeout.as_duration() {
            Some(timeout) => info!("  Request timeout: {:?}", timeout),
            None => info!("  Request timeout: disabled"),
        }
        match self.server.sse_timeout.as_duration() {
            Some(timeout) => info!("  SSE timeout: {:?}", timeout),
            None => info!("  SSE timeout: disabled"),
        }
        info!("  Shutdown timeout: {:?}", self.server.shutdown_timeout);
        info!("  Max body size: {} bytes", self.server.max_body_size);
        info!("  Body buffer: {} chunks", self.server.body_buffer);

        if let Some(limit) = self.middleware.rate_limit {
            info!(
                "  Rate limit: {} req/{}s per {:?}",
                limit, self.middleware.rate_window, self.middleware.rate_limit_key
            );
        }
        if let Some(limit) = self.middleware.global_rate_limit {
            info!(
                "  Global rate limit: {} req/{}s",
                limit, self.middleware.rate_window
            );
        }

        if self.middleware.access_log {
            info!("  Access log: enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_defaults() {
        for key in [
            "LISTEN_ADDR",
            "REQUEST_TIMEOUT",
            "SSE_TIMEOUT",
            "SHUTDOWN_TIMEOUT",
            "HEADER_READ_TIMEOUT",
            "MAX_BODY_SIZE",
            "RATE_LIMIT",
            "RATE_WINDOW",
            "RATE_LIMIT_KEY",
            "GLOBAL_RATE_LIMIT",
            "ACCESS_LOG",
            "LOG_FORMAT",
        ] {
            std::env::remove_var(key);
        }

        let config = Config::from_env().expect("Should load config");

        assert_eq!(config.server.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(
            config.server.request_timeout.as_duration(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            config.server.sse_timeout.as_duration(),
            Some(Duration::from_secs(1800))
        );
        assert_eq!(config.server.max_body_size, 10 * 1024 * 1024);
        assert!(config.middleware.rate_limit.is_none());
        assert!(config.middleware.access_log);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
