//! Middleware configuration.

use super::parse::{env_bool, env_or, env_parse};
use super::ConfigError;

/// What the rate limiter counts requests by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateKeyKind {
    Ip,
    Path,
}

/// Middleware configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct MiddlewareConfig {
    /// Rate limit: max requests per key per window (0 = disabled).
    pub rate_limit: Option<u64>,
    /// Rate limit window in seconds.
    pub rate_window: u64,
    pub rate_limit_key: RateKeyKind,
    /// Window-wide limit across all keys.
    pub global_rate_limit: Option<u64>,
    /// Access logging enabled.
    pub access_log: bool,
    pub log_request_body: bool,
    pub log_response_body: bool,
}

impl MiddlewareConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rate_limit: u64 = env_parse("RATE_LIMIT", 0)?;
        let global_rate_limit: u64 = env_parse("GLOBAL_RATE_LIMIT", 0)?;
        let rate_window: u64 = env_parse("RATE_WINDOW", 60)?;
        if rate_window == 0 {
            return Err(ConfigError::Invalid {
                key: "RATE_WINDOW".into(),
                message: "must be greater than zero".into(),
            });
        }

        let rate_limit_key = match env_or("RATE_LIMIT_KEY", "ip").to_lowercase().as_str() {
            "ip" => RateKeyKind::Ip,
            "path" => RateKeyKind::Path,
            other => {
                return Err(ConfigError::Invalid {
                    key: "RATE_LIMIT_KEY".into(),
                    message: format!("expected 'ip' or 'path', got '{}'", other),
                })
            }
        };

        Ok(Self {
            rate_limit: Some(rate_limit).filter(|&n| n > 0),
            rate_window,
            rate_limit_key,
            global_rate_limit: Some(global_rate_limit).filter(|&n| n > 0),
            access_log: env_bool("ACCESS_LOG", true),
            log_request_body: env_bool("LOG_REQUEST_BODY", false),
            log_response_body: env_bool("LOG_RESPONSE_BODY", false),
        })
    }

    /// Check if rate limiting is enabled.
    pub fn is_rate_limiting_enabled(&self) -> bool {
        self.rate_limit.is_some() || self.global_rate_limit.is_some()
    }
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            rate_limit: None,
            rate_window: 60,
            rate_limit_key: RateKeyKind::Ip,
            global_rate_limit: None,
            access_log: true,
            log_request_body: false,
            log_response_body: false,
        }
    }
}
