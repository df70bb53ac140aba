//! JSON logging with one line per event.
//!
//! Log format:
//! ```json
//! {"ts":"2026-01-28T15:04:05.123Z","level":"info","type":"access","msg":"GET /users 200","ctx":{"service":"litekit","request_id":"5f0c2a9e41b7d3c8"},"data":{...}}
//! ```
//!
//! `type` follows the event target: `access` and `panic` keep their own
//! type, any other ERROR event is `error`, the rest is `app`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Log entry with unified structure.
#[derive(Serialize)]
pub struct LogEntry<'a> {
    /// ISO 8601 timestamp with milliseconds, UTC
    pub ts: &'a str,
    pub level: &'a str,
    #[serde(rename = "type")]
    pub log_type: &'a str,
    /// Short human-readable message
    pub msg: &'a str,
    pub ctx: LogContext<'a>,
    /// Type-specific data
    pub data: &'a serde_json::Map<String, serde_json::Value>,
}

/// Log context.
#[derive(Serialize, Default)]
pub struct LogContext<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<&'a str>,
    /// Request ID for correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<&'a str>,
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_new(&config.filter)
        .unwrap_or_else(|_| EnvFilter::new("litekit=info,access=info,panic=info"));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(JsonFormatter::new(config.service_name.clone())),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    }
}

/// Custom JSON formatter for tracing.
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Build the JSON line for one event's level, target and fields.
    fn render(&self, level: &Level, target: &str, mut visitor: FieldVisitor) -> String {
        let level_str = match *level {
            Level::TRACE | Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };

        let log_type = match target {
            "access" => "access",
            "panic" => "panic",
            _ if *level == Level::ERROR => "error",
            _ => "app",
        };

        // Access events carry their annotations as one JSON string
        if let Some(serde_json::Value::String(raw)) = visitor.fields.remove("fields") {
            if let Ok(serde_json::Value::Object(extra)) = serde_json::from_str(&raw) {
                for (key, value) in extra {
                    visitor.fields.entry(key).or_insert(value);
                }
            }
        }

        let msg = if log_type == "access" {
            let method = visitor.fields.get("method").and_then(|v| v.as_str()).unwrap_or("?");
            let path = visitor.fields.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            let status = visitor.fields.get("status").and_then(|v| v.as_u64()).unwrap_or(0);
            format!("{} {} {}", method, path, status)
        } else {
            visitor.message.clone().unwrap_or_default()
        };

        let request_id = match visitor.fields.remove("request_id") {
            Some(serde_json::Value::String(id)) => Some(id),
            _ => None,
        };

        let ts = iso8601(SystemTime::now());
        let entry = LogEntry {
            ts: &ts,
            level: level_str,
            log_type,
            msg: &msg,
            ctx: LogContext {
                service: Some(&self.service_name),
                request_id: request_id.as_deref(),
            },
            data: &visitor.fields,
        };

        serde_json::to_string(&entry).unwrap_or_default()
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        writeln!(writer, "{}", self.render(meta.level(), meta.target(), visitor))
    }
}

/// Field visitor for collecting tracing fields.
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value).trim_matches('"').to_string());
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(format!("{:?}", value)),
            );
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` for a point in time (UTC).
pub fn iso8601(time: SystemTime) -> String {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    let secs = since_epoch.as_secs();
    let (year, month, day) = civil_from_days((secs / 86400) as i64);
    let day_secs = secs % 86400;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year,
        month,
        day,
        day_secs / 3600,
        (day_secs % 3600) / 60,
        day_secs % 60,
        since_epoch.subsec_millis()
    )
}

/// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visitor(fields: serde_json::Value, message: Option<&str>) -> FieldVisitor {
        FieldVisitor {
            message: message.map(str::to_string),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    fn parse(line: &str) -> serde_json::Value {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn test_iso8601() {
        assert_eq!(iso8601(UNIX_EPOCH), "1970-01-01T00:00:00.000Z");
        let t = UNIX_EPOCH + Duration::from_millis(1_709_210_096_789);
        assert_eq!(iso8601(t), "2024-02-29T12:34:56.789Z");
    }

    #[test]
    fn test_access_entry_merges_annotations() {
        let formatter = JsonFormatter::new("svc");
        let fields = serde_json::json!({
            "method": "GET",
            "path": "/users",
            "status": 200,
            "request_id": "abc",
            "fields": r#"{"logid":"abc","db_t":3}"#,
        });

        let entry = parse(&formatter.render(&Level::INFO, "access", visitor(fields, None)));

        assert_eq!(entry["type"], "access");
        assert_eq!(entry["msg"], "GET /users 200");
        assert_eq!(entry["ctx"]["service"], "svc");
        assert_eq!(entry["ctx"]["request_id"], "abc");
        assert_eq!(entry["data"]["db_t"], 3);
        assert!(entry["data"].get("fields").is_none());
    }

    #[test]
    fn test_log_types() {
        let formatter = JsonFormatter::new("svc");
        let panic = parse(&formatter.render(
            &Level::ERROR,
            "panic",
            visitor(serde_json::json!({}), Some("handler panicked")),
        ));
        assert_eq!(panic["type"], "panic");
        assert_eq!(panic["msg"], "handler panicked");

        let error = parse(&formatter.render(
            &Level::ERROR,
            "litekit::server",
            visitor(serde_json::json!({}), Some("bind failed")),
        ));
        assert_eq!(error["type"], "error");

        let app = parse(&formatter.render(
            &Level::WARN,
            "litekit::middleware",
            visitor(serde_json::json!({"kind": "timeout"}), Some("request failed")),
        ));
        assert_eq!(app["type"], "app");
        assert_eq!(app["level"], "warn");
        assert_eq!(app["data"]["kind"], "timeout");
    }
}
