//! Server-sent events over a response sink.
//!
//! Each event is written as prefixed lines followed by a blank line:
//!
//! ```text
//! id: 7
//! event: tick
//! retry: 3000
//! data: first line
//! data: second line
//!
//! ```
//!
//! Line breaks inside `id` and `event` are removed. Data is split on `\n`
//! with stray `\r` dropped, so payloads cannot break the framing.

use std::sync::Arc;

use http::header::{self, HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;

use super::{ResponseSink, SinkError};

/// Event payload: sent as-is when text, serialized when JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    Text(String),
    Json(serde_json::Value),
}

impl SseData {
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(SseData::Json)
    }

    fn render(&self) -> String {
        match self {
            SseData::Text(text) => text.clone(),
            SseData::Json(value) => value.to_string(),
        }
    }
}

impl From<&str> for SseData {
    fn from(text: &str) -> Self {
        SseData::Text(text.to_string())
    }
}

impl From<String> for SseData {
    fn from(text: String) -> Self {
        SseData::Text(text)
    }
}

impl From<serde_json::Value> for SseData {
    fn from(value: serde_json::Value) -> Self {
        SseData::Json(value)
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub retry: Option<u64>,
    pub data: SseData,
}

impl SseEvent {
    pub fn new(data: impl Into<SseData>) -> Self {
        Self {
            id: None,
            event: None,
            retry: None,
            data: data.into(),
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Reconnection delay in milliseconds. Zero is not sent.
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = Some(millis);
        self
    }

    /// Wire form of the event, including the terminating blank line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            out.push_str("id: ");
            out.push_str(&strip_breaks(id));
            out.push('\n');
        }
        if let Some(event) = self.event.as_deref().filter(|e| !e.is_empty()) {
            out.push_str("event: ");
            out.push_str(&strip_breaks(event));
            out.push('\n');
        }
        if let Some(retry) = self.retry.filter(|r| *r > 0) {
            out.push_str(&format!("retry: {}\n", retry));
        }
        for line in self.data.render().split('\n') {
            out.push_str("data: ");
            out.push_str(&strip_breaks(line));
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

fn strip_breaks(s: &str) -> String {
    s.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Event stream writer bound to a sink.
///
/// Opening the writer sends the stream headers and commits the response,
/// so an error recorded afterwards can no longer replace it.
pub struct SseWriter {
    sink: Arc<dyn ResponseSink>,
}

impl SseWriter {
    pub fn open(sink: Arc<dyn ResponseSink>) -> Result<Self, SinkError> {
        sink.set_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        sink.set_header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        sink.set_header(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        sink.set_header(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        sink.set_header(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        );
        sink.write_header(StatusCode::OK);
        sink.start_stream()?;
        Ok(Self { sink })
    }

    /// Write one event and flush it.
    pub fn send(&self, event: &SseEvent) -> Result<(), SinkError> {
        self.sink.write(event.encode().as_bytes())?;
        self.sink.flush()
    }

    pub fn send_data(&self, data: impl Into<SseData>) -> Result<(), SinkError> {
        self.send(&SseEvent::new(data))
    }

    pub fn send_event(&self, event: &str, data: impl Into<SseData>) -> Result<(), SinkError> {
        self.send(&SseEvent::new(data).event(event))
    }

    /// Comment line that keeps idle proxies from closing the stream.
    pub fn keep_alive(&self) -> Result<(), SinkError> {
        self.sink.write(b": keepalive\n\n")?;
        self.sink.flush()
    }
}
