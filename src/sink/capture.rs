//! Pass-through sink that records what was written, for access logging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use hyper::upgrade::OnUpgrade;

use super::{lock, ResponseSink, SinkError};

/// Forwards everything and keeps the status, the byte count and,
/// optionally, a bounded copy of the body.
pub struct CaptureSink {
    inner: Arc<dyn ResponseSink>,
    status: Mutex<Option<StatusCode>>,
    bytes: AtomicU64,
    body: Option<Mutex<BytesMut>>,
    body_limit: usize,
}

impl CaptureSink {
    pub fn new(inner: Arc<dyn ResponseSink>) -> Self {
        Self {
            inner,
            status: Mutex::new(None),
            bytes: AtomicU64::new(0),
            body: None,
            body_limit: 0,
        }
    }

    /// Also keep up to `limit` bytes of the body.
    pub fn with_body(inner: Arc<dyn ResponseSink>, limit: usize) -> Self {
        Self {
            body: Some(Mutex::new(BytesMut::new())),
            body_limit: limit,
            ..Self::new(inner)
        }
    }

    pub fn captured_status(&self) -> Option<StatusCode> {
        *lock(&self.status)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn captured_body(&self) -> Option<Bytes> {
        self.body
            .as_ref()
            .map(|body| Bytes::copy_from_slice(&lock(body)))
    }

    fn record_status(&self, status: StatusCode) {
        let mut current = lock(&self.status);
        if current.is_none() {
            *current = Some(status);
        }
    }
}

impl ResponseSink for CaptureSink {
    fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.set_header(name, value);
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.append_header(name, value);
    }

    fn write_header(&self, status: StatusCode) {
        self.record_status(status);
        self.inner.write_header(status);
    }

    fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        self.record_status(StatusCode::OK);
        let written = self.inner.write(data)?;
        self.bytes.fetch_add(written as u64, Ordering::Relaxed);

        if let Some(body) = &self.body {
            let mut body = lock(body);
            let room = self.body_limit.saturating_sub(body.len());
            body.extend_from_slice(&data[..written.min(room)]);
        }
        Ok(written)
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.inner.flush()
    }

    fn start_stream(&self) -> Result<(), SinkError> {
        self.record_status(StatusCode::OK);
        self.inner.start_stream()
    }

    fn status(&self) -> Option<StatusCode> {
        self.inner.status()
    }

    fn take_upgrade(&self) -> Result<OnUpgrade, SinkError> {
        self.inner.take_upgrade()
    }
}
