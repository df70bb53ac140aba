//! In-memory sink.

use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use hyper::upgrade::OnUpgrade;

use super::{lock, ResponseSink, SinkError};

#[derive(Default)]
struct Recorded {
    headers: HeaderMap,
    status: Option<StatusCode>,
    status_calls: usize,
    body: BytesMut,
    flushes: usize,
    streaming: bool,
}

/// Records everything written to it. Used to inspect what a stage or
/// handler produced without a connection.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<Recorded>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> HeaderMap {
        lock(&self.state).headers.clone()
    }

    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&lock(&self.state).body)
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&lock(&self.state).body).into_owned()
    }

    /// Number of times a status was accepted (at most one).
    pub fn status_calls(&self) -> usize {
        lock(&self.state).status_calls
    }

    pub fn flushes(&self) -> usize {
        lock(&self.state).flushes
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }
}

impl ResponseSink for MemorySink {
    fn set_header(&self, name: HeaderName, value: HeaderValue) {
        lock(&self.state).headers.insert(name, value);
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        lock(&self.state).headers.append(name, value);
    }

    fn write_header(&self, status: StatusCode) {
        let mut state = lock(&self.state);
        if state.status.is_none() {
            state.status = Some(status);
            state.status_calls += 1;
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let mut state = lock(&self.state);
        if state.status.is_none() {
            state.status = Some(StatusCode::OK);
            state.status_calls += 1;
        }
        state.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&self) -> Result<(), SinkError> {
        lock(&self.state).flushes += 1;
        Ok(())
    }

    fn start_stream(&self) -> Result<(), SinkError> {
        let mut state = lock(&self.state);
        if state.status.is_none() {
            state.status = Some(StatusCode::OK);
            state.status_calls += 1;
        }
        state.streaming = true;
        Ok(())
    }

    fn status(&self) -> Option<StatusCode> {
        lock(&self.state).status
    }

    fn take_upgrade(&self) -> Result<OnUpgrade, SinkError> {
        Err(SinkError::Unsupported("connection upgrade"))
    }
}
