//! Buffering sink used by the error stage.

use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use hyper::upgrade::OnUpgrade;

use super::{lock, ResponseSink, SinkError};

#[derive(Default)]
struct Buffer {
    headers: HeaderMap,
    status: Option<StatusCode>,
    body: BytesMut,
    committed: bool,
}

/// Holds the whole response in memory until [`commit`](Self::commit).
///
/// Until then nothing reaches the inner sink, so the error stage can
/// [`reset`](Self::reset) a partial success response and write an error
/// instead. After commit every call passes straight through.
pub struct DeferredSink {
    inner: Arc<dyn ResponseSink>,
    state: Mutex<Buffer>,
}

impl DeferredSink {
    pub fn new(inner: Arc<dyn ResponseSink>) -> Self {
        Self {
            inner,
            state: Mutex::new(Buffer::default()),
        }
    }

    /// Send buffered headers, status and body to the inner sink. Only the
    /// first call does anything.
    pub fn commit(&self) -> Result<(), SinkError> {
        let mut state = lock(&self.state);
        Self::commit_locked(&self.inner, &mut state)
    }

    fn commit_locked(inner: &Arc<dyn ResponseSink>, state: &mut Buffer) -> Result<(), SinkError> {
        if state.committed {
            return Ok(());
        }
        state.committed = true;

        let headers = std::mem::take(&mut state.headers);
        let mut last_name = None;
        for (name, value) in headers {
            // HeaderMap yields the name only for the first of several values.
            match name {
                Some(name) => {
                    inner.set_header(name.clone(), value);
                    last_name = Some(name);
                }
                None => {
                    if let Some(name) = last_name.clone() {
                        inner.append_header(name, value);
                    }
                }
            }
        }

        inner.write_header(state.status.take().unwrap_or(StatusCode::OK));
        let body = std::mem::take(&mut state.body);
        if !body.is_empty() {
            inner.write(&body)?;
        }
        inner.flush()
    }

    /// Drop everything buffered and return to the initial state. Returns
    /// false, changing nothing, once committed.
    pub fn reset(&self) -> bool {
        let mut state = lock(&self.state);
        if state.committed {
            return false;
        }
        state.headers.clear();
        state.status = None;
        state.body.clear();
        true
    }

    pub fn is_committed(&self) -> bool {
        lock(&self.state).committed
    }

    pub fn buffered_len(&self) -> usize {
        lock(&self.state).body.len()
    }
}

impl ResponseSink for DeferredSink {
    fn set_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = lock(&self.state);
        if state.committed {
            self.inner.set_header(name, value);
        } else {
            state.headers.insert(name, value);
        }
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = lock(&self.state);
        if state.committed {
            self.inner.append_header(name, value);
        } else {
            state.headers.append(name, value);
        }
    }

    fn write_header(&self, status: StatusCode) {
        let mut state = lock(&self.state);
        if state.committed {
            self.inner.write_header(status);
        } else if state.status.is_none() {
            state.status = Some(status);
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let mut state = lock(&self.state);
        if state.committed {
            return self.inner.write(data);
        }
        if state.status.is_none() {
            state.status = Some(StatusCode::OK);
        }
        state.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let state = lock(&self.state);
        if state.committed {
            self.inner.flush()
        } else {
            Ok(())
        }
    }

    fn start_stream(&self) -> Result<(), SinkError> {
        let mut state = lock(&self.state);
        Self::commit_locked(&self.inner, &mut state)?;
        self.inner.start_stream()
    }

    fn status(&self) -> Option<StatusCode> {
        let state = lock(&self.state);
        if state.committed {
            self.inner.status()
        } else {
            state.status
        }
    }

    fn take_upgrade(&self) -> Result<OnUpgrade, SinkError> {
        self.commit()?;
        self.inner.take_upgrade()
    }
}
