//! Deadline guard in front of a response sink.

use std::sync::{Arc, Mutex};

use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use hyper::upgrade::OnUpgrade;

use super::{lock, ResponseSink, SinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Open,
    HeaderSent,
    TimedOut,
}

/// Rejects all output once the request deadline has passed.
///
/// The state lock is held while a call is forwarded, so a write that has
/// started finishes before [`mark_timed_out`](Self::mark_timed_out) returns
/// and nothing forwarded afterwards reaches the inner sink.
pub struct GuardedSink {
    inner: Arc<dyn ResponseSink>,
    state: Mutex<GuardState>,
}

impl GuardedSink {
    pub fn new(inner: Arc<dyn ResponseSink>) -> Self {
        Self {
            inner,
            state: Mutex::new(GuardState::Open),
        }
    }

    /// Move to the terminal timed-out state. Returns false if it already was.
    pub fn mark_timed_out(&self) -> bool {
        let mut state = lock(&self.state);
        let changed = *state != GuardState::TimedOut;
        *state = GuardState::TimedOut;
        changed
    }

    pub fn is_timed_out(&self) -> bool {
        *lock(&self.state) == GuardState::TimedOut
    }
}

impl ResponseSink for GuardedSink {
    fn set_header(&self, name: HeaderName, value: HeaderValue) {
        let state = lock(&self.state);
        if *state != GuardState::TimedOut {
            self.inner.set_header(name, value);
        }
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        let state = lock(&self.state);
        if *state != GuardState::TimedOut {
            self.inner.append_header(name, value);
        }
    }

    fn write_header(&self, status: StatusCode) {
        let mut state = lock(&self.state);
        if *state == GuardState::Open {
            self.inner.write_header(status);
            *state = GuardState::HeaderSent;
        }
    }

    fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let mut state = lock(&self.state);
        match *state {
            GuardState::TimedOut => Err(SinkError::TimedOut),
            GuardState::Open => {
                self.inner.write_header(StatusCode::OK);
                *state = GuardState::HeaderSent;
                self.inner.write(data)
            }
            GuardState::HeaderSent => self.inner.write(data),
        }
    }

    fn flush(&self) -> Result<(), SinkError> {
        let state = lock(&self.state);
        if *state == GuardState::TimedOut {
            return Ok(());
        }
        self.inner.flush()
    }

    fn start_stream(&self) -> Result<(), SinkError> {
        let state = lock(&self.state);
        if *state == GuardState::TimedOut {
            return Err(SinkError::TimedOut);
        }
        self.inner.start_stream()
    }

    fn status(&self) -> Option<StatusCode> {
        self.inner.status()
    }

    fn take_upgrade(&self) -> Result<OnUpgrade, SinkError> {
        let state = lock(&self.state);
        if *state == GuardState::TimedOut {
            return Err(SinkError::TimedOut);
        }
        self.inner.take_upgrade()
    }
}
