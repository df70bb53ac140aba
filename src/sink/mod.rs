//! Response sinks: every byte a request produces goes through one of these.
//!
//! A request starts with a [`ConnectionSink`] that talks to hyper. Stages
//! then wrap it, and each wrapper intercepts the output boundary so a later
//! decision can still override earlier writes:
//!
//! ```text
//! handler ─► GuardedSink ─► CaptureSink ─► DeferredSink ─► ConnectionSink ─► wire
//!            (deadline)     (access log)   (error stage)
//! ```
//!
//! Only the innermost [`ConnectionSink`] ever produces bytes on the wire.

mod body;
mod capture;
mod connection;
mod deferred;
mod guarded;
mod memory;
pub mod sse;

pub use body::{stream_channel, ChunkFrameStream, ResponseBody, StreamChunk, DEFAULT_BODY_BUFFER};
pub use capture::CaptureSink;
pub use connection::{ConnectionSink, PendingResponse, ResponseHead};
pub use deferred::DeferredSink;
pub use guarded::GuardedSink;
pub use memory::MemorySink;
pub use sse::{SseData, SseEvent, SseWriter};

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use hyper::upgrade::OnUpgrade;

/// Errors returned by sink writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The request deadline passed; the response now belongs to the error path.
    TimedOut,
    /// The client went away or the response was already finished.
    Closed,
    /// The client is not reading fast enough; the chunk was not queued.
    Full,
    /// The sink cannot perform the operation.
    Unsupported(&'static str),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::TimedOut => write!(f, "handler timeout: response already replaced"),
            SinkError::Closed => write!(f, "response closed"),
            SinkError::Full => write!(f, "response buffer full"),
            SinkError::Unsupported(op) => write!(f, "operation not supported: {}", op),
        }
    }
}

impl std::error::Error for SinkError {}

/// Response-writing contract shared by every sink.
///
/// All methods take `&self`: a sink is written from the handler worker and,
/// concurrently, from the deadline side of the timeout supervisor.
pub trait ResponseSink: Send + Sync {
    /// Replace a response header. Ignored once the head is on the wire.
    fn set_header(&self, name: HeaderName, value: HeaderValue);

    /// Add a response header value, keeping existing ones.
    fn append_header(&self, name: HeaderName, value: HeaderValue);

    /// Set the response status. The first call wins.
    fn write_header(&self, status: StatusCode);

    /// Write body bytes. Writing before [`write_header`](Self::write_header)
    /// commits `200 OK` first.
    fn write(&self, data: &[u8]) -> Result<usize, SinkError>;

    fn flush(&self) -> Result<(), SinkError>;

    /// Switch to streaming: headers and status go out now and later writes
    /// reach the client as they happen.
    fn start_stream(&self) -> Result<(), SinkError> {
        self.flush()
    }

    /// Status recorded so far, if any.
    fn status(&self) -> Option<StatusCode>;

    /// Hand over the connection upgrade (e.g. for a 101 response).
    fn take_upgrade(&self) -> Result<OnUpgrade, SinkError>;
}

/// Lock a mutex, recovering the data if a panicking handler poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
