//! The sink that owns the real connection.

use std::sync::Mutex;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Response, StatusCode};
use http_body_util::StreamBody;
use hyper::upgrade::OnUpgrade;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::body::{stream_channel, ChunkFrameStream, ResponseBody, StreamChunk, DEFAULT_BODY_BUFFER};
use super::{lock, ResponseSink, SinkError};

/// Status line and headers of a response, sent once.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

struct WireState {
    headers: HeaderMap,
    status: Option<StatusCode>,
    head_tx: Option<oneshot::Sender<ResponseHead>>,
    body_tx: Option<mpsc::Sender<StreamChunk>>,
    upgrade: Option<OnUpgrade>,
}

impl WireState {
    /// Send the head if it has not gone out yet.
    fn send_head(&mut self, status: StatusCode) {
        let Some(tx) = self.head_tx.take() else {
            return;
        };
        self.status = Some(status);
        let head = ResponseHead {
            status,
            headers: std::mem::take(&mut self.headers),
        };
        if tx.send(head).is_err() {
            debug!("response head dropped, client gone");
            self.body_tx = None;
        }
    }
}

/// Writes a response to hyper: the head through a oneshot and the body
/// as a stream of chunks.
///
/// The body channel is bounded. A write that finds it full fails with
/// [`SinkError::Full`] and the chunk is dropped, so a stalled client holds
/// at most `buffer_size` chunks.
///
/// Created together with a [`PendingResponse`] that the connection task
/// turns into a `hyper` response.
pub struct ConnectionSink {
    state: Mutex<WireState>,
}

impl ConnectionSink {
    pub fn new() -> (Self, PendingResponse) {
        Self::with_upgrade(None, DEFAULT_BODY_BUFFER)
    }

    pub fn with_upgrade(upgrade: Option<OnUpgrade>, buffer_size: usize) -> (Self, PendingResponse) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = stream_channel(buffer_size);
        let sink = Self {
            state: Mutex::new(WireState {
                headers: HeaderMap::new(),
                status: None,
                head_tx: Some(head_tx),
                body_tx: Some(body_tx),
                upgrade,
            }),
        };
        (
            sink,
            PendingResponse {
                head: head_rx,
                body: body_rx,
            },
        )
    }

    /// End the response: send `200 OK` if nothing was written, then close
    /// the body. Later writes fail with [`SinkError::Closed`].
    pub fn finish(&self) {
        let mut state = lock(&self.state);
        state.send_head(StatusCode::OK);
        state.body_tx = None;
    }

    /// End the response with `status` unless a head already went out.
    pub fn abort(&self, status: StatusCode) {
        let mut state = lock(&self.state);
        if state.head_tx.is_some() {
            state.headers.clear();
        }
        state.send_head(status);
        state.body_tx = None;
    }

    pub fn is_head_sent(&self) -> bool {
        lock(&self.state).head_tx.is_none()
    }
}

impl ResponseSink for ConnectionSink {
    fn set_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = lock(&self.state);
        if state.head_tx.is_some() {
            state.headers.insert(name, value);
        }
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        let mut state = lock(&self.state);
        if state.head_tx.is_some() {
            state.headers.append(name, value);
        }
    }

    fn write_header(&self, status: StatusCode) {
        lock(&self.state).send_head(status);
    }

    fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        let mut state = lock(&self.state);
        state.send_head(StatusCode::OK);
        if data.is_empty() {
            return Ok(0);
        }
        let tx = state.body_tx.as_ref().ok_or(SinkError::Closed)?;
        match tx.try_send(StreamChunk::from(data)) {
            Ok(()) => Ok(data.len()),
            Err(TrySendError::Full(_)) => Err(SinkError::Full),
            Err(TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    fn flush(&self) -> Result<(), SinkError> {
        // Chunks are handed to hyper as soon as they are written.
        Ok(())
    }

    fn start_stream(&self) -> Result<(), SinkError> {
        lock(&self.state).send_head(StatusCode::OK);
        Ok(())
    }

    fn status(&self) -> Option<StatusCode> {
        lock(&self.state).status
    }

    fn take_upgrade(&self) -> Result<OnUpgrade, SinkError> {
        lock(&self.state)
            .upgrade
            .take()
            .ok_or(SinkError::Unsupported("connection upgrade"))
    }
}

/// Receiving half of a [`ConnectionSink`].
pub struct PendingResponse {
    head: oneshot::Receiver<ResponseHead>,
    body: mpsc::Receiver<StreamChunk>,
}

impl PendingResponse {
    /// Wait for the head and build a streaming response around the body.
    ///
    /// A sink dropped without a head becomes `500 Internal Server Error`.
    pub async fn into_response(self) -> Response<ResponseBody> {
        let head = self.head.await.unwrap_or_else(|_| ResponseHead {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: HeaderMap::new(),
        });

        let mut response = Response::new(StreamBody::new(ChunkFrameStream::new(self.body)));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}
