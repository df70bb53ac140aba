//! Per-connection HTTP serving and per-request dispatch.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, ALLOW, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::sync::watch;
use tracing::debug;

use super::app::App;
use super::routing::RouteMatch;
use crate::core::{generate_log_id, AppError, Envelope, Request, RequestContext};
use crate::listener::Connection;
use crate::middleware::{self, BoxService, Service};
use crate::sink::{ConnectionSink, ResponseBody, ResponseSink};

/// Check if an error is a common connection error that shouldn't be logged.
#[inline]
fn is_connection_error(err_str: &str) -> bool {
    err_str.contains("connection reset")
        || err_str.contains("broken pipe")
        || err_str.contains("Connection reset")
        || err_str.contains("os error 104")
        || err_str.contains("os error 32")
        || err_str.contains("timed out")
        || err_str.contains("deadline has elapsed")
        || err_str.contains("HeaderTimeout")
}

/// Decrements the active connection counter when the connection task ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Serve HTTP/1.1 or HTTP/2 on one accepted connection until it closes.
///
/// When `shutdown_rx` flips to `true` the connection stops taking new
/// requests and finishes the ones in flight.
pub(crate) async fn serve_connection<C: Connection>(
    app: Arc<App>,
    conn: C,
    active_connections: Arc<AtomicUsize>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let _active = ActiveGuard::new(active_connections);
    let remote_addr = conn.remote_addr();
    let header_read_timeout = app.config().server.header_read_timeout;

    let service = service_fn(move |req| {
        let app = Arc::clone(&app);
        async move { Ok::<_, Infallible>(handle_request(app, req, remote_addr).await) }
    });

    let builder = {
        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(Some(header_read_timeout))
            .keep_alive(true)
            .http2()
            .max_concurrent_streams(250);
        builder
    };

    let connection = builder.serve_connection_with_upgrades(TokioIo::new(conn), service);
    tokio::pin!(connection);

    let mut draining = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(err) = result {
                    let err_str = format!("{:?}", err);
                    if !is_connection_error(&err_str) {
                        debug!("Connection error: {:?}", err);
                    }
                }
                break;
            }
            changed = shutdown_rx.changed(), if !draining => {
                draining = true;
                if changed.is_ok() && *shutdown_rx.borrow() {
                    debug!(remote_addr = ?remote_addr, "draining connection");
                    connection.as_mut().graceful_shutdown();
                }
            }
        }
    }
}

/// Read the body under the size limit, then dispatch.
async fn handle_request(
    app: Arc<App>,
    req: http::Request<Incoming>,
    remote_addr: Option<SocketAddr>,
) -> Response<ResponseBody> {
    let limit = app.config().server.max_body_size;
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            debug!(limit, path = %parts.uri.path(), "request body over limit");
            return reject(StatusCode::PAYLOAD_TOO_LARGE, "request body too large").await;
        }
        Err(err) => {
            debug!(error = %err, "failed to read request body");
            return reject(StatusCode::BAD_REQUEST, "failed to read request body").await;
        }
    };

    dispatch(app, http::Request::from_parts(parts, body), remote_addr).await
}

/// Answer without running the pipeline.
async fn reject(status: StatusCode, message: &str) -> Response<ResponseBody> {
    let (sink, pending) = ConnectionSink::new();
    let logid = generate_log_id();
    let body = serde_json::to_vec(&Envelope::error(status.as_u16(), message, &logid))
        .unwrap_or_default();

    sink.set_header(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    if let Ok(value) = HeaderValue::from_str(&logid) {
        sink.set_header(HeaderName::from_static("x-request-id"), value);
    }
    sink.write_header(status);
    if let Err(e) = sink.write(&body) {
        debug!(error = %e, "rejection body write failed");
    }
    sink.finish();

    pending.into_response().await
}

/// Ends the response when the request task finishes or unwinds.
struct FinishGuard(Arc<ConnectionSink>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort(StatusCode::INTERNAL_SERVER_ERROR);
        } else {
            self.0.finish();
        }
    }
}

/// Run one request through the application and return the response.
///
/// The route's pipeline is composed for this request: global stages, then
/// the route group's stages, then the handler. Unknown paths and methods
/// run the global stages around an endpoint that only records the error,
/// so they are rendered and logged like any other failure.
///
/// The pipeline runs on its own task. The returned response resolves as
/// soon as a head is written; streamed bodies keep flowing after that.
pub async fn dispatch(
    app: Arc<App>,
    req: http::Request<Bytes>,
    remote_addr: Option<SocketAddr>,
) -> Response<ResponseBody> {
    let (mut parts, body) = req.into_parts();
    let upgrade = parts.extensions.remove::<OnUpgrade>();
    let (sink, pending) = ConnectionSink::with_upgrade(upgrade, app.config().server.body_buffer);
    let sink = Arc::new(sink);

    let mut request =
        Request::new(parts.method, parts.uri, parts.headers, body).with_version(parts.version);
    if let Some(addr) = remote_addr {
        request = request.with_remote_addr(addr);
    }

    let pipeline = match app.routes().resolve(request.method(), request.path()) {
        RouteMatch::Found { route, params } => {
            request.set_path_params(params);
            app.queue()
                .concat(route.queue())
                .apply(Arc::clone(route.service()))
        }
        RouteMatch::MethodNotAllowed(allowed) => {
            let allow = allowed
                .iter()
                .map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let mut err = AppError::method_not_allowed("method not allowed");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                err = err.with_header(ALLOW, value);
            }
            app.queue().apply(error_endpoint(err))
        }
        RouteMatch::NotFound => app.queue().apply(error_endpoint(AppError::not_found("not found"))),
    };

    let ctx = Arc::new(RequestContext::new(
        request,
        Arc::clone(&sink) as Arc<dyn ResponseSink>,
        Arc::clone(app.crash_reporter()),
    ));

    let guard = FinishGuard(sink);
    tokio::spawn(async move {
        let _guard = guard;
        pipeline.call(ctx).await;
    });

    pending.into_response().await
}

fn error_endpoint(err: AppError) -> BoxService {
    Arc::new(middleware::service_fn(move |ctx: Arc<RequestContext>| {
        let err = err.clone();
        async move { ctx.set_error(err) }
    }))
}
