//! Inbound request as seen by stages and handlers.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::{LazyLock, OnceLock};

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{HeaderMap, Method, Uri};
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;

use super::AppError;

static X_REQUEST_ID: LazyLock<HeaderName> =
    LazyLock::new(|| HeaderName::from_static("x-request-id"));
static X_FORWARDED_FOR: LazyLock<HeaderName> =
    LazyLock::new(|| HeaderName::from_static("x-forwarded-for"));
static X_REAL_IP: LazyLock<HeaderName> = LazyLock::new(|| HeaderName::from_static("x-real-ip"));

/// HTTP request with a fully read body.
///
/// Not `Clone`: the request lives in the shared request context and is
/// borrowed from there.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    version: http::Version,
    remote_addr: Option<SocketAddr>,
    path_params: HashMap<String, String>,
    query: OnceLock<Vec<(String, String)>>,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            uri,
            headers,
            body,
            version: http::Version::HTTP_11,
            remote_addr: None,
            path_params: HashMap::new(),
            query: OnceLock::new(),
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn with_version(mut self, version: http::Version) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string.
    #[inline]
    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[inline]
    pub fn version(&self) -> http::Version {
        self.version
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Header value by name (case-insensitive). Non-UTF-8 values read as absent.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    #[inline]
    pub fn request_id(&self) -> Option<&str> {
        self.headers.get(&*X_REQUEST_ID).and_then(|v| v.to_str().ok())
    }

    /// True when the client asked for a server-sent event stream.
    pub fn accepts_event_stream(&self) -> bool {
        self.headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false)
    }

    /// Client address: first `X-Forwarded-For` entry, then `X-Real-IP`,
    /// then the peer address.
    pub fn client_ip(&self) -> Option<IpAddr> {
        let forwarded = self
            .headers
            .get(&*X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse().ok());
        let real = || {
            self.headers
                .get(&*X_REAL_IP)
                .and_then(|v| v.to_str().ok())
                .and_then(|ip| ip.trim().parse().ok())
        };
        forwarded
            .or_else(real)
            .or_else(|| self.remote_addr.map(|addr| addr.ip()))
    }

    fn query_pairs(&self) -> &[(String, String)] {
        self.query
            .get_or_init(|| self.uri.query().map(parse_urlencoded).unwrap_or_default())
    }

    /// First decoded value of a query parameter.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_pairs()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.query(key).unwrap_or(default)
    }

    /// Parse a query parameter; absent or unparsable values give `None`.
    pub fn query_parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.query(key).and_then(|v| v.parse().ok())
    }

    pub fn query_bool(&self, key: &str) -> bool {
        matches!(
            self.query(key).map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "yes" | "on")
        )
    }

    /// Value of a `{name}` segment of the matched route.
    pub fn path_param(&self, key: &str) -> Option<&str> {
        self.path_params.get(key).map(String::as_str)
    }

    pub fn path_param_parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.path_param(key).and_then(|v| v.parse().ok())
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AppError::bad_request("invalid JSON body").with_cause(e))
    }

    /// Decode an `application/x-www-form-urlencoded` body.
    pub fn form(&self) -> Result<HashMap<String, String>, AppError> {
        let body = std::str::from_utf8(&self.body)
            .map_err(|e| AppError::bad_request("invalid form body").with_cause(e))?;
        Ok(parse_urlencoded(body).into_iter().collect())
    }
}

impl<B> From<http::Request<B>> for Request
where
    B: Into<Bytes>,
{
    fn from(req: http::Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        Self::new(parts.method, parts.uri, parts.headers, body.into()).with_version(parts.version)
    }
}

/// Split `a=1&b=two+words` into decoded pairs.
fn parse_urlencoded(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(s: &str) -> String {
    let spaced = s.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
