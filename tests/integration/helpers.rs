//! Test helpers and utilities

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use http_body_util::BodyExt;
use litekit::config::RequestTimeout;
use litekit::{dispatch, App, Config, Server, ShutdownHandle};

/// Config with access logging off and the given request deadline.
pub fn test_config(request_timeout: Option<Duration>) -> Config {
    let mut config = Config::default();
    config.middleware.access_log = false;
    config.server.request_timeout = RequestTimeout(request_timeout);
    config
}

/// Collected response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is not JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// In-process client around a finished application.
#[derive(Clone)]
pub struct TestApp {
    app: Arc<App>,
}

#[allow(dead_code)]
impl TestApp {
    pub fn new(app: App) -> Self {
        Self { app: Arc::new(app) }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Method::GET, path, &[], Bytes::new()).await
    }

    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.request(Method::GET, path, headers, Bytes::new()).await
    }

    pub async fn post_json(&self, path: &str, json: &serde_json::Value) -> TestResponse {
        let body = Bytes::from(serde_json::to_vec(json).expect("serialize body"));
        self.request(
            Method::POST,
            path,
            &[("content-type", "application/json")],
            body,
        )
        .await
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> TestResponse {
        let mut builder = http::Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(body).expect("valid request");
        let remote = SocketAddr::from(([127, 0, 0, 1], 40000));

        let response = dispatch(Arc::clone(&self.app), request, Some(remote)).await;
        let (parts, body) = response.into_parts();
        let body = tokio::time::timeout(Duration::from_secs(5), body.collect())
            .await
            .expect("response body did not finish")
            .expect("collect body")
            .to_bytes();

        TestResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }
}

/// Start a real server on an ephemeral port.
pub async fn spawn_server(app: App) -> (String, ShutdownHandle) {
    let server = Server::bind(app, SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("bind test server");
    let addr = server.local_addr().expect("local addr");
    let handle = server.shutdown_handle();
    tokio::spawn(server.run());
    (format!("http://{}", addr), handle)
}

/// Assert that the body is the JSON error envelope with `status`.
pub fn assert_error_envelope(resp: &TestResponse, status: StatusCode) {
    assert_eq!(resp.status, status);
    let json = resp.json();
    assert_eq!(json["status"], status.as_u16());
    assert!(json["msg"].is_string());
    assert!(json["logid"].is_string());
}
