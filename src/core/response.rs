//! Served payloads and the JSON envelope.

use bytes::Bytes;
use serde::Serialize;

/// Response body a handler hands over instead of writing bytes itself.
/// Written out by the finalize stage once the handler chain returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Bytes),
    Text(String),
    Html(String),
    Bytes(Bytes),
}

impl Payload {
    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Json(_) => "application/json; charset=utf-8",
            Payload::Text(_) => "text/plain; charset=utf-8",
            Payload::Html(_) => "text/html; charset=utf-8",
            Payload::Bytes(_) => "application/octet-stream",
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Json(bytes) | Payload::Bytes(bytes) => bytes,
            Payload::Text(text) | Payload::Html(text) => Bytes::from(text),
        }
    }
}

/// JSON envelope shared by REST data responses and error responses:
///
/// ```json
/// {"status":0,"msg":"OK","data":{...},"logid":"5f0c..."}
/// {"status":404,"msg":"user not found","logid":"5f0c..."}
/// ```
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize> {
    pub status: u16,
    pub msg: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub logid: &'a str,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    pub fn ok(data: T, logid: &'a str) -> Self {
        Self {
            status: 0,
            msg: "OK",
            data: Some(data),
            logid,
        }
    }
}

impl<'a> Envelope<'a, ()> {
    pub fn error(status: u16, msg: &'a str, logid: &'a str) -> Self {
        Self {
            status,
            msg,
            data: None,
            logid,
        }
    }
}
