//! HTTP request and response types.
//!
//! # Design
//! Requests and responses are plain data. `Database` and `Client` build
//! `HttpRequest` values and interpret `HttpResponse` values; only the
//! `Transport` touches the network. This keeps status mapping and URL
//! construction testable without a server.
//!
//! Paths are server-relative and percent-encoded segment by segment, so a
//! database name containing `/` stays a single segment. Headers and query
//! parameters are owned per request; nothing is shared between calls.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::json;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Methods whose repetition leaves the server in the same state.
    pub fn is_idempotent(self) -> bool {
        !matches!(self, HttpMethod::Post)
    }
}

/// Request payload: either pre-encoded bytes or a value serialized to JSON
/// by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Raw(Vec<u8>),
    Json(Value),
}

impl Body {
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Body::Raw(bytes) => Ok(bytes),
            Body::Json(value) => json::to_body(&value),
        }
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Encoded server-relative path without the leading slash.
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Caller-supplied headers; they override the transport defaults.
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn head(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Head, path)
    }

    /// Append a query parameter; the value is coerced to its string form.
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.body = Some(Body::Json(value));
        self
    }

    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.body = Some(Body::Raw(bytes));
        self
    }

    /// Request target: `/path` plus `?k=v&...` when parameters are present.
    pub fn target(&self) -> String {
        let mut target = format!("/{}", self.path);
        if !self.query.is_empty() {
            let pairs: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
                .collect();
            target.push('?');
            target.push_str(&pairs.join("&"));
        }
        target
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Snapshot of the response headers.
    pub fn get_headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    /// Parsed body; `{}` when the body is empty.
    pub fn get_data(&self) -> Result<Value> {
        json::from_body(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        json::from_body(&self.body)
    }
}

// ---------------------------------------------------------------------------
// Path encoding
// ---------------------------------------------------------------------------

/// RFC 3986 unreserved characters pass through; everything else is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

pub fn encode_component(input: &str) -> String {
    utf8_percent_encode(input, COMPONENT).to_string()
}

/// Encode a document id as a path segment. Design and local document ids
/// keep the slash after their prefix, as the server expects.
pub fn encode_doc_id(id: &str) -> String {
    for prefix in ["_design/", "_local/"] {
        if let Some(rest) = id.strip_prefix(prefix) {
            return format!("{prefix}{}", encode_component(rest));
        }
    }
    encode_component(id)
}

/// Join already-meaningful segments into an encoded path.
pub fn join_path(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| encode_component(s))
        .collect::<Vec<_>>()
        .join("/")
}
