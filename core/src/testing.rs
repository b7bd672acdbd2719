//! Scripted transport for unit tests: replays canned responses in order and
//! records every request it receives.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{CouchError, Result};
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::Transport;

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn last(&self) -> HttpRequest {
        self.requests.lock().last().cloned().expect("no request was sent")
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| CouchError::Connectivity("script exhausted".into()))
    }
}

pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string())
}

pub fn empty_response(status: u16) -> HttpResponse {
    HttpResponse::new(status, "")
}

pub fn query_value<'a>(request: &'a HttpRequest, key: &str) -> Option<&'a str> {
    request
        .query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

pub fn body_json(request: &HttpRequest) -> Value {
    match &request.body {
        Some(crate::http::Body::Json(value)) => value.clone(),
        Some(crate::http::Body::Raw(bytes)) => serde_json::from_slice(bytes).expect("raw body is json"),
        None => panic!("request has no body"),
    }
}
