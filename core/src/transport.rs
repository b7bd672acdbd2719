//! Blocking HTTP transport.
//!
//! # Design
//! `Transport` is the single seam between the protocol logic and the
//! network: it takes an `HttpRequest` and returns an `HttpResponse`,
//! whatever the status code. `HttpTransport` is the production
//! implementation on top of a `ureq::Agent`.
//!
//! By default every request goes through one connection guarded by a
//! mutex, so concurrent callers queue instead of interleaving on the same
//! socket. With `pool_size` set, requests run in parallel over a pool of
//! idle connections instead.
//!
//! When a connection drops mid-request the transport reopens it and resends
//! the request, as allowed by the configured `RetryPolicy`. Every other
//! failure (refused connection, DNS, timeout) is returned immediately as
//! `CouchError::Connectivity`.

use std::fmt;
use std::io::ErrorKind;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use tracing::{debug, warn};
use ureq::typestate::WithBody;
use ureq::{Agent, RequestBuilder};

use crate::config::{ClientConfig, ConnectionInfo, RetryPolicy};
use crate::error::{CouchError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

const MAX_BODY_BYTES: u64 = 1 << 30;

/// Executes one HTTP round trip.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Send `request` and return the response for any status code.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

enum Connection {
    Exclusive(Mutex<Agent>),
    Pooled(Agent),
}

/// `Transport` backed by `ureq`.
pub struct HttpTransport {
    info: ConnectionInfo,
    config: ClientConfig,
    authorization: Option<String>,
    connection: Connection,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("info", &self.info)
            .field("timeout_secs", &self.config.timeout_secs)
            .field("retry", &self.config.retry)
            .field("pool_size", &self.config.pool_size)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let info = ConnectionInfo::parse(&config.url)?;
        let authorization = info
            .credentials()
            .map(|(user, password)| format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))));
        let agent = build_agent(&config);
        let connection = match config.pool_size {
            Some(_) => Connection::Pooled(agent),
            None => Connection::Exclusive(Mutex::new(agent)),
        };
        Ok(Self {
            info,
            config,
            authorization,
            connection,
        })
    }

    /// Defaults first, caller overrides applied on top. The credential
    /// header is always attached and cannot be replaced by the caller.
    fn request_headers(&self, caller: &[(String, String)]) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        for (key, value) in caller {
            if key.eq_ignore_ascii_case("authorization") {
                continue;
            }
            match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
                Some(slot) => slot.1 = value.clone(),
                None => headers.push((key.clone(), value.clone())),
            }
        }
        if let Some(auth) = &self.authorization {
            headers.push(("Authorization".to_string(), auth.clone()));
        }
        headers
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        let target = request.target();
        let url = format!("{}{}", self.info.base_url(), target);
        let headers = self.request_headers(&request.headers);
        let body = request.body.map(|b| b.into_bytes()).transpose()?;
        let policy = self.config.retry;

        let response = match &self.connection {
            Connection::Exclusive(agent) => {
                let mut agent = agent.lock();
                send_with_retry(policy, method, |retries| {
                    if retries > 0 {
                        *agent = build_agent(&self.config);
                    }
                    send_once(&agent, method, &url, &headers, body.as_deref())
                })
            }
            Connection::Pooled(agent) => send_with_retry(policy, method, |_| {
                send_once(agent, method, &url, &headers, body.as_deref())
            }),
        }?;

        debug!(method = method.as_str(), target = %target, status = response.status, "request completed");
        Ok(response)
    }
}

fn build_agent(config: &ClientConfig) -> Agent {
    let idle = config.pool_size.unwrap_or(1);
    Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(config.timeout())
        .max_idle_connections(idle)
        .max_idle_connections_per_host(idle)
        .build()
        .new_agent()
}

// ---------------------------------------------------------------------------
// Round trip and retry
// ---------------------------------------------------------------------------

/// Outcome of a failed attempt.
#[derive(Debug)]
enum Failure {
    /// The connection closed under us; reopening may help.
    Broken(String),
    Fatal(CouchError),
}

fn is_broken(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
    )
}

fn classify(err: ureq::Error) -> Failure {
    match err {
        ureq::Error::Io(e) if is_broken(e.kind()) => Failure::Broken(e.to_string()),
        other => Failure::Fatal(CouchError::Connectivity(other.to_string())),
    }
}

fn send_with_retry<F>(policy: RetryPolicy, method: HttpMethod, mut attempt: F) -> Result<HttpResponse>
where
    F: FnMut(u32) -> std::result::Result<HttpResponse, Failure>,
{
    let mut retries = 0;
    loop {
        match attempt(retries) {
            Ok(response) => return Ok(response),
            Err(Failure::Fatal(err)) => return Err(err),
            Err(Failure::Broken(reason)) => {
                if !policy.allows(method) || retries >= policy.max_retries {
                    return Err(CouchError::Connectivity(format!("connection lost: {reason}")));
                }
                retries += 1;
                warn!(method = method.as_str(), retries, %reason, "connection lost, reconnecting");
            }
        }
    }
}

fn send_once(
    agent: &Agent,
    method: HttpMethod,
    url: &str,
    headers: &[(String, String)],
    body: Option<&[u8]>,
) -> std::result::Result<HttpResponse, Failure> {
    let result = match method {
        HttpMethod::Get => with_headers(agent.get(url), headers).call(),
        HttpMethod::Head => with_headers(agent.head(url), headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(url), headers).call(),
        HttpMethod::Post => send_body(with_headers(agent.post(url), headers), body),
        HttpMethod::Put => send_body(with_headers(agent.put(url), headers), body),
    };
    let mut response = result.map_err(classify)?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let body = if method == HttpMethod::Head {
        Vec::new()
    } else {
        response
            .body_mut()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(classify)?
    };

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

fn send_body(
    builder: RequestBuilder<WithBody>,
    body: Option<&[u8]>,
) -> std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Some(bytes) => builder.send(bytes),
        None => builder.send_empty(),
    }
}
