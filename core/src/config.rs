//! Client configuration and the connection descriptor derived from it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ureq::http::Uri;

use crate::error::{CouchError, Result};
use crate::http::HttpMethod;

const DEFAULT_PORT: u16 = 5984;
const DEFAULT_TLS_PORT: u16 = 6984;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_url")]
    pub url: String,

    /// Per-request timeout in seconds; 0 disables the timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// `None` shares one connection guarded by a lock; `Some(n)` keeps up
    /// to `n` idle connections and lets requests run in parallel.
    #[serde(default)]
    pub pool_size: Option<usize>,
}

fn default_url() -> String {
    "http://localhost:5984".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout_secs(),
            retry: RetryPolicy::default(),
            pool_size: None,
        }
    }
}

impl ClientConfig {
    pub fn from_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CouchError::Validation(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&contents).map_err(|e| CouchError::DeserializationError(e.to_string()))
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size.max(1));
        self
    }
}

/// How a broken connection is handled: the transport reopens it and resends
/// the request up to `max_retries` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Also resend POST requests, which may duplicate a write the server
    /// already applied before the connection dropped.
    #[serde(default)]
    pub retry_non_idempotent: bool,
}

fn default_max_retries() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_non_idempotent: false,
        }
    }
}

impl RetryPolicy {
    pub fn never() -> Self {
        Self {
            max_retries: 0,
            retry_non_idempotent: false,
        }
    }

    pub fn always(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_non_idempotent: true,
        }
    }

    pub fn allows(&self, method: HttpMethod) -> bool {
        self.max_retries > 0 && (method.is_idempotent() || self.retry_non_idempotent)
    }
}

/// Where and as whom to connect. Built once from the configured URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

impl ConnectionInfo {
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| CouchError::Validation(format!("invalid server url {url:?}: {e}")))?;

        let scheme = match uri.scheme_str() {
            None | Some("http") => "http",
            Some("https") => "https",
            Some(other) => {
                return Err(CouchError::Validation(format!("unsupported scheme {other:?}")));
            }
        };

        let (user, password) = match uri.authority().and_then(|a| a.as_str().rsplit_once('@')) {
            Some((userinfo, _)) => match userinfo.split_once(':') {
                Some((user, password)) => (Some(user.to_string()), Some(password.to_string())),
                None => (Some(userinfo.to_string()), None),
            },
            None => (None, None),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host: uri.host().unwrap_or("localhost").to_string(),
            port: uri.port_u16().unwrap_or(match scheme {
                "https" => DEFAULT_TLS_PORT,
                _ => DEFAULT_PORT,
            }),
            user,
            password,
        })
    }

    /// `scheme://host:port`, without credentials.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user, password)),
            _ => None,
        }
    }
}
