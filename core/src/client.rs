//! Server-level entry point.
//!
//! # Design
//! `Client` owns the transport and hands out `Database` handles that share
//! it. Each operation builds one `HttpRequest`, sends it, and maps the
//! status code to a value or a `CouchError::Server`. Database names are
//! validated locally before `create` sends anything.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use serde_json::{json, Value};
use tracing::info;

use crate::config::ClientConfig;
use crate::database::Database;
use crate::error::{CouchError, Result};
use crate::http::{join_path, HttpRequest};
use crate::transport::{HttpTransport, Transport};

/// Handle to one document-store server.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
}

/// The server and the client are the same object; both names are in use.
pub type Server = Client;

/// Optional parameters for `Client::db_updates`.
#[derive(Debug, Clone, Default)]
pub struct DbUpdatesOptions {
    pub feed: Option<String>,
    pub timeout: Option<u64>,
    pub heartbeat: Option<u64>,
    pub since: Option<String>,
}

impl Client {
    /// Connect with default settings, e.g. `Client::new("http://admin:pw@localhost:5984")`.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(ClientConfig::from_url(url))
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Welcome document with the server version.
    pub fn server_info(&self) -> Result<Value> {
        self.transport.send(HttpRequest::get(""))?.get_data()
    }

    /// Handle to an existing database.
    pub fn get_db(&self, name: &str) -> Result<Database> {
        let response = self.transport.send(HttpRequest::head(join_path(&[name])))?;
        if response.status == 200 {
            Ok(Database::new(name, Arc::clone(&self.transport)))
        } else {
            Err(CouchError::server(response.status))
        }
    }

    pub fn db(&self, name: &str) -> Result<Database> {
        self.get_db(name)
    }

    /// Create a database. The name is lower-cased and validated first.
    pub fn create(&self, name: &str) -> Result<Value> {
        let name = validate_db_name(name)?;
        let response = self.transport.send(HttpRequest::put(join_path(&[&name])))?;
        match response.status {
            201 | 202 => {
                info!(db = %name, "database created");
                response.get_data()
            }
            status => Err(CouchError::server(status)),
        }
    }

    /// Delete a database with all its documents.
    pub fn delete(&self, name: &str) -> Result<Value> {
        let response = self.transport.send(HttpRequest::delete(join_path(&[name])))?;
        match response.status {
            200 | 202 => {
                info!(db = %name, "database deleted");
                response.get_data()
            }
            status => Err(CouchError::server(status)),
        }
    }

    /// Names of all databases; empty when the server refuses the listing.
    pub fn list_database_names(&self) -> Result<Vec<String>> {
        let response = self.transport.send(HttpRequest::get("_all_dbs"))?;
        if response.status == 200 {
            response.json()
        } else {
            Ok(Vec::new())
        }
    }

    pub fn dbs_info(&self, keys: &[&str]) -> Result<Vec<Value>> {
        let request = HttpRequest::post("_dbs_info").json(json!({ "keys": keys }));
        let response = self.transport.send(request)?;
        match response.status {
            200 => response.json(),
            status => Err(CouchError::server(status)),
        }
    }

    pub fn active_tasks(&self) -> Result<Value> {
        self.transport.send(HttpRequest::get("_active_tasks"))?.get_data()
    }

    /// Nodes known to this node and nodes that are part of the cluster.
    pub fn membership(&self) -> Result<Value> {
        self.get_ok("_membership")
    }

    /// Confirms the server is up and ready to respond.
    pub fn is_up(&self) -> Result<Value> {
        self.get_ok("_up")
    }

    pub fn db_updates(&self, options: &DbUpdatesOptions) -> Result<Value> {
        let mut request = HttpRequest::get("_db_updates");
        if let Some(feed) = &options.feed {
            request = request.query("feed", feed);
        }
        if let Some(timeout) = options.timeout {
            request = request.query("timeout", timeout);
        }
        if let Some(heartbeat) = options.heartbeat {
            request = request.query("heartbeat", heartbeat);
        }
        if let Some(since) = &options.since {
            request = request.query("since", since);
        }
        let response = self.transport.send(request)?;
        match response.status {
            200 => response.get_data(),
            status => Err(CouchError::server(status)),
        }
    }

    /// True when the database exists. Never fails: any error reads as absent.
    pub fn contains(&self, name: &str) -> bool {
        self.transport
            .send(HttpRequest::head(join_path(&[name])))
            .map(|response| response.status == 200)
            .unwrap_or(false)
    }

    fn get_ok(&self, path: &str) -> Result<Value> {
        let response = self.transport.send(HttpRequest::get(path))?;
        match response.status {
            200 => response.get_data(),
            status => Err(CouchError::server(status)),
        }
    }
}

static DB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_$()+/-]*$").expect("database name pattern compiles"));

/// Lower-case `name` and check it against the server's naming rule.
pub fn validate_db_name(name: &str) -> Result<String> {
    let name = name.to_lowercase();
    if DB_NAME.is_match(&name) {
        Ok(name)
    } else {
        Err(CouchError::Validation(format!("invalid database name {name:?}")))
    }
}
