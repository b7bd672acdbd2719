//! Error taxonomy for the document-store client.
//!
//! # Design
//! Local precondition failures (`Validation`) never reach the network.
//! Server-reported failures are split by scope: `Server` for database-level
//! administration (create, delete, lookup) and `Database` for document
//! operations. Both carry the raw status and a reason drawn from a fixed
//! status table unless the operation supplies a more specific one.
//! `Connectivity` is reserved for transport failures that survived the
//! retry budget.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CouchError>;

/// Errors returned by `Client`, `Database` and `Document` operations.
#[derive(Debug, Error)]
pub enum CouchError {
    /// A local precondition failed; no request was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The connection could not be established or broke beyond the retry budget.
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// A server-level operation was rejected.
    #[error("server error {status}: {reason}")]
    Server { status: u16, reason: String },

    /// A document or database operation was rejected.
    #[error("database error {status}: {reason}")]
    Database { status: u16, reason: String },

    /// A `Document` convenience operation could not run (e.g. not bound).
    #[error("document error: {0}")]
    Document(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// The response body could not be deserialized.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),
}

impl CouchError {
    /// Server-level error with the reason taken from the status table.
    pub fn server(status: u16) -> Self {
        CouchError::Server {
            status,
            reason: server_reason(status).to_string(),
        }
    }

    /// Document-level error with the reason taken from the status table.
    pub fn database(status: u16) -> Self {
        CouchError::Database {
            status,
            reason: database_reason(status).to_string(),
        }
    }

    /// Document-level error with an operation-specific reason.
    pub fn database_with(status: u16, reason: &str) -> Self {
        CouchError::Database {
            status,
            reason: reason.to_string(),
        }
    }

    /// HTTP status carried by server-reported errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            CouchError::Server { status, .. } | CouchError::Database { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server rejected a write because the revision was stale.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CouchError::Database { status: 409, .. })
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Reason table for server-level operations.
pub fn server_reason(status: u16) -> &'static str {
    match status {
        400 => "Invalid database name",
        401 => "Server administrator privileges required",
        404 => "Requested database not found",
        412 => "Database already exists",
        _ => "Unknown error",
    }
}

/// Reason table for document-level operations.
pub fn database_reason(status: u16) -> &'static str {
    match status {
        400 => "Invalid request body or parameters",
        401 => "Read/Write privileges required",
        404 => "Requested database or document not found",
        409 => "A conflicting document with the same ID already exists",
        412 => "Database already exists",
        415 => "Bad Content-Type value",
        417 => "At least one document was rejected by a validation function",
        500 => "Query execution error",
        _ => "Unknown error",
    }
}
