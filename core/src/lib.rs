//! Blocking client for CouchDB-style document stores.
//!
//! # Overview
//! `Client` talks to one server: database administration, server metadata
//! and membership checks. `Client::get_db` hands out `Database` handles for
//! document CRUD, bulk writes and reads, Mango queries and index
//! management. `Document` is an optional mutable view over one document
//! that can load and store itself through a bound `Database`.
//!
//! # Design
//! - Operations build `HttpRequest` values and interpret `HttpResponse`
//!   values; only the `Transport` does I/O, so status mapping is testable
//!   against a scripted transport.
//! - `HttpTransport` shares one connection behind a lock by default and
//!   reconnects on a dropped connection according to `RetryPolicy`.
//! - Failures are typed: local `Validation` errors never reach the network,
//!   server answers map to `Server`/`Database` errors, and transport
//!   failures to `Connectivity`.

pub mod client;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod http;
pub mod json;
pub mod query;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{validate_db_name, Client, DbUpdatesOptions, Server};
pub use config::{ClientConfig, ConnectionInfo, RetryPolicy};
pub use database::{
    BulkDocResult, BulkGetDoc, BulkGetResult, Database, DocIds, DocInfo, DocRow, DocSpec, FindResult, GetOptions,
};
pub use document::Document;
pub use error::{CouchError, Result};
pub use http::{Body, HttpMethod, HttpRequest, HttpResponse};
pub use query::{FindQuery, IndexQuery, SortOrder};
pub use transport::{HttpTransport, Transport};
