//! Document and bulk operations against one database.
//!
//! # Design
//! `Database` is a name plus a shared transport; it caches nothing and
//! every call is one independent request (two for `update`, and for
//! `delete` without a revision).
//!
//! Writes follow the server's optimistic concurrency protocol: `update`
//! and `delete` always send the revision they are based on as the `rev`
//! query parameter, and a stale revision surfaces as a 409
//! `CouchError::Database` (see `CouchError::is_conflict`) rather than an
//! overwrite.
//!
//! Two outcomes are deliberately not errors: `get` on a missing document
//! returns `{}`, and bulk endpoints report per-document failures inside
//! their result lists.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::error::{CouchError, Result};
use crate::http::{encode_component, encode_doc_id, HttpRequest, HttpResponse};
use crate::json::as_object;
use crate::query::{FindQuery, IndexQuery};
use crate::transport::Transport;

const ACCEPT_MULTIPART: &str = "application/json, multipart/related, multipart/mixed, text/plain";

/// Minimal metadata from a HEAD request on a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocInfo {
    pub rev: String,
    pub size: Option<u64>,
    pub date: Option<String>,
}

/// Query flags for `Database::get`.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub attachments: bool,
    pub att_encoding_info: bool,
    pub atts_since: Vec<String>,
    pub conflicts: bool,
    pub deleted_conflicts: bool,
    pub latest: bool,
    pub local_seq: bool,
    pub meta: bool,
    pub rev: Option<String>,
    pub revs: bool,
    pub revs_info: bool,
}

impl GetOptions {
    pub fn rev(rev: &str) -> Self {
        Self {
            rev: Some(rev.to_string()),
            ..Default::default()
        }
    }

    fn apply(&self, mut request: HttpRequest) -> HttpRequest {
        if self.attachments {
            request = request.header("Accept", ACCEPT_MULTIPART).query("attachments", true);
        }
        let flags = [
            ("att_encoding_info", self.att_encoding_info),
            ("conflicts", self.conflicts),
            ("deleted_conflicts", self.deleted_conflicts),
            ("latest", self.latest),
            ("local_seq", self.local_seq),
            ("meta", self.meta),
            ("revs", self.revs),
            ("revs_info", self.revs_info),
        ];
        for (key, enabled) in flags {
            if enabled {
                request = request.query(key, true);
            }
        }
        if !self.atts_since.is_empty() {
            request = request.query("atts_since", json!(self.atts_since));
        }
        if let Some(rev) = &self.rev {
            request = request.query("rev", rev);
        }
        request
    }
}

/// Per-document outcome of `_bulk_docs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDocResult {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BulkDocResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-id outcome of `_bulk_get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkGetResult {
    pub id: String,
    #[serde(default)]
    pub docs: Vec<BulkGetDoc>,
}

/// One revision in a `_bulk_get` result: either the document or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkGetDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Identifies one document (optionally one revision) for `get_many`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

impl DocSpec {
    pub fn id(id: impl Into<String>) -> Self {
        Self { id: id.into(), rev: None }
    }
}

/// Response of `_find`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindResult {
    #[serde(default)]
    pub docs: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_stats: Option<Value>,
}

/// One row of `_all_docs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocRow {
    pub id: String,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
}

#[derive(Deserialize)]
struct AllDocs {
    #[serde(default)]
    rows: Vec<DocRow>,
}

#[derive(Deserialize)]
struct WriteAck {
    #[serde(default)]
    id: String,
    #[serde(default)]
    rev: String,
}

/// Handle to one database on a server.
#[derive(Clone)]
pub struct Database {
    name: String,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").field("name", &self.name).finish()
    }
}

impl Database {
    pub fn new(name: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.to_string(),
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> String {
        encode_component(&self.name)
    }

    fn doc_path(&self, doc_id: &str) -> String {
        format!("{}/{}", self.path(), encode_doc_id(doc_id))
    }

    fn endpoint(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.path())
    }

    fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.transport.send(request)
    }

    // -----------------------------------------------------------------------
    // Single documents
    // -----------------------------------------------------------------------

    /// Revision, size and date of a document, read from HEAD response headers.
    pub fn doc_info(&self, doc_id: &str) -> Result<DocInfo> {
        let response = self.send(HttpRequest::head(self.doc_path(doc_id)))?;
        match response.status {
            200 | 304 => Ok(DocInfo {
                rev: response.header("ETag").unwrap_or_default().trim_matches('"').to_string(),
                size: response.header("Content-Length").and_then(|v| v.parse().ok()),
                date: response.header("Date").map(str::to_string),
            }),
            status => Err(CouchError::database(status)),
        }
    }

    /// Create a document; the server assigns `_id` when absent.
    /// Returns the new `(id, rev)`.
    pub fn add(&self, doc: &Value) -> Result<(String, String)> {
        check_new_doc(doc)?;
        let response = self.send(HttpRequest::post(self.path()).json(doc.clone()))?;
        match response.status {
            201 | 202 => {
                let ack: WriteAck = response.json()?;
                debug!(db = %self.name, id = %ack.id, rev = %ack.rev, "document added");
                Ok((ack.id, ack.rev))
            }
            status => Err(CouchError::database(status)),
        }
    }

    /// Create a document in batch mode: the server acknowledges before the
    /// write reaches disk, so the document can be lost if the server stops
    /// before flushing.
    pub fn add_batch(&self, doc: &Value) -> Result<Value> {
        check_new_doc(doc)?;
        let request = HttpRequest::post(self.path()).query("batch", "ok").json(doc.clone());
        let response = self.send(request)?;
        match response.status {
            201 | 202 => response.get_data(),
            status => Err(CouchError::database(status)),
        }
    }

    /// Create documents in one request. Individual failures are reported in
    /// the returned list; only a malformed request fails the whole call.
    pub fn add_many(&self, docs: &[Value]) -> Result<Vec<BulkDocResult>> {
        self.bulk_docs(docs)
    }

    /// Update documents in one request. Each document carries its own `_rev`.
    pub fn update_many(&self, docs: &[Value]) -> Result<Vec<BulkDocResult>> {
        self.bulk_docs(docs)
    }

    fn bulk_docs(&self, docs: &[Value]) -> Result<Vec<BulkDocResult>> {
        for doc in docs {
            as_object(doc, "bulk document")?;
        }
        let request = HttpRequest::post(self.endpoint("_bulk_docs")).json(json!({ "docs": docs }));
        let response = self.send(request)?;
        match response.status {
            201 => {
                let results: Vec<BulkDocResult> = response.json()?;
                let failed = results.iter().filter(|r| !r.is_ok()).count();
                debug!(db = %self.name, total = results.len(), failed, "bulk write");
                Ok(results)
            }
            400 => Err(CouchError::database_with(400, "The request provided invalid JSON data")),
            status => Err(CouchError::database(status)),
        }
    }

    /// Fetch several documents (or revisions) in one request.
    pub fn get_many(&self, specs: &[DocSpec]) -> Result<Vec<BulkGetResult>> {
        // JSON only: a multipart reply would not parse
        let request = HttpRequest::post(self.endpoint("_bulk_get")).json(json!({ "docs": specs }));
        let response = self.send(request)?;
        match response.status {
            200 => {
                let mut data = response.get_data()?;
                let results = data.get_mut("results").map(Value::take).unwrap_or(json!([]));
                crate::json::from_value(results)
            }
            400 => Err(CouchError::database_with(
                400,
                "The request provided invalid JSON data or invalid query parameter",
            )),
            status => Err(CouchError::database(status)),
        }
    }

    /// Fetch a document. A missing document yields `{}`.
    pub fn get(&self, doc_id: &str, options: &GetOptions) -> Result<Value> {
        let request = options.apply(HttpRequest::get(self.doc_path(doc_id)));
        let response = self.send(request)?;
        match response.status {
            200 | 304 => response.get_data(),
            404 => Ok(Value::Object(Map::new())),
            400 => Err(CouchError::database_with(400, "The format of the request or revision was invalid")),
            status => Err(CouchError::database(status)),
        }
    }

    /// Fetch the current document (or `rev`), merge `partial` over it and
    /// store the result under the fetched revision. Returns the new `(id, rev)`.
    pub fn update(&self, doc_id: &str, partial: &Value, rev: Option<&str>) -> Result<(String, String)> {
        let partial = as_object(partial, "document")?;
        let options = rev.map(GetOptions::rev).unwrap_or_default();
        let mut doc = match self.get(doc_id, &options)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in partial {
            doc.insert(key.clone(), value.clone());
        }
        let base_rev = doc.get("_rev").and_then(Value::as_str).map(str::to_string);

        let mut request = HttpRequest::put(self.doc_path(doc_id));
        if let Some(rev) = &base_rev {
            request = request.query("rev", rev);
        }
        let response = self.send(request.json(Value::Object(doc)))?;
        match response.status {
            201 | 202 => {
                let ack: WriteAck = response.json()?;
                debug!(db = %self.name, id = %ack.id, rev = %ack.rev, "document updated");
                Ok((ack.id, ack.rev))
            }
            status => Err(write_error(status)),
        }
    }

    /// Mark a document deleted. Without `rev` the current revision is looked
    /// up first. Returns the tombstone `(id, rev)`.
    pub fn delete(&self, doc_id: &str, rev: Option<&str>) -> Result<(String, String)> {
        let rev = match rev {
            Some(rev) => rev.to_string(),
            None => self.doc_info(doc_id)?.rev,
        };
        let request = HttpRequest::delete(self.doc_path(doc_id)).query("rev", &rev);
        let response = self.send(request)?;
        match response.status {
            200 | 202 => {
                let ack: WriteAck = response.json()?;
                debug!(db = %self.name, id = %ack.id, "document deleted");
                Ok((ack.id, ack.rev))
            }
            status => Err(write_error(status)),
        }
    }

    /// Upsert: update when `doc_id` exists, otherwise insert `value` under that id.
    pub fn set(&self, doc_id: &str, value: &Value) -> Result<(String, String)> {
        if self.contains(doc_id)? {
            self.update(doc_id, value, None)
        } else {
            let mut doc = as_object(value, "document")?.clone();
            doc.insert("_id".into(), Value::String(doc_id.to_string()));
            self.add(&Value::Object(doc))
        }
    }

    /// True when the document exists.
    pub fn contains(&self, doc_id: &str) -> Result<bool> {
        let response = self.send(HttpRequest::head(self.doc_path(doc_id)))?;
        match response.status {
            200 | 304 => Ok(true),
            404 => Ok(false),
            status => Err(CouchError::database(status)),
        }
    }

    // -----------------------------------------------------------------------
    // Listing and iteration
    // -----------------------------------------------------------------------

    /// Rows of `_all_docs`; empty when the listing is refused.
    pub fn list_documents(&self) -> Result<Vec<DocRow>> {
        let response = self.send(HttpRequest::get(self.endpoint("_all_docs")))?;
        if response.status != 200 {
            return Ok(Vec::new());
        }
        let all: AllDocs = response.json()?;
        Ok(all.rows)
    }

    /// Document ids, fetched lazily from a single `_all_docs` page on the
    /// first call to `next`.
    ///
    /// The iterator does not follow pagination and cannot be restarted; a
    /// new call to `iter` issues a new request. A failed listing is yielded
    /// once as an error.
    pub fn iter(&self) -> DocIds<'_> {
        DocIds {
            db: self,
            rows: None,
        }
    }

    /// Every document body, fetched one by one in id order.
    pub fn documents(&self) -> impl Iterator<Item = Result<Value>> + '_ {
        self.iter().map(move |id| id.and_then(|id| self.get(&id, &GetOptions::default())))
    }

    // -----------------------------------------------------------------------
    // Queries and indexes
    // -----------------------------------------------------------------------

    pub fn find(&self, query: &FindQuery) -> Result<FindResult> {
        let request = HttpRequest::post(self.endpoint("_find")).json(query.to_json());
        let response = self.send(request)?;
        match response.status {
            200 => response.json(),
            400 => Err(CouchError::database_with(400, "Invalid request")),
            status => Err(CouchError::database(status)),
        }
    }

    /// Create an index; the response names the design document holding it.
    pub fn set_index(&self, index: &IndexQuery) -> Result<Value> {
        let request = HttpRequest::post(self.endpoint("_index")).json(index.to_json());
        let response = self.send(request)?;
        match response.status {
            200 | 201 => {
                info!(db = %self.name, fields = ?index.fields, "index created");
                response.get_data()
            }
            status => Err(CouchError::database(status)),
        }
    }

    /// All indexes, including the built-in `_all_docs` index.
    pub fn get_indexes(&self) -> Result<Value> {
        let response = self.send(HttpRequest::get(self.endpoint("_index")))?;
        match response.status {
            200 => response.get_data(),
            status => Err(CouchError::database(status)),
        }
    }

    /// Delete a JSON index. `design` may be given with or without `_design/`.
    pub fn delete_index(&self, design: &str, name: &str) -> Result<Value> {
        let ddoc = design.strip_prefix("_design/").unwrap_or(design);
        let path = format!(
            "{}/_design/{}/json/{}",
            self.endpoint("_index"),
            encode_component(ddoc),
            encode_component(name)
        );
        let response = self.send(HttpRequest::delete(path))?;
        match response.status {
            200 => response.get_data(),
            status => Err(CouchError::database(status)),
        }
    }

    /// Permanently remove leaf revisions, e.g. `{"doc-id": ["2-abc"]}`.
    /// Unlike `delete`, no tombstone is left behind.
    pub fn purge(&self, doc_revs: &Value) -> Result<Value> {
        as_object(doc_revs, "purge request")?;
        let request = HttpRequest::post(self.endpoint("_purge")).json(doc_revs.clone());
        let response = self.send(request)?;
        match response.status {
            200 | 201 | 202 => {
                info!(db = %self.name, "revisions purged");
                response.get_data()
            }
            400 => Err(CouchError::database_with(400, "Invalid database name or JSON payload")),
            500 => Err(CouchError::database_with(500, "Internal server error or timeout")),
            status => Err(CouchError::database(status)),
        }
    }
}

impl<'a> IntoIterator for &'a Database {
    type Item = Result<String>;
    type IntoIter = DocIds<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the document ids of one `_all_docs` page.
pub struct DocIds<'a> {
    db: &'a Database,
    rows: Option<std::vec::IntoIter<DocRow>>,
}

impl Iterator for DocIds<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rows.is_none() {
            match self.db.list_documents() {
                Ok(rows) => self.rows = Some(rows.into_iter()),
                Err(err) => {
                    self.rows = Some(Vec::new().into_iter());
                    return Some(Err(err));
                }
            }
        }
        self.rows.as_mut()?.next().map(|row| Ok(row.id))
    }
}

/// New documents must be objects and `_id`, when present, a string.
fn check_new_doc(doc: &Value) -> Result<()> {
    let doc = as_object(doc, "document")?;
    match doc.get("_id") {
        None | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(CouchError::Validation("_id must be a string".into())),
    }
}

fn write_error(status: u16) -> CouchError {
    match status {
        400 => CouchError::database_with(400, "Invalid request body or parameters"),
        404 => CouchError::database_with(404, "Specified database or document ID doesn't exist"),
        409 => CouchError::database_with(409, "Specified revision is not the latest for target document"),
        status => CouchError::database(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::testing::{body_json, empty_response, json_response, query_value, ScriptedTransport};

    fn db(script: &Arc<ScriptedTransport>) -> Database {
        Database::new("testdb", script.clone())
    }

    #[test]
    fn doc_info_reads_headers() {
        let script = ScriptedTransport::new(vec![empty_response(200)
            .with_header("etag", "\"1-967a00dff5e02add41819138abb3284d\"")
            .with_header("content-length", "71")
            .with_header("date", "Mon, 19 Oct 2026 10:00:00 GMT")]);
        let info = db(&script).doc_info("0").unwrap();
        assert_eq!(info.rev, "1-967a00dff5e02add41819138abb3284d");
        assert_eq!(info.size, Some(71));
        assert_eq!(info.date.as_deref(), Some("Mon, 19 Oct 2026 10:00:00 GMT"));
        assert_eq!(script.last().method, HttpMethod::Head);
        assert_eq!(script.last().path, "testdb/0");
    }

    #[test]
    fn doc_info_missing_is_database_error() {
        let script = ScriptedTransport::new(vec![empty_response(404)]);
        assert!(db(&script).doc_info("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn add_returns_id_and_rev() {
        let script = ScriptedTransport::new(vec![json_response(
            201,
            json!({"ok": true, "id": "0", "rev": "1-abc"}),
        )]);
        let doc = json!({"_id": "0", "number": 1, "name": "one"});
        let (id, rev) = db(&script).add(&doc).unwrap();
        assert_eq!((id.as_str(), rev.as_str()), ("0", "1-abc"));
        let req = script.last();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "testdb");
        assert_eq!(body_json(&req), doc);
    }

    #[test]
    fn add_rejects_non_string_id_locally() {
        let script = ScriptedTransport::new(vec![]);
        let err = db(&script).add(&json!({"_id": 7})).unwrap_err();
        assert!(matches!(err, CouchError::Validation(_)));
        let err = db(&script).add(&json!("not a doc")).unwrap_err();
        assert!(matches!(err, CouchError::Validation(_)));
        assert!(script.requests().is_empty());
    }

    #[test]
    fn add_batch_sets_batch_flag() {
        let script = ScriptedTransport::new(vec![json_response(202, json!({"ok": true, "id": "x"}))]);
        let body = db(&script).add_batch(&json!({"_id": "x"})).unwrap();
        assert_eq!(body["id"], "x");
        assert_eq!(query_value(&script.last(), "batch"), Some("ok"));
    }

    #[test]
    fn bulk_results_report_partial_failure() {
        let script = ScriptedTransport::new(vec![json_response(
            201,
            json!([
                {"ok": true, "id": "a", "rev": "1-a"},
                {"id": "_bad", "error": "illegal_docid", "reason": "Only reserved document ids may start with underscore."}
            ]),
        )]);
        let results = db(&script).add_many(&[json!({"_id": "a"}), json!({"_id": "_bad"})]).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(!results[1].is_ok());
        assert_eq!(results[1].error.as_deref(), Some("illegal_docid"));
        let req = script.last();
        assert_eq!(req.path, "testdb/_bulk_docs");
        assert_eq!(body_json(&req)["docs"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn bulk_400_is_malformed_batch() {
        let script = ScriptedTransport::new(vec![json_response(400, json!({"error": "bad_request"}))]);
        let err = db(&script).update_many(&[json!({})]).unwrap_err();
        assert!(matches!(err, CouchError::Database { status: 400, ref reason } if reason.contains("invalid JSON")));
    }

    #[test]
    fn bulk_rejects_non_object_locally() {
        let script = ScriptedTransport::new(vec![]);
        let err = db(&script).add_many(&[json!({}), json!(3)]).unwrap_err();
        assert!(matches!(err, CouchError::Validation(_)));
        assert!(script.requests().is_empty());
    }

    #[test]
    fn get_many_unwraps_results() {
        let script = ScriptedTransport::new(vec![json_response(
            200,
            json!({"results": [
                {"id": "0", "docs": [{"ok": {"_id": "0", "_rev": "1-a"}}]},
                {"id": "99", "docs": [{"error": {"id": "99", "error": "not_found"}}]}
            ]}),
        )]);
        let results = db(&script).get_many(&[DocSpec::id("0"), DocSpec::id("99")]).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].docs[0].ok.as_ref().unwrap()["_id"], "0");
        assert!(results[1].docs[0].error.is_some());
        assert_eq!(body_json(&script.last()), json!({"docs": [{"id": "0"}, {"id": "99"}]}));
    }

    #[test]
    fn get_missing_is_empty() {
        let script = ScriptedTransport::new(vec![json_response(404, json!({"error": "not_found"}))]);
        assert_eq!(db(&script).get("nope", &GetOptions::default()).unwrap(), json!({}));
    }

    #[test]
    fn get_bad_request_is_error() {
        let script = ScriptedTransport::new(vec![json_response(400, json!({"error": "bad_request"}))]);
        let err = db(&script).get("0", &GetOptions::rev("garbage")).unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn get_options_become_query_and_headers() {
        let script = ScriptedTransport::new(vec![json_response(200, json!({"_id": "0"}))]);
        let options = GetOptions {
            attachments: true,
            conflicts: true,
            rev: Some("2-b".into()),
            ..Default::default()
        };
        db(&script).get("0", &options).unwrap();
        let req = script.last();
        assert_eq!(req.target(), "/testdb/0?attachments=true&conflicts=true&rev=2-b");
        assert_eq!(req.headers[0].1, ACCEPT_MULTIPART);
    }

    #[test]
    fn update_merges_over_fetched_doc() {
        let script = ScriptedTransport::new(vec![
            json_response(200, json!({"_id": "0", "_rev": "1-a", "number": 1, "name": "one"})),
            json_response(201, json!({"ok": true, "id": "0", "rev": "2-b"})),
        ]);
        let (id, rev) = db(&script).update("0", &json!({"name": "oneone"}), None).unwrap();
        assert_eq!((id.as_str(), rev.as_str()), ("0", "2-b"));

        let requests = script.requests();
        assert_eq!(requests[0].method, HttpMethod::Get);
        let put = &requests[1];
        assert_eq!(put.method, HttpMethod::Put);
        assert_eq!(query_value(put, "rev"), Some("1-a"));
        assert_eq!(
            body_json(put),
            json!({"_id": "0", "_rev": "1-a", "number": 1, "name": "oneone"})
        );
    }

    #[test]
    fn update_with_explicit_rev_fetches_that_rev() {
        let script = ScriptedTransport::new(vec![
            json_response(200, json!({"_id": "0", "_rev": "1-a"})),
            json_response(409, json!({"error": "conflict"})),
        ]);
        let err = db(&script).update("0", &json!({"n": 1}), Some("1-a")).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(query_value(&script.requests()[0], "rev"), Some("1-a"));
    }

    #[test]
    fn delete_without_rev_looks_it_up() {
        let script = ScriptedTransport::new(vec![
            empty_response(200).with_header("ETag", "\"3-c\""),
            json_response(200, json!({"ok": true, "id": "0", "rev": "4-d"})),
        ]);
        let (_, rev) = db(&script).delete("0", None).unwrap();
        assert_eq!(rev, "4-d");
        let requests = script.requests();
        assert_eq!(requests[0].method, HttpMethod::Head);
        assert_eq!(requests[1].method, HttpMethod::Delete);
        assert_eq!(query_value(&requests[1], "rev"), Some("3-c"));
    }

    #[test]
    fn delete_conflict_and_missing() {
        let script = ScriptedTransport::new(vec![
            json_response(409, json!({"error": "conflict"})),
            json_response(404, json!({"error": "not_found"})),
        ]);
        let d = db(&script);
        assert!(d.delete("0", Some("1-old")).unwrap_err().is_conflict());
        assert!(d.delete("0", Some("1-old")).unwrap_err().is_not_found());
    }

    #[test]
    fn set_inserts_unknown_id() {
        let script = ScriptedTransport::new(vec![
            empty_response(404),
            json_response(201, json!({"ok": true, "id": "123", "rev": "1-x"})),
        ]);
        db(&script).set("123", &json!({"name": "new"})).unwrap();
        let post = script.last();
        assert_eq!(post.method, HttpMethod::Post);
        assert_eq!(body_json(&post), json!({"name": "new", "_id": "123"}));
    }

    #[test]
    fn set_updates_known_id() {
        let script = ScriptedTransport::new(vec![
            empty_response(200),
            json_response(200, json!({"_id": "1", "_rev": "1-a", "name": "two"})),
            json_response(201, json!({"ok": true, "id": "1", "rev": "2-b"})),
        ]);
        let (_, rev) = db(&script).set("1", &json!({"name": "twotwo"})).unwrap();
        assert_eq!(rev, "2-b");
        assert_eq!(script.last().method, HttpMethod::Put);
    }

    #[test]
    fn contains_raises_on_unexpected_status() {
        let script = ScriptedTransport::new(vec![empty_response(304), empty_response(404), empty_response(401)]);
        let d = db(&script);
        assert!(d.contains("a").unwrap());
        assert!(!d.contains("b").unwrap());
        assert_eq!(d.contains("c").unwrap_err().status(), Some(401));
    }

    #[test]
    fn iter_is_lazy_and_single_page() {
        let script = ScriptedTransport::new(vec![json_response(
            200,
            json!({"total_rows": 2, "offset": 0, "rows": [
                {"id": "0", "key": "0", "value": {"rev": "1-a"}},
                {"id": "1", "key": "1", "value": {"rev": "1-b"}}
            ]}),
        )]);
        let d = db(&script);
        let mut ids = d.iter();
        assert!(script.requests().is_empty());
        assert_eq!(ids.next().unwrap().unwrap(), "0");
        assert_eq!(ids.next().unwrap().unwrap(), "1");
        assert!(ids.next().is_none());
        assert_eq!(script.requests().len(), 1);
        assert_eq!(script.last().path, "testdb/_all_docs");
    }

    #[test]
    fn iter_yields_listing_failure_once() {
        let script = ScriptedTransport::new(vec![]);
        let d = db(&script);
        let mut ids = d.iter();
        assert!(matches!(ids.next(), Some(Err(CouchError::Connectivity(_)))));
        assert!(ids.next().is_none());
    }

    #[test]
    fn find_posts_query_json() {
        let script = ScriptedTransport::new(vec![json_response(
            200,
            json!({"docs": [{"_id": "0"}], "bookmark": "nil"}),
        )]);
        let query = FindQuery::new().filter("type", json!("number"));
        let result = db(&script).find(&query).unwrap();
        assert_eq!(result.docs.len(), 1);
        assert_eq!(result.bookmark.as_deref(), Some("nil"));
        let req = script.last();
        assert_eq!(req.path, "testdb/_find");
        assert_eq!(body_json(&req), json!({"selector": {"type": "number"}, "limit": 25}));
    }

    #[test]
    fn find_bad_request() {
        let script = ScriptedTransport::new(vec![json_response(400, json!({"error": "bad_request"}))]);
        let err = db(&script).find(&FindQuery::new()).unwrap_err();
        assert!(matches!(err, CouchError::Database { status: 400, ref reason } if reason == "Invalid request"));
    }

    #[test]
    fn index_lifecycle_paths() {
        let script = ScriptedTransport::new(vec![
            json_response(200, json!({"result": "created", "id": "_design/idx", "name": "by-type"})),
            json_response(200, json!({"total_rows": 2, "indexes": []})),
            json_response(200, json!({"ok": true})),
            json_response(404, json!({"error": "not_found"})),
        ]);
        let d = db(&script);
        d.set_index(&IndexQuery::new(["type"]).name("by-type")).unwrap();
        assert_eq!(script.last().path, "testdb/_index");
        d.get_indexes().unwrap();
        assert_eq!(script.last().method, HttpMethod::Get);
        d.delete_index("_design/idx", "by-type").unwrap();
        assert_eq!(script.last().path, "testdb/_index/_design/idx/json/by-type");
        assert!(d.delete_index("idx", "by-type").unwrap_err().is_not_found());
        assert_eq!(script.last().path, "testdb/_index/_design/idx/json/by-type");
    }

    #[test]
    fn purge_posts_revisions() {
        let script = ScriptedTransport::new(vec![json_response(
            201,
            json!({"purge_seq": null, "purged": {"0": ["1-a"]}}),
        )]);
        let result = db(&script).purge(&json!({"0": ["1-a"]})).unwrap();
        assert_eq!(result["purged"]["0"], json!(["1-a"]));
        assert_eq!(script.last().path, "testdb/_purge");
    }

    #[test]
    fn names_and_ids_are_encoded() {
        let script = ScriptedTransport::new(vec![json_response(404, json!({}))]);
        Database::new("a/b", script.clone()).get("x y", &GetOptions::default()).unwrap();
        assert_eq!(script.last().path, "a%2Fb/x%20y");
    }
}
