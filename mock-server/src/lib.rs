//! In-memory document-store server for tests and local experiments.
//!
//! # Overview
//! Serves the subset of the CouchDB REST protocol the client uses:
//! database administration, single-document CRUD with revision checks,
//! `_bulk_docs`, `_bulk_get`, `_all_docs`, `_find`, `_index`, `_purge` and
//! the server metadata endpoints. Optional Basic authentication rejects
//! requests without the configured credentials.
//!
//! # Design
//! Every database keeps the full revision history of each document so
//! `?rev=` reads and stale-revision conflicts behave like the real server.
//! DTOs are defined independently from the client crate; integration tests
//! catch protocol drift.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug)]
struct Revision {
    rev: String,
    body: Map<String, Value>,
    deleted: bool,
}

#[derive(Clone, Debug, Default)]
struct StoredDoc {
    /// Oldest first; the last entry is the current revision.
    history: Vec<Revision>,
}

impl StoredDoc {
    fn current(&self) -> Option<&Revision> {
        self.history.last()
    }

    fn live(&self) -> Option<&Revision> {
        self.current().filter(|r| !r.deleted)
    }

    fn generation(&self) -> u64 {
        self.current()
            .and_then(|r| r.rev.split_once('-'))
            .and_then(|(n, _)| n.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug)]
struct IndexDef {
    ddoc: String,
    name: String,
    fields: Vec<String>,
}

#[derive(Debug, Default)]
struct DbState {
    docs: BTreeMap<String, StoredDoc>,
    indexes: Vec<IndexDef>,
    update_seq: u64,
}

impl DbState {
    fn info(&self, name: &str) -> Value {
        let live = self.docs.values().filter(|d| d.live().is_some()).count();
        json!({
            "db_name": name,
            "doc_count": live,
            "doc_del_count": self.docs.len() - live,
            "update_seq": self.update_seq.to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct Couch {
    dbs: BTreeMap<String, DbState>,
}

#[derive(Clone)]
struct AppState {
    couch: Arc<RwLock<Couch>>,
    authorization: Option<String>,
}

pub fn app() -> Router {
    router(AppState {
        couch: Arc::default(),
        authorization: None,
    })
}

/// Router that requires `Authorization: Basic base64(user:password)`.
pub fn app_with_credentials(user: &str, password: &str) -> Router {
    router(AppState {
        couch: Arc::default(),
        authorization: Some(format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))),
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/_up", get(up))
        .route("/_membership", get(membership))
        .route("/_active_tasks", get(active_tasks))
        .route("/_all_dbs", get(all_dbs))
        .route("/_dbs_info", post(dbs_info))
        .route("/_db_updates", get(db_updates))
        .route("/{db}", get(db_info).put(create_db).delete(delete_db).post(post_doc))
        .route("/{db}/_all_docs", get(all_docs))
        .route("/{db}/_bulk_docs", post(bulk_docs))
        .route("/{db}/_bulk_get", post(bulk_get))
        .route("/{db}/_find", post(find))
        .route("/{db}/_index", get(list_indexes).post(create_index))
        .route("/{db}/_index/_design/{ddoc}/json/{name}", delete(delete_index))
        .route("/{db}/_purge", post(purge))
        .route("/{db}/_design/{ddoc}", get(get_design).put(put_design).delete(delete_design))
        .route("/{db}/{doc}", get(get_doc).put(put_doc).delete(delete_doc))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, app()).await
}

pub async fn serve(listener: TcpListener, router: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, router).await
}

/// Query parameters shared by the document endpoints; unknown ones are ignored.
#[derive(Debug, Default, Deserialize)]
struct DocParams {
    rev: Option<String>,
    batch: Option<String>,
}

type Params = Query<DocParams>;

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn failure(status: StatusCode, error: &str, reason: &str) -> Response {
    reply(status, json!({ "error": error, "reason": reason }))
}

fn missing_db() -> Response {
    failure(StatusCode::NOT_FOUND, "not_found", "Database does not exist.")
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, Response> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(failure(StatusCode::BAD_REQUEST, "bad_request", "Request body must be a JSON object")),
    }
}

fn new_rev(generation: u64) -> String {
    format!("{generation}-{}", Uuid::new_v4().simple())
}

static DB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_$()+/-]*$").expect("database name pattern compiles"));

fn valid_db_name(name: &str) -> bool {
    DB_NAME.is_match(name)
}

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.authorization {
        let given = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            return failure(StatusCode::UNAUTHORIZED, "unauthorized", "Name or password is incorrect.");
        }
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

async fn welcome() -> Json<Value> {
    Json(json!({ "couchdb": "Welcome", "version": "3.3.3", "vendor": { "name": "mock-server" } }))
}

async fn up() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn membership() -> Json<Value> {
    Json(json!({ "all_nodes": ["nonode@nohost"], "cluster_nodes": ["nonode@nohost"] }))
}

async fn active_tasks() -> Json<Value> {
    Json(json!([]))
}

async fn all_dbs(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.couch.read().await.dbs.keys().cloned().collect())
}

async fn dbs_info(State(state): State<AppState>, body: Bytes) -> Response {
    let body = match parse_object(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let Some(keys) = body.get("keys").and_then(Value::as_array) else {
        return failure(StatusCode::BAD_REQUEST, "bad_request", "`keys` member must exist.");
    };
    let couch = state.couch.read().await;
    let infos: Vec<Value> = keys
        .iter()
        .filter_map(Value::as_str)
        .map(|key| match couch.dbs.get(key) {
            Some(db) => json!({ "key": key, "info": db.info(key) }),
            None => json!({ "key": key, "error": "not_found" }),
        })
        .collect();
    reply(StatusCode::OK, Value::Array(infos))
}

async fn db_updates(State(state): State<AppState>) -> Json<Value> {
    let couch = state.couch.read().await;
    let results: Vec<Value> = couch
        .dbs
        .keys()
        .map(|name| json!({ "db_name": name, "type": "created" }))
        .collect();
    Json(json!({ "results": results, "last_seq": couch.dbs.len().to_string() }))
}

// ---------------------------------------------------------------------------
// Databases
// ---------------------------------------------------------------------------

async fn db_info(State(state): State<AppState>, Path(db): Path<String>) -> Response {
    match state.couch.read().await.dbs.get(&db) {
        Some(db_state) => reply(StatusCode::OK, db_state.info(&db)),
        None => missing_db(),
    }
}

async fn create_db(State(state): State<AppState>, Path(db): Path<String>) -> Response {
    if !valid_db_name(&db) {
        return failure(
            StatusCode::BAD_REQUEST,
            "illegal_database_name",
            "Name contains invalid characters.",
        );
    }
    let mut couch = state.couch.write().await;
    if couch.dbs.contains_key(&db) {
        return failure(
            StatusCode::PRECONDITION_FAILED,
            "file_exists",
            "The database could not be created, the file already exists.",
        );
    }
    couch.dbs.insert(db.clone(), DbState::default());
    info!(db = %db, "database created");
    reply(StatusCode::CREATED, json!({ "ok": true }))
}

async fn delete_db(State(state): State<AppState>, Path(db): Path<String>) -> Response {
    match state.couch.write().await.dbs.remove(&db) {
        Some(_) => {
            info!(db = %db, "database deleted");
            reply(StatusCode::OK, json!({ "ok": true }))
        }
        None => missing_db(),
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

enum WriteError {
    IllegalId,
    BadId,
    Conflict,
}

impl WriteError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            WriteError::IllegalId => (
                StatusCode::BAD_REQUEST,
                "illegal_docid",
                "Only reserved document ids may start with underscore.",
            ),
            WriteError::BadId => (StatusCode::BAD_REQUEST, "bad_request", "Document id must be a string."),
            WriteError::Conflict => (StatusCode::CONFLICT, "conflict", "Document update conflict."),
        }
    }

    fn response(&self) -> Response {
        let (status, error, reason) = self.parts();
        failure(status, error, reason)
    }
}

fn doc_id_for(body: &Map<String, Value>) -> Result<String, WriteError> {
    match body.get("_id") {
        None => Ok(Uuid::new_v4().simple().to_string()),
        Some(Value::String(id)) => Ok(id.clone()),
        Some(_) => Err(WriteError::BadId),
    }
}

/// Apply one write (`_deleted: true` makes it a tombstone) and return the new revision.
fn write_doc(
    db: &mut DbState,
    id: &str,
    mut body: Map<String, Value>,
    rev: Option<String>,
) -> Result<String, WriteError> {
    if id.starts_with('_') && !id.starts_with("_design/") && !id.starts_with("_local/") {
        return Err(WriteError::IllegalId);
    }
    let rev = rev.or_else(|| body.get("_rev").and_then(Value::as_str).map(str::to_string));
    let current = db.docs.get(id).and_then(StoredDoc::current);
    match (current, &rev) {
        (Some(current), Some(rev)) if current.rev != *rev => return Err(WriteError::Conflict),
        (Some(current), None) if !current.deleted => return Err(WriteError::Conflict),
        (None, Some(_)) => return Err(WriteError::Conflict),
        _ => {}
    }
    let deleted = body.get("_deleted").and_then(Value::as_bool).unwrap_or(false);
    body.shift_remove("_id");
    body.shift_remove("_rev");
    body.shift_remove("_deleted");

    let stored = db.docs.entry(id.to_string()).or_default();
    let rev = new_rev(stored.generation() + 1);
    stored.history.push(Revision {
        rev: rev.clone(),
        body,
        deleted,
    });
    db.update_seq += 1;
    Ok(rev)
}

fn render(id: &str, revision: &Revision) -> Value {
    let mut doc = Map::new();
    doc.insert("_id".into(), json!(id));
    doc.insert("_rev".into(), json!(revision.rev));
    doc.extend(revision.body.clone());
    Value::Object(doc)
}

async fn post_doc(
    State(state): State<AppState>,
    Path(db): Path<String>,
    params: Params,
    body: Bytes,
) -> Response {
    let body = match parse_object(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let mut couch = state.couch.write().await;
    let Some(db_state) = couch.dbs.get_mut(&db) else {
        return missing_db();
    };
    let id = match doc_id_for(&body) {
        Ok(id) => id,
        Err(err) => return err.response(),
    };
    match write_doc(db_state, &id, body, None) {
        Ok(_) if params.batch.as_deref() == Some("ok") => {
            reply(StatusCode::ACCEPTED, json!({ "ok": true, "id": id }))
        }
        Ok(rev) => reply(StatusCode::CREATED, json!({ "ok": true, "id": id, "rev": rev })),
        Err(err) => err.response(),
    }
}

async fn get_doc(
    State(state): State<AppState>,
    Path((db, id)): Path<(String, String)>,
    params: Params,
) -> Response {
    read_doc(&state, &db, &id, &params).await
}

async fn get_design(
    State(state): State<AppState>,
    Path((db, ddoc)): Path<(String, String)>,
    params: Params,
) -> Response {
    read_doc(&state, &db, &format!("_design/{ddoc}"), &params).await
}

async fn read_doc(state: &AppState, db: &str, id: &str, params: &DocParams) -> Response {
    let couch = state.couch.read().await;
    let Some(db_state) = couch.dbs.get(db) else {
        return missing_db();
    };
    let Some(stored) = db_state.docs.get(id) else {
        return failure(StatusCode::NOT_FOUND, "not_found", "missing");
    };
    let revision = match &params.rev {
        Some(rev) => stored.history.iter().find(|r| &r.rev == rev),
        None => stored.current(),
    };
    match revision {
        Some(revision) if !revision.deleted => (
            StatusCode::OK,
            [(header::ETAG, format!("\"{}\"", revision.rev))],
            Json(render(id, revision)),
        )
            .into_response(),
        Some(_) => failure(StatusCode::NOT_FOUND, "not_found", "deleted"),
        None => failure(StatusCode::NOT_FOUND, "not_found", "missing"),
    }
}

async fn put_doc(
    State(state): State<AppState>,
    Path((db, id)): Path<(String, String)>,
    params: Params,
    body: Bytes,
) -> Response {
    store_doc(&state, &db, &id, &params, &body).await
}

async fn put_design(
    State(state): State<AppState>,
    Path((db, ddoc)): Path<(String, String)>,
    params: Params,
    body: Bytes,
) -> Response {
    store_doc(&state, &db, &format!("_design/{ddoc}"), &params, &body).await
}

async fn store_doc(state: &AppState, db: &str, id: &str, params: &DocParams, body: &[u8]) -> Response {
    let body = match parse_object(body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let mut couch = state.couch.write().await;
    let Some(db_state) = couch.dbs.get_mut(db) else {
        return missing_db();
    };
    match write_doc(db_state, id, body, params.rev.clone()) {
        Ok(rev) => reply(StatusCode::CREATED, json!({ "ok": true, "id": id, "rev": rev })),
        Err(err) => err.response(),
    }
}

async fn delete_doc(
    State(state): State<AppState>,
    Path((db, id)): Path<(String, String)>,
    params: Params,
) -> Response {
    remove_doc(&state, &db, &id, &params).await
}

async fn delete_design(
    State(state): State<AppState>,
    Path((db, ddoc)): Path<(String, String)>,
    params: Params,
) -> Response {
    remove_doc(&state, &db, &format!("_design/{ddoc}"), &params).await
}

async fn remove_doc(state: &AppState, db: &str, id: &str, params: &DocParams) -> Response {
    let mut couch = state.couch.write().await;
    let Some(db_state) = couch.dbs.get_mut(db) else {
        return missing_db();
    };
    if db_state.docs.get(id).and_then(StoredDoc::live).is_none() {
        return failure(StatusCode::NOT_FOUND, "not_found", "missing");
    }
    let Some(rev) = params.rev.clone() else {
        return WriteError::Conflict.response();
    };
    let mut tombstone = Map::new();
    tombstone.insert("_deleted".into(), json!(true));
    match write_doc(db_state, id, tombstone, Some(rev)) {
        Ok(rev) => reply(StatusCode::OK, json!({ "ok": true, "id": id, "rev": rev })),
        Err(err) => err.response(),
    }
}

async fn all_docs(State(state): State<AppState>, Path(db): Path<String>) -> Response {
    let couch = state.couch.read().await;
    let Some(db_state) = couch.dbs.get(&db) else {
        return missing_db();
    };
    let rows: Vec<Value> = db_state
        .docs
        .iter()
        .filter_map(|(id, doc)| doc.live().map(|r| json!({ "id": id, "key": id, "value": { "rev": r.rev } })))
        .collect();
    reply(StatusCode::OK, json!({ "total_rows": rows.len(), "offset": 0, "rows": rows }))
}

// ---------------------------------------------------------------------------
// Bulk
// ---------------------------------------------------------------------------

async fn bulk_docs(State(state): State<AppState>, Path(db): Path<String>, body: Bytes) -> Response {
    let body = match parse_object(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let Some(docs) = body.get("docs").and_then(Value::as_array) else {
        return failure(StatusCode::BAD_REQUEST, "bad_request", "POST body must include `docs` parameter.");
    };
    let mut couch = state.couch.write().await;
    let Some(db_state) = couch.dbs.get_mut(&db) else {
        return missing_db();
    };
    let results: Vec<Value> = docs
        .iter()
        .map(|doc| {
            let Some(doc) = doc.as_object() else {
                return json!({
                    "id": "",
                    "error": "bad_request",
                    "reason": "Document must be a JSON object"
                });
            };
            let outcome = doc_id_for(doc)
                .and_then(|id| write_doc(db_state, &id, doc.clone(), None).map(|rev| (id, rev)));
            match outcome {
                Ok((id, rev)) => json!({ "ok": true, "id": id, "rev": rev }),
                Err(err) => {
                    let (_, error, reason) = err.parts();
                    let id = doc.get("_id").cloned().unwrap_or(Value::Null);
                    json!({ "id": id, "error": error, "reason": reason })
                }
            }
        })
        .collect();
    reply(StatusCode::CREATED, Value::Array(results))
}

async fn bulk_get(State(state): State<AppState>, Path(db): Path<String>, body: Bytes) -> Response {
    let body = match parse_object(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let Some(specs) = body.get("docs").and_then(Value::as_array) else {
        return failure(StatusCode::BAD_REQUEST, "bad_request", "Missing JSON list of 'docs'.");
    };
    let couch = state.couch.read().await;
    let Some(db_state) = couch.dbs.get(&db) else {
        return missing_db();
    };
    let results: Vec<Value> = specs
        .iter()
        .map(|spec| {
            let id = spec.get("id").and_then(Value::as_str).unwrap_or_default();
            let rev = spec.get("rev").and_then(Value::as_str);
            let revision = db_state.docs.get(id).and_then(|doc| match rev {
                Some(rev) => doc.history.iter().find(|r| r.rev == rev),
                None => doc.live(),
            });
            let entry = match revision.filter(|r| !r.deleted) {
                Some(revision) => json!({ "ok": render(id, revision) }),
                None => json!({ "error": {
                    "id": id,
                    "rev": rev.unwrap_or("undefined"),
                    "error": "not_found",
                    "reason": "missing"
                }}),
            };
            json!({ "id": id, "docs": [entry] })
        })
        .collect();
    reply(StatusCode::OK, json!({ "results": results }))
}

async fn purge(State(state): State<AppState>, Path(db): Path<String>, body: Bytes) -> Response {
    let body = match parse_object(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let mut couch = state.couch.write().await;
    let Some(db_state) = couch.dbs.get_mut(&db) else {
        return missing_db();
    };
    let mut purged = Map::new();
    for (id, revs) in &body {
        let revs: Vec<&str> = revs.as_array().into_iter().flatten().filter_map(Value::as_str).collect();
        let Some(doc) = db_state.docs.get_mut(id) else {
            purged.insert(id.clone(), json!([]));
            continue;
        };
        let removed: Vec<String> = doc
            .history
            .iter()
            .filter(|r| revs.contains(&r.rev.as_str()))
            .map(|r| r.rev.clone())
            .collect();
        let leaf_purged = doc.current().is_some_and(|r| removed.contains(&r.rev));
        if leaf_purged {
            db_state.docs.remove(id);
        } else {
            doc.history.retain(|r| !removed.contains(&r.rev));
        }
        purged.insert(id.clone(), json!(removed));
    }
    reply(StatusCode::CREATED, json!({ "purge_seq": null, "purged": purged }))
}

// ---------------------------------------------------------------------------
// Mango
// ---------------------------------------------------------------------------

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, key| value.get(key))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn matches_condition(value: Option<&Value>, condition: &Value) -> bool {
    let operators = condition
        .as_object()
        .filter(|ops| !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')));
    let Some(operators) = operators else {
        return value == Some(condition);
    };
    operators.iter().all(|(op, arg)| match op.as_str() {
        "$eq" => value == Some(arg),
        "$ne" => value != Some(arg),
        "$gt" => value.and_then(|v| compare(v, arg)) == Some(Ordering::Greater),
        "$gte" => matches!(value.and_then(|v| compare(v, arg)), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => value.and_then(|v| compare(v, arg)) == Some(Ordering::Less),
        "$lte" => matches!(value.and_then(|v| compare(v, arg)), Some(Ordering::Less | Ordering::Equal)),
        "$exists" => value.is_some() == arg.as_bool().unwrap_or(true),
        "$in" => value.is_some_and(|v| arg.as_array().is_some_and(|list| list.contains(v))),
        _ => false,
    })
}

fn matches_selector(doc: &Value, selector: &Map<String, Value>) -> bool {
    selector.iter().all(|(field, condition)| match field.as_str() {
        "$and" => condition
            .as_array()
            .is_some_and(|all| all.iter().filter_map(Value::as_object).all(|s| matches_selector(doc, s))),
        "$or" => condition
            .as_array()
            .is_some_and(|any| any.iter().filter_map(Value::as_object).any(|s| matches_selector(doc, s))),
        _ => matches_condition(lookup(doc, field), condition),
    })
}

fn sort_keys(sort: &[Value]) -> Vec<(String, bool)> {
    sort.iter()
        .filter_map(|entry| match entry {
            Value::String(field) => Some((field.clone(), false)),
            Value::Object(map) => map
                .iter()
                .next()
                .map(|(field, dir)| (field.clone(), dir.as_str() == Some("desc"))),
            _ => None,
        })
        .collect()
}

async fn find(State(state): State<AppState>, Path(db): Path<String>, body: Bytes) -> Response {
    let query = match parse_object(&body) {
        Ok(query) => query,
        Err(resp) => return resp,
    };
    let Some(selector) = query.get("selector").and_then(Value::as_object) else {
        return failure(StatusCode::BAD_REQUEST, "bad_request", "Missing required key: selector");
    };
    let limit = query.get("limit").and_then(Value::as_u64).unwrap_or(25) as usize;
    let skip = query.get("skip").and_then(Value::as_u64).unwrap_or(0) as usize;
    let fields: Vec<&str> = query
        .get("fields")
        .and_then(Value::as_array)
        .map(|f| f.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let sort = sort_keys(query.get("sort").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default());

    let couch = state.couch.read().await;
    let Some(db_state) = couch.dbs.get(&db) else {
        return missing_db();
    };
    let mut docs: Vec<Value> = db_state
        .docs
        .iter()
        .filter(|(id, _)| !id.starts_with("_design/"))
        .filter_map(|(id, doc)| doc.live().map(|r| render(id, r)))
        .filter(|doc| matches_selector(doc, selector))
        .collect();
    for (field, descending) in sort.iter().rev() {
        docs.sort_by(|a, b| {
            let order = match (lookup(a, field), lookup(b, field)) {
                (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            };
            if *descending {
                order.reverse()
            } else {
                order
            }
        });
    }
    let docs: Vec<Value> = docs
        .into_iter()
        .skip(skip)
        .take(limit)
        .map(|doc| {
            if fields.is_empty() {
                return doc;
            }
            let projected: Map<String, Value> = fields
                .iter()
                .filter_map(|f| doc.get(*f).map(|v| (f.to_string(), v.clone())))
                .collect();
            Value::Object(projected)
        })
        .collect();
    reply(
        StatusCode::OK,
        json!({
            "docs": docs,
            "bookmark": "nil",
            "warning": "No matching index found, create an index to optimize query time."
        }),
    )
}

async fn list_indexes(State(state): State<AppState>, Path(db): Path<String>) -> Response {
    let couch = state.couch.read().await;
    let Some(db_state) = couch.dbs.get(&db) else {
        return missing_db();
    };
    let mut indexes = vec![json!({
        "ddoc": null,
        "name": "_all_docs",
        "type": "special",
        "def": { "fields": [{ "_id": "asc" }] }
    })];
    indexes.extend(db_state.indexes.iter().map(|index| {
        let fields: Vec<Value> = index.fields.iter().map(|f| json!({ f.as_str(): "asc" })).collect();
        json!({ "ddoc": index.ddoc, "name": index.name, "type": "json", "def": { "fields": fields } })
    }));
    reply(StatusCode::OK, json!({ "total_rows": indexes.len(), "indexes": indexes }))
}

async fn create_index(State(state): State<AppState>, Path(db): Path<String>, body: Bytes) -> Response {
    let body = match parse_object(&body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let Some(fields) = index_fields(&body) else {
        return failure(StatusCode::BAD_REQUEST, "bad_request", "Missing required key: index.fields");
    };
    let mut couch = state.couch.write().await;
    let Some(db_state) = couch.dbs.get_mut(&db) else {
        return missing_db();
    };
    let suffix = Uuid::new_v4().simple().to_string();
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| suffix.clone());
    let ddoc = match body.get("ddoc").and_then(Value::as_str) {
        Some(ddoc) if ddoc.starts_with("_design/") => ddoc.to_string(),
        Some(ddoc) => format!("_design/{ddoc}"),
        None => format!("_design/{suffix}"),
    };
    if db_state.indexes.iter().any(|i| i.ddoc == ddoc && i.name == name) {
        return reply(StatusCode::OK, json!({ "result": "exists", "id": ddoc, "name": name }));
    }
    db_state.indexes.push(IndexDef {
        ddoc: ddoc.clone(),
        name: name.clone(),
        fields,
    });
    reply(StatusCode::OK, json!({ "result": "created", "id": ddoc, "name": name }))
}

async fn delete_index(
    State(state): State<AppState>,
    Path((db, ddoc, name)): Path<(String, String, String)>,
) -> Response {
    let mut couch = state.couch.write().await;
    let Some(db_state) = couch.dbs.get_mut(&db) else {
        return missing_db();
    };
    let ddoc = format!("_design/{ddoc}");
    let before = db_state.indexes.len();
    db_state.indexes.retain(|i| !(i.ddoc == ddoc && i.name == name));
    if db_state.indexes.len() == before {
        return failure(StatusCode::NOT_FOUND, "not_found", "Index not found");
    }
    reply(StatusCode::OK, json!({ "ok": true }))
}

/// Field names from `index.fields`, accepting both `"f"` and `{"f": "asc"}`.
fn index_fields(body: &Map<String, Value>) -> Option<Vec<String>> {
    let fields = body.get("index")?.get("fields")?.as_array()?;
    let names: Vec<String> = fields
        .iter()
        .filter_map(|f| match f {
            Value::String(name) => Some(name.clone()),
            Value::Object(map) => map.keys().next().cloned(),
            _ => None,
        })
        .collect();
    (!names.is_empty()).then_some(names)
}
