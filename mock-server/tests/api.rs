use axum::http::{self, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use mock_server::{app, app_with_credentials};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn request(method: &str, uri: &str) -> Request<String> {
    Request::builder().method(method).uri(uri).body(String::new()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(body.to_string())
        .unwrap()
}

async fn send(app: &Router, req: Request<String>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    (status, body_json(resp).await)
}

async fn with_db(name: &str) -> Router {
    let app = app();
    let (status, _) = send(&app, request("PUT", &format!("/{name}"))).await;
    assert_eq!(status, StatusCode::CREATED);
    app
}

// --- databases ---

#[tokio::test]
async fn create_list_and_delete_database() {
    let app = with_db("testdb").await;
    let (status, _) = send(&app, request("PUT", "/testdb")).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);

    let (_, names) = send(&app, request("GET", "/_all_dbs")).await;
    assert_eq!(names, json!(["testdb"]));

    let resp = app.clone().oneshot(request("HEAD", "/testdb")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let (status, _) = send(&app, request("DELETE", "/testdb")).await;
    assert_eq!(status, StatusCode::OK);
    let resp = app.clone().oneshot(request("HEAD", "/testdb")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn illegal_database_name_is_400() {
    let (status, body) = send(&app(), request("PUT", "/_bad")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "illegal_database_name");
}

#[tokio::test]
async fn dbs_info_reports_missing_keys() {
    let app = with_db("a").await;
    let (status, body) = send(&app, json_request("POST", "/_dbs_info", json!({"keys": ["a", "zz"]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["info"]["db_name"], "a");
    assert_eq!(body[1]["error"], "not_found");
}

// --- documents ---

#[tokio::test]
async fn put_get_update_delete_document() {
    let app = with_db("db").await;
    let (status, created) = send(&app, json_request("PUT", "/db/0", json!({"number": 1}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let rev1 = created["rev"].as_str().unwrap().to_string();
    assert!(rev1.starts_with("1-"));

    let resp = app.clone().oneshot(request("GET", "/db/0")).await.unwrap();
    let etag = resp.headers()[http::header::ETAG].to_str().unwrap().to_string();
    assert_eq!(etag, format!("\"{rev1}\""));
    assert_eq!(body_json(resp).await, json!({"_id": "0", "_rev": rev1, "number": 1}));

    let (status, updated) = send(&app, json_request("PUT", &format!("/db/0?rev={rev1}"), json!({"number": 2}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let rev2 = updated["rev"].as_str().unwrap().to_string();

    // stale revision
    let (status, body) = send(&app, json_request("PUT", &format!("/db/0?rev={rev1}"), json!({"number": 3}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    // old revision is still readable
    let (_, old) = send(&app, request("GET", &format!("/db/0?rev={rev1}"))).await;
    assert_eq!(old["number"], 1);

    let (status, _) = send(&app, request("DELETE", &format!("/db/0?rev={rev2}"))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, request("GET", "/db/0")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["reason"], "deleted");
}

#[tokio::test]
async fn post_generates_id_and_batch_is_accepted() {
    let app = with_db("db").await;
    let (status, body) = send(&app, json_request("POST", "/db", json!({"a": 1}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"].as_str().unwrap().len(), 32);

    let (status, body) = send(&app, json_request("POST", "/db?batch=ok", json!({"_id": "b"}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"ok": true, "id": "b"}));
}

#[tokio::test]
async fn malformed_body_is_400() {
    let app = with_db("db").await;
    let req = Request::builder().method("POST").uri("/db").body("not json".to_string()).unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(!body_bytes(resp).await.is_empty());
}

#[tokio::test]
async fn design_documents_keep_their_prefix() {
    let app = with_db("db").await;
    let (status, body) = send(&app, json_request("PUT", "/db/_design/views", json!({"views": {}}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], "_design/views");
    let (_, doc) = send(&app, request("GET", "/db/_design/views")).await;
    assert_eq!(doc["_id"], "_design/views");
}

// --- bulk ---

#[tokio::test]
async fn bulk_docs_reports_per_item_failures() {
    let app = with_db("db").await;
    let docs = json!({"docs": [{"_id": "a"}, {"_id": "_bad"}, {"x": 1}]});
    let (status, results) = send(&app, json_request("POST", "/db/_bulk_docs", docs)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(results[0]["ok"], true);
    assert_eq!(results[1]["error"], "illegal_docid");
    assert_eq!(results[2]["ok"], true);

    let (_, results) = send(&app, json_request("POST", "/db/_bulk_docs", json!({"docs": [{"_id": "a"}]}))).await;
    assert_eq!(results[0]["error"], "conflict");

    let (status, _) = send(&app, json_request("POST", "/db/_bulk_docs", json!({"nope": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bulk_get_wraps_each_result() {
    let app = with_db("db").await;
    send(&app, json_request("PUT", "/db/a", json!({"v": 1}))).await;
    let (_, body) = send(&app, json_request("POST", "/db/_bulk_get", json!({"docs": [{"id": "a"}, {"id": "b"}]}))).await;
    assert_eq!(body["results"][0]["docs"][0]["ok"]["v"], 1);
    assert_eq!(body["results"][1]["docs"][0]["error"]["error"], "not_found");
}

#[tokio::test]
async fn all_docs_skips_deleted() {
    let app = with_db("db").await;
    let (_, a) = send(&app, json_request("PUT", "/db/a", json!({}))).await;
    send(&app, json_request("PUT", "/db/b", json!({}))).await;
    let rev = a["rev"].as_str().unwrap();
    send(&app, request("DELETE", &format!("/db/a?rev={rev}"))).await;
    let (_, body) = send(&app, request("GET", "/db/_all_docs")).await;
    assert_eq!(body["total_rows"], 1);
    assert_eq!(body["rows"][0]["id"], "b");
}

// --- mango ---

#[tokio::test]
async fn find_filters_projects_and_limits() {
    let app = with_db("db").await;
    for i in 0..5 {
        send(&app, json_request("POST", "/db", json!({"type": "number", "n": i}))).await;
        send(&app, json_request("POST", "/db", json!({"type": "letter", "n": i}))).await;
    }
    let query = json!({"selector": {"type": "number"}, "limit": 25});
    let (status, body) = send(&app, json_request("POST", "/db/_find", query)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["docs"].as_array().unwrap().len(), 5);

    let query = json!({
        "selector": {"n": {"$gte": 3}},
        "fields": ["n"],
        "sort": [{"n": "desc"}],
        "limit": 3
    });
    let (_, body) = send(&app, json_request("POST", "/db/_find", query)).await;
    assert_eq!(body["docs"], json!([{"n": 4}, {"n": 4}, {"n": 3}]));

    let (status, _) = send(&app, json_request("POST", "/db/_find", json!({"limit": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn index_lifecycle() {
    let app = with_db("db").await;
    let index = json!({"index": {"fields": ["type"]}, "name": "by-type", "ddoc": "types", "type": "json"});
    let (_, created) = send(&app, json_request("POST", "/db/_index", index.clone())).await;
    assert_eq!(created, json!({"result": "created", "id": "_design/types", "name": "by-type"}));
    let (_, again) = send(&app, json_request("POST", "/db/_index", index)).await;
    assert_eq!(again["result"], "exists");

    let (_, list) = send(&app, request("GET", "/db/_index")).await;
    assert_eq!(list["total_rows"], 2);
    assert_eq!(list["indexes"][1]["def"]["fields"], json!([{"type": "asc"}]));

    let (status, _) = send(&app, request("DELETE", "/db/_index/_design/types/json/by-type")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, request("DELETE", "/db/_index/_design/types/json/by-type")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn purge_removes_document() {
    let app = with_db("db").await;
    let (_, created) = send(&app, json_request("PUT", "/db/a", json!({}))).await;
    let rev = created["rev"].clone();
    let (status, body) = send(&app, json_request("POST", "/db/_purge", json!({"a": [rev]}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["purged"]["a"], json!([rev]));
    let (status, _) = send(&app, request("GET", "/db/a")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// --- server ---

#[tokio::test]
async fn server_metadata_endpoints() {
    let app = app();
    let (_, welcome) = send(&app, request("GET", "/")).await;
    assert_eq!(welcome["couchdb"], "Welcome");
    let (_, up) = send(&app, request("GET", "/_up")).await;
    assert_eq!(up["status"], "ok");
    let (_, members) = send(&app, request("GET", "/_membership")).await;
    assert!(members["all_nodes"].is_array());
    let (_, tasks) = send(&app, request("GET", "/_active_tasks")).await;
    assert_eq!(tasks, json!([]));
}

#[tokio::test]
async fn credentials_are_required_when_configured() {
    let app = app_with_credentials("admin", "test");
    let (status, _) = send(&app, request("GET", "/_all_dbs")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::builder()
        .uri("/_all_dbs")
        .header(http::header::AUTHORIZATION, "Basic YWRtaW46dGVzdA==")
        .body(String::new())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
