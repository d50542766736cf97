use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use clap::Parser;
use docsearch_core::{DocumentStore, IndexSchema, LocalNormalizer, NormalizeError, Normalizer, SearchIndex, SledStore};
use docsearch_server::config::Config;
use docsearch_server::{build_app, init_state, AppState};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt;

struct Outage;

#[async_trait]
impl Normalizer for Outage {
    async fn normalize(&self, _raw: &str) -> Result<String, NormalizeError> {
        Err(NormalizeError::Unavailable("connection refused".into()))
    }
}

fn test_state(normalizer: Arc<dyn Normalizer>) -> (TempDir, AppState) {
    let dir = tempdir().unwrap();
    let index = SearchIndex::create(dir.path().join("index"), IndexSchema::default()).unwrap();
    let store = SledStore::temporary().unwrap();
    let state = AppState { index: Arc::new(index), store: Arc::new(store), normalizer };
    (dir, state)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn insert(app: &Router, body: &str) -> (StatusCode, Value) {
    let req = Request::post("/insert")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, req).await
}

fn hit_ids(json: &Value) -> Vec<u64> {
    json["hits"].as_array().unwrap().iter().map(|h| h["doc_id"].as_u64().unwrap()).collect()
}

#[tokio::test]
async fn heartbeat() {
    let (_dir, state) = test_state(Arc::new(LocalNormalizer));
    let app = build_app(state);
    let (status, json) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "status": "ok" }));
}

#[tokio::test]
async fn insert_then_search() {
    let (_dir, state) = test_state(Arc::new(LocalNormalizer));
    let app = build_app(state);

    let (status, json) = insert(&app, r#"{"content":"the quick brown fox"}"#).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["id"], 1);
    assert_eq!(json["message"], "Document inserted with ID: 1");

    let (status, json) = get(&app, "/search?q=quick").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hit_ids(&json), vec![1]);
    assert_eq!(json["total_hits"], 1);
    assert_eq!(json["hits"][0]["content"], "the quick brown fox");
    assert!(json["hits"][0]["score"].as_f64().unwrap() > 0.0);

    let (status, json) = get(&app, "/search?q=elephant").await;
    assert_eq!(status, StatusCode::OK);
    assert!(hit_ids(&json).is_empty());
    assert_eq!(json["total_hits"], 0);
}

#[tokio::test]
async fn ranking_and_paging_over_http() {
    let (_dir, state) = test_state(Arc::new(LocalNormalizer));
    let app = build_app(state);
    insert(&app, r#"{"content":"rust programming"}"#).await;
    insert(&app, r#"{"content":"rust rust rust programming"}"#).await;
    insert(&app, r#"{"content":"rust programming"}"#).await;

    let (_, json) = get(&app, "/search?q=rust").await;
    assert_eq!(hit_ids(&json), vec![2, 1, 3]);

    let (_, json) = get(&app, "/search?q=rust&size=1&from=1").await;
    assert_eq!(hit_ids(&json), vec![1]);
    assert_eq!(json["total_hits"], 3);

    let (status, json) = get(&app, "/search?q=rust&size=0").await;
    assert_eq!(status, StatusCode::OK);
    assert!(hit_ids(&json).is_empty());
    assert_eq!(json["total_hits"], 3);
}

#[tokio::test]
async fn malformed_insert_bodies_are_rejected() {
    let (_dir, state) = test_state(Arc::new(LocalNormalizer));
    let store = state.store.clone();
    let app = build_app(state);

    for body in ["", "{}", r#"{"text":"x"}"#, "not json", r#"{"content":"   "}"#, r#"{"content":42}"#] {
        let (status, json) = insert(&app, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body:?}");
        assert!(json["error"].is_string());
    }

    let req = Request::post("/insert").body(Body::empty()).unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.count(), 0);
}

#[tokio::test]
async fn search_requires_query() {
    let (_dir, state) = test_state(Arc::new(LocalNormalizer));
    let app = build_app(state);
    for uri in ["/search", "/search?q=", "/search?q=%20%20", "/search?q=fox&size=many"] {
        let (status, json) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "uri {uri}");
        assert!(json["error"].is_string());
    }
}

#[tokio::test]
async fn normalizer_outage_blocks_ingestion() {
    let (_dir, state) = test_state(Arc::new(Outage));
    let store = state.store.clone();
    let app = build_app(state);
    let (status, json) = insert(&app, r#"{"content":"hello"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("connection refused"));
    assert_eq!(store.count(), 0);
}

#[tokio::test]
async fn index_failure_after_store_write_is_reported() {
    let (_dir, state) = test_state(Arc::new(LocalNormalizer));
    let store = state.store.clone();
    state.index.close().unwrap();
    let app = build_app(state);

    let (status, json) = insert(&app, r#"{"content":"durable but not searchable"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].is_string());
    // The store commit is not undone.
    assert_eq!(store.count(), 1);

    let (status, _) = get(&app, "/search?q=durable").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn doc_endpoint() {
    let (_dir, state) = test_state(Arc::new(LocalNormalizer));
    let app = build_app(state);
    insert(&app, r#"{"content":"  spaced   out  "}"#).await;

    let (status, json) = get(&app, "/doc/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["content"], "spaced out");

    let (status, _) = get(&app, "/doc/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn startup_replays_existing_store() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("store");
    let index_path = dir.path().join("index");
    {
        let store = SledStore::open(&store_path).unwrap();
        store.insert("alpha report").unwrap();
        store.insert("beta report").unwrap();
        store.insert("gamma memo").unwrap();
    }

    let mut config = Config::try_parse_from(["docsearch-server"]).unwrap();
    config.index = index_path.clone();
    config.store = store_path.clone();
    let state = init_state(&config).await.unwrap();
    assert!(index_path.exists());
    let app = build_app(state);

    let (_, json) = get(&app, "/search?q=report").await;
    assert_eq!(hit_ids(&json), vec![1, 2]);
    let (_, json) = get(&app, "/search?q=memo").await;
    assert_eq!(hit_ids(&json), vec![3]);

    // New ids continue after the replayed ones.
    let (status, json) = insert(&app, r#"{"content":"delta memo"}"#).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["id"], 4);
}
