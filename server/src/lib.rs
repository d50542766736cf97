use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use docsearch_core::bootstrap::open_or_bootstrap;
use docsearch_core::{DocId, DocumentStore, LocalNormalizer, Normalizer, SearchIndex, SearchRequest, SearchResults, SledStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod errors;
pub mod normalizer;

use config::{Config, NormalizerKind};
use errors::ApiError;
use normalizer::OpenAiNormalizer;

#[derive(Deserialize)]
pub struct InsertRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct InsertResponse {
    pub id: DocId,
    pub message: String,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub size: Option<usize>,
    pub from: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_ms: u128,
    #[serde(flatten)]
    pub results: SearchResults,
}

/// Long-lived handles shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub index: Arc<SearchIndex>,
    pub store: Arc<dyn DocumentStore>,
    pub normalizer: Arc<dyn Normalizer>,
}

pub fn build_normalizer(config: &Config) -> Result<Arc<dyn Normalizer>> {
    match config.normalizer {
        NormalizerKind::Local => Ok(Arc::new(LocalNormalizer)),
        NormalizerKind::Openai => {
            let key = config
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY must be set when the openai normalizer is selected")?;
            let n = OpenAiNormalizer::new(
                &config.openai_base_url,
                key,
                config.openai_model.clone(),
                Duration::from_secs(config.normalizer_timeout_secs),
            )?;
            Ok(Arc::new(n))
        }
    }
}

/// Open the store, then open or rebuild the index. Returns only once the
/// index is complete, so nothing is served from a partial replay.
pub async fn init_state(config: &Config) -> Result<AppState> {
    let normalizer = build_normalizer(config)?;
    let store = SledStore::open(&config.store)
        .with_context(|| format!("failed to open document store at {}", config.store.display()))?;
    let (index, report) = open_or_bootstrap(&config.index, config.schema(), &store, normalizer.as_ref())
        .await
        .with_context(|| format!("failed to prepare index at {}", config.index.display()))?;
    if let Some(report) = report {
        tracing::info!(documents = report.documents, "index bootstrap finished");
    }
    Ok(AppState { index: Arc::new(index), store: Arc::new(store), normalizer })
}

pub fn build_app(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/", get(heartbeat_handler))
        .route("/insert", post(insert_handler))
        .route("/search", get(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {e}")))?
}

pub async fn heartbeat_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// normalize -> store -> index. A success response means the document is
/// both durable and searchable.
pub async fn insert_handler(
    State(state): State<AppState>,
    body: Result<Json<InsertRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InsertResponse>), ApiError> {
    let Json(req) = body.map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e.body_text())))?;
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("content must not be empty".into()));
    }

    let normalized = state.normalizer.normalize(&req.content).await.map_err(|e| {
        tracing::warn!(error = %e, "normalization failed");
        ApiError::from(e)
    })?;

    let store = state.store.clone();
    let content = normalized.clone();
    let id = run_blocking(move || Ok(store.insert(&content)?)).await?;

    let index = state.index.clone();
    run_blocking(move || Ok(index.index(id, &normalized)?))
        .await
        .map_err(|e| {
            tracing::error!(doc_id = id, error = ?e, "document stored but not indexed");
            e
        })?;

    tracing::info!(doc_id = id, "document inserted");
    Ok((
        StatusCode::CREATED,
        Json(InsertResponse { id, message: format!("Document inserted with ID: {id}") }),
    ))
}

pub async fn search_handler(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let Query(params) = params.map_err(|e| ApiError::Validation(e.body_text()))?;
    let q = params.q.unwrap_or_default();
    if q.trim().is_empty() {
        return Err(ApiError::Validation("Missing query parameter 'q'".into()));
    }
    let request = SearchRequest {
        query: q.clone(),
        size: params.size.unwrap_or(docsearch_core::index::DEFAULT_PAGE_SIZE),
        from: params.from.unwrap_or(0),
    };
    let index = state.index.clone();
    let results = run_blocking(move || Ok(index.search(&request)?)).await?;
    let took_ms = start.elapsed().as_millis();
    tracing::debug!(query = %q, total_hits = results.total_hits, took_ms = took_ms as u64, "search");
    Ok(Json(SearchResponse { query: q, took_ms, results }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<DocId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let index = state.index.clone();
    let doc = run_blocking(move || Ok(index.document(doc_id)?)).await?;
    match doc {
        Some(doc) => Ok(Json(serde_json::json!({
            "doc_id": doc.doc_id,
            "content": doc.content,
            "length": doc.length,
        }))),
        None => Err(ApiError::NotFound(format!("document {doc_id} is not indexed"))),
    }
}
