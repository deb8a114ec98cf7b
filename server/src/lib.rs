use anyhow::{Context, Result};
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use titledex_core::{Error, Index, IndexStore, MediaId, SledStore};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    /// Stem the query as English; set to false for other languages.
    #[serde(default = "default_stem")]
    pub stem: bool,
    #[serde(default = "default_limit")]
    pub limit: usize,
}
fn default_stem() -> bool { true }
fn default_limit() -> usize { 50 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub stems: Vec<String>,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<String>,
}

#[derive(Serialize)]
pub struct MediaResponse {
    pub media_id: MediaId,
    pub external_id: String,
}

#[derive(Serialize)]
pub struct StemResponse {
    pub stem: String,
    pub media_ids: Vec<MediaId>,
}

type ApiError = (StatusCode, String);

pub struct AppState<S> {
    pub index: Arc<Index<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self { index: Arc::clone(&self.index) }
    }
}

/// Open the store at `db_dir` and serve it. The store stays locked while the
/// server runs, so ingestion must happen beforehand.
pub fn build_app(db_dir: &str) -> Result<Router> {
    let store = SledStore::open(db_dir).with_context(|| format!("opening index store at {db_dir}"))?;
    Ok(router(Arc::new(Index::new(store))))
}

pub fn router<S: IndexStore + 'static>(index: Arc<Index<S>>) -> Router {
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
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler::<S>))
        .route("/media/:media_id", get(media_handler::<S>))
        .route("/stem/:stem", get(stem_handler::<S>))
        .with_state(AppState { index })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn internal(err: Error) -> ApiError {
    tracing::error!(error = %err, "index lookup failed");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

pub async fn search_handler<S: IndexStore>(
    State(state): State<AppState<S>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let start = std::time::Instant::now();
    let query = match state.index.parse_query(&params.q, params.stem) {
        Ok(query) => query,
        // Nothing searchable: an empty answer rather than every title.
        Err(Error::EmptyQuery(_)) => {
            let elapsed = start.elapsed();
            return Ok(Json(SearchResponse { query: params.q, stems: vec![], took_s: elapsed.as_secs_f64(), total_hits: 0, results: vec![] }));
        }
        Err(e) => return Err(internal(e)),
    };

    let mut results = state.index.search(&query).map_err(internal)?;
    let total_hits = results.len();
    results.truncate(params.limit.max(1).min(1000));

    let elapsed = start.elapsed();
    Ok(Json(SearchResponse { query: query.text, stems: query.stems, took_s: elapsed.as_secs_f64(), total_hits, results }))
}

pub async fn media_handler<S: IndexStore>(
    State(state): State<AppState<S>>,
    Path(media_id): Path<MediaId>,
) -> Result<Json<MediaResponse>, ApiError> {
    match state.index.query_media(media_id).map_err(internal)? {
        Some(external_id) => Ok(Json(MediaResponse { media_id, external_id })),
        None => Err((StatusCode::NOT_FOUND, format!("media {media_id} not found"))),
    }
}

pub async fn stem_handler<S: IndexStore>(
    State(state): State<AppState<S>>,
    Path(stem): Path<String>,
) -> Result<Json<StemResponse>, ApiError> {
    match state.index.query_stem(&stem) {
        Ok(media_ids) => Ok(Json(StemResponse { stem, media_ids })),
        Err(Error::ReservedStem(_)) => Err((StatusCode::BAD_REQUEST, format!("{stem:?} is not a valid stem"))),
        Err(e) => Err(internal(e)),
    }
}
