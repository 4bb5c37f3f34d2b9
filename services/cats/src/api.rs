use crate::cat::{Cat, CatId};
use crate::cat_store::{CatQuery, CatStore};
use crate::config::ApiConfig;
use crate::litter::LitterLoader;
use crate::pipeline::{SubmitError, UploadPipeline};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Number of cats returned by `/cats/topcats`
const TOP_CATS: i64 = 3;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatStore>,
    pub pipeline: Arc<UploadPipeline>,
    pub litter: Arc<LitterLoader>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Stored id of a cat rejected as not safe for work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
            id: None,
        }),
    )
}

fn store_error(e: impl std::fmt::Display, action: &str) -> ApiError {
    error!(error = %e, "Failed to {action}");
    api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Failed to {action}"),
        "STORE_ERROR",
    )
}

fn body_rejection(rejection: JsonRejection) -> ApiError {
    let status = rejection.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return api_error(status, rejection.body_text(), "PAYLOAD_TOO_LARGE");
    }
    api_error(StatusCode::BAD_REQUEST, rejection.body_text(), "INVALID_BODY")
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid cat id: {id}"),
            "INVALID_ID",
        )
    })
}

/// Query parameters sent by the DataTables widget
#[derive(Debug, Deserialize)]
pub struct DataTableQuery {
    #[serde(default = "default_draw")]
    pub draw: i64,
    #[serde(default)]
    pub start: i64,
    #[serde(default = "default_length")]
    pub length: i64,
    #[serde(rename = "search[value]")]
    pub search_value: Option<String>,
}

fn default_draw() -> i64 {
    1
}

fn default_length() -> i64 {
    10
}

/// DataTables server-side response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTable {
    pub draw: i64,
    pub records_total: u64,
    pub records_filtered: u64,
    pub data: Vec<Cat>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/cats",
            get(list_safe_cats)
                .post(create_or_update)
                .layer(DefaultBodyLimit::max(config.max_body_bytes)),
        )
        .route("/cats/ids", get(list_ids))
        .route("/cats/topcats", get(top_cats))
        .route("/cats/count", get(count_cats))
        .route("/cats/datatable", get(datatable))
        .route("/cats/loadlitter", get(load_litter))
        .route("/cats/kittykiller", axum::routing::delete(delete_all))
        .route("/cats/:id", get(get_cat).delete(delete_cat))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cat-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// All cats classified safe for work
#[instrument(skip(state))]
async fn list_safe_cats(State(state): State<AppState>) -> Result<Json<Vec<Cat>>, ApiError> {
    state
        .store
        .find_all(&CatQuery::safe())
        .await
        .map(Json)
        .map_err(|e| store_error(e, "list cats"))
}

/// Ids of every cat, without images
#[instrument(skip(state))]
async fn list_ids(State(state): State<AppState>) -> Result<Json<Vec<CatId>>, ApiError> {
    let ids = state
        .store
        .find_ids()
        .await
        .map_err(|e| store_error(e, "list cat ids"))?;

    Ok(Json(ids.into_iter().map(|id| CatId { id }).collect()))
}

/// Top cats by count descending
#[instrument(skip(state))]
async fn top_cats(State(state): State<AppState>) -> Result<Json<Vec<Cat>>, ApiError> {
    state
        .store
        .find_all(&CatQuery::top(TOP_CATS))
        .await
        .map(Json)
        .map_err(|e| store_error(e, "query top cats"))
}

/// Get a single cat
#[instrument(skip(state))]
async fn get_cat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Cat>, ApiError> {
    let id = parse_id(&id)?;

    let cat = state
        .store
        .find_by_id(id)
        .await
        .map_err(|e| store_error(e, "get cat"))?;

    cat.map(Json).ok_or_else(|| {
        api_error(StatusCode::NOT_FOUND, "Cat not found", "NOT_FOUND")
    })
}

/// Create or update a cat through the upload pipeline
#[instrument(skip(state, payload))]
async fn create_or_update(
    State(state): State<AppState>,
    payload: Result<Json<Cat>, JsonRejection>,
) -> Result<(StatusCode, Json<Uuid>), ApiError> {
    let Json(cat) = payload.map_err(body_rejection)?;

    match state.pipeline.submit(cat).await {
        Ok(id) => Ok((StatusCode::CREATED, Json(id))),
        Err(SubmitError::BadImage(e)) => Err(api_error(
            StatusCode::BAD_REQUEST,
            e.to_string(),
            "BAD_IMAGE",
        )),
        Err(SubmitError::Unsafe { id }) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Cat is not safe for work".to_string(),
                code: "NOT_SAFE_FOR_WORK".to_string(),
                id: Some(id),
            }),
        )),
        Err(SubmitError::Persistence(e)) => Err(store_error(e, "store cat")),
    }
}

/// Delete a cat
#[instrument(skip(state))]
async fn delete_cat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<bool>, ApiError> {
    let id = parse_id(&id)?;

    let deleted = state
        .store
        .delete_by_id(id)
        .await
        .map_err(|e| store_error(e, "delete cat"))?;

    if deleted {
        info!(cat_id = %id, "Cat deleted");
        Ok(Json(true))
    } else {
        Err(api_error(StatusCode::NOT_FOUND, "Cat not found", "NOT_FOUND"))
    }
}

/// Count all cats
#[instrument(skip(state))]
async fn count_cats(State(state): State<AppState>) -> Result<Json<u64>, ApiError> {
    state
        .store
        .count(&CatQuery::default())
        .await
        .map(Json)
        .map_err(|e| store_error(e, "count cats"))
}

/// Delete every cat
#[instrument(skip(state))]
async fn delete_all(State(state): State<AppState>) -> Result<Json<u64>, ApiError> {
    let removed = state
        .store
        .delete_all()
        .await
        .map_err(|e| store_error(e, "delete cats"))?;

    info!(removed, "All cats deleted");
    Ok(Json(removed))
}

/// Page of cats for the DataTables widget
#[instrument(skip(state))]
async fn datatable(
    State(state): State<AppState>,
    Query(params): Query<DataTableQuery>,
) -> Result<Json<DataTable>, ApiError> {
    // A search value that is a cat id filters to that cat; anything else is ignored
    let filter = CatQuery {
        id: params
            .search_value
            .as_deref()
            .and_then(|s| Uuid::parse_str(s.trim()).ok()),
        ..Default::default()
    };

    // Non-positive lengths (DataTables sends -1 for "all") disable paging
    let query = if params.length > 0 {
        filter.clone().page(params.start.max(0) / params.length, params.length)
    } else {
        filter.clone()
    };

    let data = state
        .store
        .find_all(&query)
        .await
        .map_err(|e| store_error(e, "query cats"))?;
    let records_filtered = state
        .store
        .count(&filter)
        .await
        .map_err(|e| store_error(e, "count cats"))?;
    let records_total = state
        .store
        .count(&CatQuery::default())
        .await
        .map_err(|e| store_error(e, "count cats"))?;

    Ok(Json(DataTable {
        draw: params.draw,
        records_total,
        records_filtered,
        data,
    }))
}

/// Load the bundled litter if the store is empty
#[instrument(skip(state))]
async fn load_litter(State(state): State<AppState>) -> Result<Json<usize>, ApiError> {
    state
        .litter
        .load_if_empty()
        .await
        .map(Json)
        .map_err(|e| store_error(e, "load litter"))
}

/// Start the cats API server, returning when `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting cats API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
