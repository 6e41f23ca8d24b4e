use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::export::{self, SortDirection, SortField, SortState};
use crate::pipeline::{AggregationPipeline, PipelineResult, RunOptions};

/// Diagnostics header on `/search`: `HIT` or `MISS`.
pub const CACHE_HEADER: &str = "x-result-cache";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AggregationPipeline>,
}

impl AppState {
    pub fn new(pipeline: AggregationPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search))
        .route("/export.csv", get(export_csv))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default)]
    postcode: String,
    #[serde(default, rename = "type")]
    transaction_type: Option<String>,
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Deserialize)]
struct ExportParams {
    #[serde(default)]
    postcode: String,
    #[serde(default, rename = "type")]
    transaction_type: Option<String>,
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    dir: Option<String>,
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(PipelineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            PipelineError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            // client went away; nobody reads this
            PipelineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

/// The run is cancelled if this future is dropped first (client disconnect).
async fn run_search(
    state: &AppState,
    postcode: &str,
    transaction_type: Option<&str>,
    bypass_cache: bool,
) -> Result<PipelineResult, PipelineError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let opts = RunOptions {
        bypass_cache,
        ..RunOptions::with_cancel(cancel)
    };
    let tt = transaction_type.unwrap_or("Sale");
    state.pipeline.run_query(postcode, tt, opts).await
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let result = run_search(
        &state,
        &params.postcode,
        params.transaction_type.as_deref(),
        params.refresh,
    )
    .await?;
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_HEADER,
        HeaderValue::from_static(if result.from_cache { "HIT" } else { "MISS" }),
    );
    Ok((headers, Json(result)).into_response())
}

async fn export_csv(
    State(state): State<AppState>,
    Query(params): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let mut sort = SortState::default();
    if let Some(field) = params.sort.as_deref() {
        sort.field = field.parse::<SortField>()?;
    }
    if let Some(dir) = params.dir.as_deref() {
        sort.direction = dir.parse::<SortDirection>()?;
    }

    let result = run_search(
        &state,
        &params.postcode,
        params.transaction_type.as_deref(),
        false,
    )
    .await?;
    let mut listings = result.listings;
    sort.apply(&mut listings);

    let body = export::to_csv(&listings);
    let filename = export::export_filename(result.fetched_at.date_naive());
    let disposition = format!("attachment; filename=\"{filename}\"");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/csv; charset=utf-8"),
    );
    if let Ok(v) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    Ok((headers, body).into_response())
}
