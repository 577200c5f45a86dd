//! HTTP surface of the background sync service.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use serde::Deserialize;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::app::merge::SyncContext;
use crate::app::model::JobRecord;
use crate::error::SyncError;
use crate::model::CatalogEntry;
use crate::provider::ProviderRegistry;
use crate::repair::{RepairReport, repair};

#[derive(Clone)]
pub struct AppState {
    pub ctx: SyncContext,
    pub registry: Arc<ProviderRegistry>,
    pub image_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    let images = ServeDir::new(&state.image_dir);
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/scrapper/manga", post(scrape_manga))
        .route("/api/scrapper/queue", get(list_queue).delete(clear_failed_jobs))
        .route("/api/scrapper/queue/:job_id", delete(remove_job))
        .route("/api/scrapper/repair", post(run_repair))
        .nest_service("/images", images)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    provider: String,
    url: String,
    #[serde(default = "default_scrape_chapters")]
    scrape_chapters: bool,
}

fn default_scrape_chapters() -> bool {
    true
}

struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::Conflict(_) => StatusCode::CONFLICT,
            SyncError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            SyncError::Config(_) => StatusCode::BAD_REQUEST,
            SyncError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Decode(_) | SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

async fn scrape_manga(
    State(state): State<AppState>,
    Json(request): Json<ScrapeRequest>,
) -> Result<Json<CatalogEntry>, ApiError> {
    let provider = state.registry.get(request.provider.trim())?;
    let outcome = state
        .ctx
        .for_provider(provider)
        .merge(&request.url, request.scrape_chapters)
        .await?;
    Ok(Json(outcome.entry))
}

async fn list_queue(State(state): State<AppState>) -> Json<Vec<JobRecord>> {
    Json(state.ctx.queue.list_jobs())
}

async fn clear_failed_jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let removed = state.ctx.queue.clear_failed();
    Json(serde_json::json!({ "removed": removed }))
}

async fn remove_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> StatusCode {
    match state.ctx.queue.remove(job_id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

async fn run_repair(State(state): State<AppState>) -> Result<Json<RepairReport>, ApiError> {
    let report = repair(state.ctx.store.as_ref(), &state.image_dir).await?;
    Ok(Json(report))
}
