//! Public HTTP API of the control plane

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use run_protocol::HealthResponse;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::RuntimeError;
use crate::models::{
    BuildImageRequest, ImageRecord, RunOutputView, RunRecord, RunStatusResponse, SubmitRunRequest,
};
use crate::AppState;

/// Error response wrapper: a status code plus a message rendered as
/// `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    pub status_code: StatusCode,
    pub message: String,
}

impl From<RuntimeError> for ApiError {
    fn from(err: RuntimeError) -> Self {
        let status_code = err.status_code();
        if status_code.is_server_error() {
            error!(status = status_code.as_u16(), error = %err, "request failed");
        } else {
            warn!(status = status_code.as_u16(), error = %err, "request rejected");
        }
        ApiError {
            status_code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/agents/:agent_id/images", post(build_image))
        .route("/api/agents/:agent_id/images/latest", get(latest_image))
        .route("/api/agents/:agent_id/runs", post(submit_run))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/runs/:run_id/status", get(get_run_status))
        .route("/api/runs/:run_id/output", get(get_run_output))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

async fn build_image(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<BuildImageRequest>,
) -> ApiResult<(StatusCode, Json<ImageRecord>)> {
    let record = state
        .images
        .build_image(&agent_id, &request.repo_url)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn latest_image(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<ImageRecord>> {
    Ok(Json(state.images.latest_image(&agent_id).await?))
}

async fn submit_run(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<SubmitRunRequest>,
) -> ApiResult<(StatusCode, Json<RunStatusResponse>)> {
    let outcome = state
        .dispatcher
        .submit_run(&agent_id, request.envs, request.inputs)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RunStatusResponse {
            run_id: outcome.run_id,
            status: outcome.status,
        }),
    ))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunRecord>> {
    Ok(Json(state.reconciler.get_run(&run_id).await?))
}

async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunStatusResponse>> {
    Ok(Json(state.reconciler.get_status(&run_id).await?))
}

async fn get_run_output(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunOutputView>> {
    Ok(Json(state.reconciler.get_output(&run_id).await?))
}
