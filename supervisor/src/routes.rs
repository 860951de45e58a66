use axum::extract::{Path, State};
use axum::Json;
use run_protocol::{
    HealthResponse, ProcessStatusResponse, RunOutputResponse, StartRunRequest, StartRunResponse,
};

use crate::error::SupervisorError;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.supervisor.health())
}

pub async fn start_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(request): Json<StartRunRequest>,
) -> Result<Json<StartRunResponse>, SupervisorError> {
    state.supervisor.start(&run_id, request).await.map(Json)
}

pub async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<ProcessStatusResponse>, SupervisorError> {
    state.supervisor.status(&run_id).await.map(Json)
}

pub async fn run_output(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunOutputResponse>, SupervisorError> {
    state.supervisor.output(&run_id).await.map(Json)
}
