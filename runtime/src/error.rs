use axum::http::StatusCode;
use container_launcher::{LaunchError, ReadinessError};
use run_protocol::{RunIdError, RunStatus};
use thiserror::Error;

use crate::builder::BuildError;
use crate::supervisor_client::SupervisorCallError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    InvalidRunId(#[from] RunIdError),
    #[error("run '{run_id}' not found")]
    RunNotFound { run_id: String },
    #[error("no image found for agent '{agent_id}'")]
    ImageNotFound { agent_id: String },
    #[error("agent '{agent_id}' has no successfully built image")]
    NoBuiltImage { agent_id: String },
    #[error("inputs not declared by the agent: {}", keys.join(", "))]
    UndeclaredInputs { keys: Vec<String> },
    #[error("declared inputs missing from the request: {}", keys.join(", "))]
    MissingInputs { keys: Vec<String> },
    #[error("run '{run_id}' is {status}; only PENDING runs can be dispatched")]
    RunNotPending { run_id: String, status: RunStatus },
    #[error("no running container for image '{image_ref}'")]
    ContainerUnavailable { image_ref: String },
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorCallError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("persistence failure: {0:#}")]
    Store(anyhow::Error),
}

impl RuntimeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RuntimeError::InvalidRunId(_)
            | RuntimeError::NoBuiltImage { .. }
            | RuntimeError::UndeclaredInputs { .. }
            | RuntimeError::MissingInputs { .. } => StatusCode::BAD_REQUEST,
            RuntimeError::RunNotFound { .. } | RuntimeError::ImageNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            RuntimeError::RunNotPending { .. } => StatusCode::CONFLICT,
            RuntimeError::ContainerUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RuntimeError::Launch(err) if err.is_configuration() => StatusCode::BAD_REQUEST,
            RuntimeError::Launch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RuntimeError::Readiness(ReadinessError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            RuntimeError::Readiness(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RuntimeError::Supervisor(SupervisorCallError::NotFound { .. }) => StatusCode::NOT_FOUND,
            RuntimeError::Supervisor(_) => StatusCode::BAD_GATEWAY,
            RuntimeError::Build(err) if err.is_configuration() => StatusCode::BAD_REQUEST,
            RuntimeError::Build(_) | RuntimeError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
