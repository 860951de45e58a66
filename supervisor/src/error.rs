use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use run_protocol::{ErrorBody, RunIdError};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    InvalidRunId(#[from] RunIdError),
    #[error("run '{run_id}' not found")]
    RunNotFound { run_id: String },
    #[error("no process record for run '{run_id}'")]
    ProcessRecordMissing { run_id: String },
    #[error("run '{run_id}' has already been started")]
    AlreadyStarted { run_id: String },
    #[error("failed to spawn workload for run '{run_id}': {source}")]
    Spawn {
        run_id: String,
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    #[error("corrupt process record at {}: {message}", path.display())]
    CorruptRecord { path: PathBuf, message: String },
}

impl SupervisorError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SupervisorError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SupervisorError::InvalidRunId(_) => StatusCode::BAD_REQUEST,
            SupervisorError::RunNotFound { .. } | SupervisorError::ProcessRecordMissing { .. } => {
                StatusCode::NOT_FOUND
            }
            SupervisorError::AlreadyStarted { .. } => StatusCode::CONFLICT,
            SupervisorError::Spawn { .. }
            | SupervisorError::Io { .. }
            | SupervisorError::CorruptRecord { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SupervisorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "supervisor request failed");
        }
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}
