//! Agent supervisor: the HTTP service that runs inside every agent container.
//!
//! The control plane asks it to start a workload for a run, then polls for
//! the workload's status and collected output. Everything about a run lives
//! in `<runs_root>/<run_id>/`, see [`RunLayout`].

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod layout;
pub mod process;
mod routes;

pub use config::Config;
pub use error::SupervisorError;
pub use layout::RunLayout;
pub use process::{AgentCommand, ExitRecord, ProcessSupervisor};

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<ProcessSupervisor>,
}

impl AppState {
    pub fn new(supervisor: ProcessSupervisor) -> Self {
        Self {
            supervisor: Arc::new(supervisor),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/run/:run_id/start", post(routes::start_run))
        .route("/run/:run_id/status", get(routes::run_status))
        .route("/run/:run_id/output", get(routes::run_output))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
