//! # Run Protocol
//!
//! Types exchanged between the Harbor control plane and the supervisor that
//! runs inside every agent container. The control plane addresses runs by
//! their logical identifier; the supervisor owns the OS process behind each
//! run. Both sides agree on the shapes defined here and on nothing else.
//!
//! ```rust
//! use run_protocol::{start_path, StartRunRequest, validate_run_id};
//!
//! validate_run_id("r1").expect("valid run id");
//! assert_eq!(start_path("r1"), "/run/r1/start");
//!
//! let request = StartRunRequest::default()
//!     .with_env("K", "V")
//!     .with_input("topic", "x");
//! assert_eq!(request.inputs["topic"], "x");
//! ```

pub mod messages;
pub mod run_id;
pub mod status;

pub use messages::*;
pub use run_id::{validate_run_id, RunIdError};
pub use status::{ProcessStatus, RunStatus};

/// Port the supervisor listens on inside the container.
pub const SUPERVISOR_PORT: u16 = 4000;

pub fn health_path() -> &'static str {
    "/health"
}

pub fn start_path(run_id: &str) -> String {
    format!("/run/{}/start", run_id)
}

pub fn status_path(run_id: &str) -> String {
    format!("/run/{}/status", run_id)
}

pub fn output_path(run_id: &str) -> String {
    format!("/run/{}/output", run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_helpers_embed_run_id() {
        assert_eq!(health_path(), "/health");
        assert_eq!(start_path("abc"), "/run/abc/start");
        assert_eq!(status_path("abc"), "/run/abc/status");
        assert_eq!(output_path("abc"), "/run/abc/output");
    }
}
