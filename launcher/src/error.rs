use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("image reference must not be empty")]
    MissingImageRef,
    #[error("failed to invoke container runtime '{runtime}': {source}")]
    RuntimeSpawn {
        runtime: String,
        source: std::io::Error,
    },
    #[error("container runtime command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("container runtime returned no container id when starting '{image_ref}'")]
    MissingContainerId { image_ref: String },
    #[error("no host port bound to {container_id}:{container_port} (runtime said '{output}')")]
    PortMapping {
        container_id: String,
        container_port: u16,
        output: String,
    },
}

impl LaunchError {
    /// Whether the failure came from the caller's input rather than the runtime.
    pub fn is_configuration(&self) -> bool {
        matches!(self, LaunchError::MissingImageRef)
    }
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("supervisor at {url} did not become ready within {waited:?} ({attempts} attempts)")]
    Timeout {
        url: String,
        waited: Duration,
        attempts: u32,
    },
    #[error("invalid readiness url {url}: {message}")]
    InvalidUrl { url: String, message: String },
}
