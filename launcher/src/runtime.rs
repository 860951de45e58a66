use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::LaunchError;

/// Label attached to every container this crate starts. Lookups filter on it
/// so a container stays attributed to its image ref after the tag moves.
pub const IMAGE_LABEL: &str = "harbor.image";

/// The subset of a container runtime the launcher relies on.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ids of running containers created from `image_ref`, newest first.
    async fn find_running(&self, image_ref: &str) -> Result<Vec<String>, LaunchError>;

    /// Start a detached container from `image_ref`, publishing
    /// `container_port` on an ephemeral host port. Returns the container id.
    async fn run_detached(&self, image_ref: &str, container_port: u16)
        -> Result<String, LaunchError>;

    /// Host port published for `container_port` on `container_id`.
    async fn host_port(&self, container_id: &str, container_port: u16)
        -> Result<u16, LaunchError>;
}

/// Drives a docker-compatible CLI (`docker`, `podman`, ...).
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn invoke(&self, args: &[String]) -> Result<String, LaunchError> {
        let command_line = format!("{} {}", self.binary, args.join(" "));
        debug!(command = %command_line, "invoking container runtime");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| LaunchError::RuntimeSpawn {
                runtime: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(LaunchError::CommandFailed {
                command: command_line,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn find_running(&self, image_ref: &str) -> Result<Vec<String>, LaunchError> {
        let stdout = self.invoke(&ps_args(image_ref)).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn run_detached(
        &self,
        image_ref: &str,
        container_port: u16,
    ) -> Result<String, LaunchError> {
        let stdout = self.invoke(&run_args(image_ref, container_port)).await?;
        stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| LaunchError::MissingContainerId {
                image_ref: image_ref.to_string(),
            })
    }

    async fn host_port(&self, container_id: &str, container_port: u16) -> Result<u16, LaunchError> {
        let stdout = self
            .invoke(&port_args(container_id, container_port))
            .await?;
        parse_host_port(&stdout).ok_or_else(|| LaunchError::PortMapping {
            container_id: container_id.to_string(),
            container_port,
            output: stdout.trim().to_string(),
        })
    }
}

fn ps_args(image_ref: &str) -> Vec<String> {
    vec![
        "ps".to_string(),
        "--filter".to_string(),
        format!("label={}={}", IMAGE_LABEL, image_ref),
        "--filter".to_string(),
        "status=running".to_string(),
        "--format".to_string(),
        "{{.ID}}".to_string(),
    ]
}

fn run_args(image_ref: &str, container_port: u16) -> Vec<String> {
    vec![
        "run".to_string(),
        "-d".to_string(),
        "--label".to_string(),
        format!("{}={}", IMAGE_LABEL, image_ref),
        "-p".to_string(),
        format!(":{}", container_port),
        image_ref.to_string(),
    ]
}

fn port_args(container_id: &str, container_port: u16) -> Vec<String> {
    vec![
        "port".to_string(),
        container_id.to_string(),
        container_port.to_string(),
    ]
}

/// Parses `docker port` output such as `0.0.0.0:49153` or `[::]:49153`.
fn parse_host_port(output: &str) -> Option<u16> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find_map(|line| {
            line.rsplit_once(':')
                .and_then(|(_, port)| port.trim().parse::<u16>().ok())
        })
}
