use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use run_protocol::validate_run_id;
use serde::Deserialize;
use tempfile::TempDir;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Manifest every agent repository carries at its root.
pub const AGENT_MANIFEST: &str = "agent.yaml";
/// File name of the supervisor binary inside the build context.
pub const SUPERVISOR_BINARY_NAME: &str = "agent-supervisor";

const STAGING_PREFIX: &str = "repo_staging_";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("repository URL must not be empty")]
    MissingRepoUrl,
    #[error("agent id '{agent_id}' cannot be used in an image name")]
    InvalidAgentId { agent_id: String },
    #[error("repository {repo_url} has no {}", AGENT_MANIFEST)]
    MissingAgentConfig { repo_url: String },
    #[error("invalid {}: {message}", AGENT_MANIFEST)]
    InvalidAgentConfig { message: String },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BuildError::MissingRepoUrl
                | BuildError::InvalidAgentId { .. }
                | BuildError::MissingAgentConfig { .. }
                | BuildError::InvalidAgentConfig { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub image_ref: String,
    pub declared_inputs: Vec<String>,
}

/// Turns an agent repository into a runnable image.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, repo_url: &str, agent_id: &str) -> Result<BuiltImage, BuildError>;
}

#[derive(Debug, Default, Deserialize)]
struct AgentManifest {
    #[serde(default)]
    inputs: Vec<String>,
}

/// Clones the repository with git and builds it with the container CLI.
#[derive(Debug, Clone)]
pub struct DockerImageBuilder {
    runtime_binary: String,
    git_binary: String,
    staging_root: Option<PathBuf>,
    dockerfile: Option<PathBuf>,
    supervisor_binary: Option<PathBuf>,
}

impl DockerImageBuilder {
    pub fn new(runtime_binary: impl Into<String>) -> Self {
        Self {
            runtime_binary: runtime_binary.into(),
            git_binary: "git".to_string(),
            staging_root: None,
            dockerfile: None,
            supervisor_binary: None,
        }
    }

    pub fn with_git_binary(mut self, git_binary: impl Into<String>) -> Self {
        self.git_binary = git_binary.into();
        self
    }

    pub fn with_staging_root(mut self, root: Option<PathBuf>) -> Self {
        self.staging_root = root;
        self
    }

    /// Dockerfile used for every build. Defaults to the repository's own.
    pub fn with_dockerfile(mut self, dockerfile: Option<PathBuf>) -> Self {
        self.dockerfile = dockerfile;
        self
    }

    pub fn with_supervisor_binary(mut self, binary: Option<PathBuf>) -> Self {
        self.supervisor_binary = binary;
        self
    }

    fn staging_dir(&self) -> Result<TempDir, BuildError> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix(STAGING_PREFIX);
            builder
        };
        let dir = match &self.staging_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|source| BuildError::Io {
                    context: format!("failed to create staging root {}", root.display()),
                    source,
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|source| BuildError::Io {
            context: "failed to create staging directory".to_string(),
            source,
        })
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build(&self, repo_url: &str, agent_id: &str) -> Result<BuiltImage, BuildError> {
        let repo_url = repo_url.trim();
        if repo_url.is_empty() {
            return Err(BuildError::MissingRepoUrl);
        }
        let image_ref = image_ref_for(agent_id)?;

        let staging = self.staging_dir()?;
        let context = staging.path();
        info!(%repo_url, agent = %agent_id, staging = %context.display(), "cloning agent repository");
        run(&self.git_binary, clone_args(repo_url, context)).await?;

        let declared_inputs = read_declared_inputs(context, repo_url)?;

        if let Some(binary) = &self.supervisor_binary {
            let target = context.join(SUPERVISOR_BINARY_NAME);
            tokio::fs::copy(binary, &target)
                .await
                .map_err(|source| BuildError::Io {
                    context: format!("failed to copy supervisor binary {}", binary.display()),
                    source,
                })?;
        }

        let dockerfile = self
            .dockerfile
            .clone()
            .unwrap_or_else(|| context.join("Dockerfile"));
        run(
            &self.runtime_binary,
            build_args(&image_ref, &dockerfile, context),
        )
        .await?;

        info!(image = %image_ref, inputs = ?declared_inputs, "agent image built");
        Ok(BuiltImage {
            image_ref,
            declared_inputs,
        })
    }
}

/// Image name for an agent: `agent_image_<agent_id>`, lower-cased.
pub fn image_ref_for(agent_id: &str) -> Result<String, BuildError> {
    if validate_run_id(agent_id).is_err() {
        return Err(BuildError::InvalidAgentId {
            agent_id: agent_id.to_string(),
        });
    }
    Ok(format!("agent_image_{}", agent_id.to_ascii_lowercase()))
}

/// Input keys declared in the repository's manifest, in declaration order.
pub fn read_declared_inputs(repo_dir: &Path, repo_url: &str) -> Result<Vec<String>, BuildError> {
    let path = repo_dir.join(AGENT_MANIFEST);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(BuildError::MissingAgentConfig {
                repo_url: repo_url.to_string(),
            })
        }
        Err(source) => {
            return Err(BuildError::Io {
                context: format!("failed to read {}", path.display()),
                source,
            })
        }
    };

    let manifest: AgentManifest = if raw.trim().is_empty() {
        AgentManifest::default()
    } else {
        serde_yaml::from_str(&raw).map_err(|err| BuildError::InvalidAgentConfig {
            message: err.to_string(),
        })?
    };

    let mut inputs: Vec<String> = Vec::with_capacity(manifest.inputs.len());
    for key in manifest.inputs {
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(BuildError::InvalidAgentConfig {
                message: "input names must not be empty".to_string(),
            });
        }
        if !inputs.contains(&key) {
            inputs.push(key);
        }
    }
    Ok(inputs)
}

fn clone_args(repo_url: &str, dest: &Path) -> Vec<OsString> {
    vec![
        "clone".into(),
        "--depth".into(),
        "1".into(),
        repo_url.into(),
        dest.as_os_str().to_owned(),
    ]
}

fn build_args(image_ref: &str, dockerfile: &Path, context: &Path) -> Vec<OsString> {
    vec![
        "build".into(),
        "-t".into(),
        image_ref.into(),
        "-f".into(),
        dockerfile.as_os_str().to_owned(),
        context.as_os_str().to_owned(),
    ]
}

async fn run(program: &str, args: Vec<OsString>) -> Result<(), BuildError> {
    let command_line = format!(
        "{} {}",
        program,
        args.iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );
    debug!(command = %command_line, "running build step");

    let output = Command::new(program)
        .args(&args)
        .output()
        .await
        .map_err(|source| BuildError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(BuildError::CommandFailed {
            command: command_line,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_ref_is_derived_from_agent_id() {
        assert_eq!(image_ref_for("Agent-7").unwrap(), "agent_image_agent-7");
        assert!(matches!(
            image_ref_for("../x"),
            Err(BuildError::InvalidAgentId { .. })
        ));
    }

    #[test]
    fn build_args_tag_image_and_point_at_context() {
        let args = build_args(
            "agent_image_1",
            Path::new("/ctx/Dockerfile"),
            Path::new("/ctx"),
        );
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["build", "-t", "agent_image_1", "-f", "/ctx/Dockerfile", "/ctx"]
        );
    }

    #[test]
    fn clone_args_clone_shallow_into_destination() {
        let args = clone_args("https://example.com/agent.git", Path::new("/stage"));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec!["clone", "--depth", "1", "https://example.com/agent.git", "/stage"]
        );
    }

    #[test]
    fn manifest_inputs_are_read_in_order_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(AGENT_MANIFEST),
            "name: researcher\ninputs:\n  - topic\n  - depth\n  - topic\n",
        )
        .unwrap();

        let inputs = read_declared_inputs(dir.path(), "repo").unwrap();
        assert_eq!(inputs, vec!["topic".to_string(), "depth".to_string()]);
    }

    #[test]
    fn missing_manifest_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_declared_inputs(dir.path(), "https://example.com/a.git").unwrap_err();
        assert!(matches!(err, BuildError::MissingAgentConfig { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn manifest_without_inputs_declares_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(AGENT_MANIFEST), "name: quiet\n").unwrap();
        assert!(read_declared_inputs(dir.path(), "repo").unwrap().is_empty());
    }

    #[test]
    fn malformed_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(AGENT_MANIFEST), "inputs: {not: [a list").unwrap();
        assert!(matches!(
            read_declared_inputs(dir.path(), "repo"),
            Err(BuildError::InvalidAgentConfig { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn build_clones_reads_manifest_and_invokes_runtime() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("docker.log");
        let git = dir.path().join("fake-git");
        std::fs::write(
            &git,
            "#!/bin/sh\nprintf 'inputs:\\n  - topic\\n' > \"$5/agent.yaml\"\n",
        )
        .unwrap();
        let docker = dir.path().join("fake-docker");
        std::fs::write(
            &docker,
            format!(
                "#!/bin/sh\necho \"$@\" > {}\ntest -f \"$6/{}\"\n",
                log.display(),
                SUPERVISOR_BINARY_NAME
            ),
        )
        .unwrap();
        let supervisor = dir.path().join("supervisor-bin");
        std::fs::write(&supervisor, "binary").unwrap();
        for script in [&git, &docker] {
            std::fs::set_permissions(script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let builder = DockerImageBuilder::new(docker.to_string_lossy())
            .with_git_binary(git.to_string_lossy())
            .with_staging_root(Some(dir.path().join("staging")))
            .with_supervisor_binary(Some(supervisor));

        let built = builder
            .build("https://example.com/agent.git", "a1")
            .await
            .unwrap();

        assert_eq!(built.image_ref, "agent_image_a1");
        assert_eq!(built.declared_inputs, vec!["topic".to_string()]);
        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.starts_with("build -t agent_image_a1 -f "));
        assert!(logged.contains("repo_staging_"));
    }
}
