//! Configuration for the Harbor control plane

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "harbor-runtime")]
#[command(about = "Builds agent images, dispatches runs onto containers and tracks their state")]
pub struct Config {
    /// Address the public HTTP API listens on
    #[arg(long, env = "RUNTIME_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// State directory holding runs.json (defaults to $HOME/.harbor)
    #[arg(long, env = "HARBOR_HOME")]
    pub harbor_home: Option<PathBuf>,

    /// Container CLI used to find, start and build containers
    #[arg(long, env = "CONTAINER_RUNTIME", default_value = "docker")]
    pub container_runtime: String,

    /// Port the supervisor listens on inside each container
    #[arg(long, env = "SUPERVISOR_PORT", default_value_t = run_protocol::SUPERVISOR_PORT)]
    pub supervisor_port: u16,

    /// Host on which mapped container ports are reachable
    #[arg(long, env = "CONTAINER_HOST", default_value = "127.0.0.1")]
    pub container_host: String,

    /// How long to wait for a container's supervisor to become ready
    #[arg(long, env = "READY_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub ready_timeout: Duration,

    /// Delay between readiness probes
    #[arg(long, env = "READY_POLL_INTERVAL", default_value = "1s", value_parser = humantime::parse_duration)]
    pub ready_poll_interval: Duration,

    /// Timeout for each call to a supervisor
    #[arg(long, env = "SUPERVISOR_REQUEST_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
    pub supervisor_request_timeout: Duration,

    /// Directory under which repositories are staged for image builds
    #[arg(long, env = "STAGING_ROOT_DIR")]
    pub staging_root_dir: Option<PathBuf>,

    /// Dockerfile used for agent image builds (defaults to the repository's)
    #[arg(long, env = "AGENT_DOCKERFILE")]
    pub agent_dockerfile: Option<PathBuf>,

    /// Supervisor binary copied into every build context
    #[arg(long, env = "SUPERVISOR_BINARY")]
    pub supervisor_binary: Option<PathBuf>,

    /// Output logs in JSON format
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Config {
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.harbor_home {
            return Ok(dir.clone());
        }
        if let Ok(home) = std::env::var("HOME") {
            return Ok(PathBuf::from(home).join(".harbor"));
        }
        Err(anyhow!(
            "Unable to determine runtime state directory. Set HARBOR_HOME or HOME"
        ))
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        Ok(self.state_dir()?.join("runs.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "RUNTIME_BIND_ADDR",
        "HARBOR_HOME",
        "CONTAINER_RUNTIME",
        "SUPERVISOR_PORT",
        "CONTAINER_HOST",
        "READY_TIMEOUT",
        "READY_POLL_INTERVAL",
        "SUPERVISOR_REQUEST_TIMEOUT",
        "STAGING_ROOT_DIR",
        "AGENT_DOCKERFILE",
        "SUPERVISOR_BINARY",
        "LOG_JSON",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn defaults_match_single_host_deployment() {
        clear_env();
        let config = Config::try_parse_from(["harbor-runtime"]).unwrap();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.container_runtime, "docker");
        assert_eq!(config.supervisor_port, 4000);
        assert_eq!(config.container_host, "127.0.0.1");
        assert_eq!(config.ready_timeout, Duration::from_secs(30));
        assert_eq!(config.ready_poll_interval, Duration::from_secs(1));
        assert_eq!(config.supervisor_request_timeout, Duration::from_secs(10));
        assert!(!config.log_json);
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        clear_env();
        std::env::set_var("HARBOR_HOME", "/srv/harbor");
        std::env::set_var("READY_TIMEOUT", "45s");
        std::env::set_var("READY_POLL_INTERVAL", "250ms");
        std::env::set_var("CONTAINER_RUNTIME", "podman");

        let config = Config::try_parse_from(["harbor-runtime"]).unwrap();
        clear_env();

        assert_eq!(config.ready_timeout, Duration::from_secs(45));
        assert_eq!(config.ready_poll_interval, Duration::from_millis(250));
        assert_eq!(config.container_runtime, "podman");
        assert_eq!(
            config.store_path().unwrap(),
            PathBuf::from("/srv/harbor/runs.json")
        );
    }

    #[test]
    #[serial]
    fn state_dir_falls_back_to_home() {
        clear_env();
        let config = Config::try_parse_from(["harbor-runtime"]).unwrap();
        let home = std::env::var("HOME").unwrap_or_default();
        if !home.is_empty() {
            assert_eq!(
                config.state_dir().unwrap(),
                PathBuf::from(home).join(".harbor")
            );
        }
    }
}
