use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::process::AgentCommand;

#[derive(Debug, Clone, Parser)]
#[command(name = "agent-supervisor")]
#[command(about = "Starts agent workloads inside a Harbor container and reports on them")]
pub struct Config {
    /// Address the supervisor HTTP service listens on
    #[arg(long, env = "SUPERVISOR_BIND_ADDR", default_value = "0.0.0.0:4000")]
    pub bind_addr: SocketAddr,

    /// Directory holding one sub-directory per run
    #[arg(long, env = "SUPERVISOR_RUNS_ROOT", default_value = "/var/lib/agent-supervisor/runs")]
    pub runs_root: PathBuf,

    /// Command line of the agent workload, run through the shell
    #[arg(long, env = "SUPERVISOR_AGENT_COMMAND", default_value = "python main.py")]
    pub agent_command: String,

    /// Working directory for the workload (defaults to the supervisor's)
    #[arg(long, env = "SUPERVISOR_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Shell used to interpret the agent command
    #[arg(long, env = "SUPERVISOR_SHELL", default_value = "/bin/sh")]
    pub shell: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Config {
    pub fn agent_command(&self) -> AgentCommand {
        AgentCommand {
            shell: self.shell.clone(),
            command_line: self.agent_command.clone(),
            workdir: self.workdir.clone(),
        }
    }
}
