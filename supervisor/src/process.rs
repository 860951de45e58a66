use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use run_protocol::{
    validate_run_id, HealthResponse, ProcessStatus, ProcessStatusResponse, RunOutputResponse,
    StartRunRequest, StartRunResponse,
};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::error::SupervisorError;
use crate::layout::RunLayout;

/// How the supervisor launches the agent workload: `<shell> -c <command_line>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub shell: String,
    pub command_line: String,
    pub workdir: Option<PathBuf>,
}

impl AgentCommand {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            command_line: command_line.into(),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

/// Written by the reaper once the workload has been waited on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub finished_at: DateTime<Utc>,
}

impl ExitRecord {
    fn from_status(status: &ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: exit_signal(status),
            finished_at: Utc::now(),
        }
    }

    pub fn process_status(&self) -> ProcessStatus {
        if self.code == Some(0) {
            ProcessStatus::Done
        } else {
            ProcessStatus::Failed
        }
    }

    fn to_response(&self) -> ProcessStatusResponse {
        ProcessStatusResponse {
            status: self.process_status(),
            exit_code: self.code,
            signal: self.signal,
        }
    }
}

/// Spawns agent workloads and answers questions about them from the run
/// directories under `runs_root`.
pub struct ProcessSupervisor {
    runs_root: PathBuf,
    command: AgentCommand,
    // Serializes the exists-check and spawn for start requests.
    start_lock: tokio::sync::Mutex<()>,
    // Runs whose reaper has not yet persisted an exit record.
    reaping: Arc<Mutex<HashSet<String>>>,
}

impl ProcessSupervisor {
    /// Creates `runs_root` if it is missing.
    pub fn new(
        runs_root: impl Into<PathBuf>,
        command: AgentCommand,
    ) -> Result<Self, SupervisorError> {
        let runs_root = runs_root.into();
        std::fs::create_dir_all(&runs_root).map_err(|source| {
            SupervisorError::io(
                format!("failed to create runs root {}", runs_root.display()),
                source,
            )
        })?;
        Ok(Self {
            runs_root,
            command,
            start_lock: tokio::sync::Mutex::new(()),
            reaping: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub fn runs_root(&self) -> &Path {
        &self.runs_root
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse::healthy()
    }

    pub async fn start(
        &self,
        run_id: &str,
        request: StartRunRequest,
    ) -> Result<StartRunResponse, SupervisorError> {
        validate_run_id(run_id)?;
        let layout = RunLayout::new(&self.runs_root, run_id);

        let _guard = self.start_lock.lock().await;
        if path_exists(&layout.pid_path()).await? {
            return Err(SupervisorError::AlreadyStarted {
                run_id: run_id.to_string(),
            });
        }

        tokio::fs::create_dir_all(layout.dir())
            .await
            .map_err(|source| {
                SupervisorError::io(
                    format!("failed to create run directory {}", layout.dir().display()),
                    source,
                )
            })?;

        let inputs = serde_json::to_vec_pretty(&request.inputs).map_err(|err| {
            SupervisorError::io(
                "failed to encode run inputs",
                std::io::Error::new(ErrorKind::InvalidData, err),
            )
        })?;
        write_atomic(&layout.inputs_path(), &inputs).await?;

        let child = self.spawn_workload(run_id, &layout, &request)?;
        let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
            run_id: run_id.to_string(),
            source: std::io::Error::new(ErrorKind::Other, "workload exited before its pid was read"),
        })?;

        // Registered before the pid file so a status query never sees a pid
        // with neither a live reaper nor an exit record.
        self.mark_reaping(run_id);
        if let Err(err) = write_atomic(&layout.pid_path(), pid.to_string().as_bytes()).await {
            self.unmark_reaping(run_id);
            return Err(err);
        }

        info!(run_id, pid, dir = %layout.dir().display(), "workload started");
        tokio::spawn(reap(
            child,
            layout,
            run_id.to_string(),
            Arc::clone(&self.reaping),
        ));

        Ok(StartRunResponse {
            status: ProcessStatus::Running,
            pid,
        })
    }

    pub async fn status(&self, run_id: &str) -> Result<ProcessStatusResponse, SupervisorError> {
        validate_run_id(run_id)?;
        let layout = self.existing_run(run_id).await?;
        let pid = read_pid(&layout, run_id).await?;

        if let Some(exit) = read_exit_record(&layout).await? {
            return Ok(exit.to_response());
        }
        if self.is_reaping(run_id) {
            return Ok(ProcessStatusResponse::running());
        }
        // The reaper may have written the record and left the set since the
        // first read.
        if let Some(exit) = read_exit_record(&layout).await? {
            return Ok(exit.to_response());
        }

        // No reaper in this process: the run predates a supervisor restart.
        if process_exists(pid) {
            Ok(ProcessStatusResponse::running())
        } else {
            debug!(run_id, pid, "process gone without an exit record");
            Ok(ProcessStatusResponse::lost())
        }
    }

    pub async fn output(&self, run_id: &str) -> Result<RunOutputResponse, SupervisorError> {
        validate_run_id(run_id)?;
        let layout = self.existing_run(run_id).await?;
        read_pid(&layout, run_id).await?;

        Ok(RunOutputResponse {
            stdout: read_log(&layout.stdout_path()).await?,
            stderr: read_log(&layout.stderr_path()).await?,
        })
    }

    async fn existing_run(&self, run_id: &str) -> Result<RunLayout, SupervisorError> {
        let layout = RunLayout::new(&self.runs_root, run_id);
        if path_exists(layout.dir()).await? {
            Ok(layout)
        } else {
            Err(SupervisorError::RunNotFound {
                run_id: run_id.to_string(),
            })
        }
    }

    fn spawn_workload(
        &self,
        run_id: &str,
        layout: &RunLayout,
        request: &StartRunRequest,
    ) -> Result<Child, SupervisorError> {
        let stdout = open_log(&layout.stdout_path())?;
        let stderr = open_log(&layout.stderr_path())?;

        let mut command = Command::new(&self.command.shell);
        command
            .arg("-c")
            .arg(&self.command.command_line)
            .envs(&request.envs)
            .env("AGENT_RUN_ID", run_id)
            .env("AGENT_RUN_DIR", layout.dir())
            .env("AGENT_INPUTS_PATH", layout.inputs_path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false);
        if let Some(workdir) = &self.command.workdir {
            command.current_dir(workdir);
        }
        // Own process group: signals aimed at the supervisor do not reach the workload.
        #[cfg(unix)]
        command.process_group(0);

        command.spawn().map_err(|source| SupervisorError::Spawn {
            run_id: run_id.to_string(),
            source,
        })
    }

    fn mark_reaping(&self, run_id: &str) {
        lock_set(&self.reaping).insert(run_id.to_string());
    }

    fn unmark_reaping(&self, run_id: &str) {
        lock_set(&self.reaping).remove(run_id);
    }

    fn is_reaping(&self, run_id: &str) -> bool {
        lock_set(&self.reaping).contains(run_id)
    }
}

async fn reap(
    mut child: Child,
    layout: RunLayout,
    run_id: String,
    reaping: Arc<Mutex<HashSet<String>>>,
) {
    match child.wait().await {
        Ok(status) => {
            let record = ExitRecord::from_status(&status);
            match serde_json::to_vec(&record) {
                Ok(bytes) => {
                    if let Err(err) = write_atomic(&layout.exit_path(), &bytes).await {
                        error!(run_id = %run_id, error = %err, "failed to persist exit record");
                    }
                }
                Err(err) => error!(run_id = %run_id, error = %err, "failed to encode exit record"),
            }
            info!(
                run_id = %run_id,
                code = ?record.code,
                signal = ?record.signal,
                "workload exited"
            );
        }
        Err(err) => error!(run_id = %run_id, error = %err, "failed to wait on workload"),
    }
    lock_set(&reaping).remove(&run_id);
}

fn lock_set(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn open_log(path: &Path) -> Result<std::fs::File, SupervisorError> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| {
            SupervisorError::io(format!("failed to open {}", path.display()), source)
        })
}

async fn path_exists(path: &Path) -> Result<bool, SupervisorError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|source| SupervisorError::io(format!("failed to stat {}", path.display()), source))
}

async fn read_pid(layout: &RunLayout, run_id: &str) -> Result<u32, SupervisorError> {
    let path = layout.pid_path();
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(SupervisorError::ProcessRecordMissing {
                run_id: run_id.to_string(),
            })
        }
        Err(source) => {
            return Err(SupervisorError::io(
                format!("failed to read {}", path.display()),
                source,
            ))
        }
    };
    raw.trim()
        .parse::<u32>()
        .map_err(|err| SupervisorError::CorruptRecord {
            path,
            message: err.to_string(),
        })
}

async fn read_exit_record(layout: &RunLayout) -> Result<Option<ExitRecord>, SupervisorError> {
    let path = layout.exit_path();
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| SupervisorError::CorruptRecord {
                path,
                message: err.to_string(),
            }),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(SupervisorError::io(
            format!("failed to read {}", path.display()),
            source,
        )),
    }
}

async fn read_log(path: &Path) -> Result<String, SupervisorError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(SupervisorError::io(
            format!("failed to read {}", path.display()),
            source,
        )),
    }
}

/// Readers see either the previous file or the complete new one.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SupervisorError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|source| SupervisorError::io(format!("failed to write {}", tmp.display()), source))?;
    tokio::fs::rename(&tmp, path).await.map_err(|source| {
        SupervisorError::io(format!("failed to move {} into place", path.display()), source)
    })
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 runs the existence and permission checks without delivering anything.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    let errno = std::io::Error::last_os_error().raw_os_error();
    if errno == Some(libc::EPERM) {
        return true;
    }
    if errno != Some(libc::ESRCH) {
        warn!(pid, ?errno, "unexpected error probing process");
    }
    false
}

#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    false
}
