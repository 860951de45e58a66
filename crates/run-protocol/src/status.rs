use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a run as tracked by the control plane.
///
/// Transitions only move forward: `PENDING → RUNNING → {DONE | ERROR}`, with a
/// direct `PENDING → ERROR` edge for dispatch failures. `DONE` and `ERROR` are
/// terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Error)
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Error)
                | (RunStatus::Running, RunStatus::Done)
                | (RunStatus::Running, RunStatus::Error)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Done => "DONE",
            RunStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a workload process as observed by the supervisor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// The process still exists.
    Running,
    /// The process exited with code 0.
    Done,
    /// The process exited with a non-zero code or was killed by a signal.
    Failed,
    /// The process is gone and no exit record was captured.
    Lost,
}

impl ProcessStatus {
    pub fn has_exited(&self) -> bool {
        !matches!(self, ProcessStatus::Running)
    }

    /// Run status the control plane records for this observation.
    pub fn as_run_status(&self) -> RunStatus {
        match self {
            ProcessStatus::Running => RunStatus::Running,
            ProcessStatus::Done => RunStatus::Done,
            ProcessStatus::Failed | ProcessStatus::Lost => RunStatus::Error,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessStatus::Running => "RUNNING",
            ProcessStatus::Done => "DONE",
            ProcessStatus::Failed => "FAILED",
            ProcessStatus::Lost => "LOST",
        };
        f.write_str(label)
    }
}
