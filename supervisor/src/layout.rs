use std::path::{Path, PathBuf};

/// On-disk record of one run: `<runs_root>/<run_id>/`.
///
/// The directory is the only state the supervisor keeps, so a restarted
/// supervisor can still answer status and output queries for earlier runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    dir: PathBuf,
}

impl RunLayout {
    pub const STDOUT_FILE: &'static str = "stdout.log";
    pub const STDERR_FILE: &'static str = "stderr.log";
    pub const PID_FILE: &'static str = "pid";
    pub const INPUTS_FILE: &'static str = "inputs.json";
    pub const EXIT_FILE: &'static str = "exit.json";

    /// `run_id` must already be validated.
    pub fn new(runs_root: &Path, run_id: &str) -> Self {
        Self {
            dir: runs_root.join(run_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.dir.join(Self::STDOUT_FILE)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.dir.join(Self::STDERR_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(Self::PID_FILE)
    }

    pub fn inputs_path(&self) -> PathBuf {
        self.dir.join(Self::INPUTS_FILE)
    }

    pub fn exit_path(&self) -> PathBuf {
        self.dir.join(Self::EXIT_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_live_in_the_run_directory() {
        let layout = RunLayout::new(Path::new("/runs"), "r1");
        assert_eq!(layout.dir(), Path::new("/runs/r1"));
        assert_eq!(layout.stdout_path(), PathBuf::from("/runs/r1/stdout.log"));
        assert_eq!(layout.stderr_path(), PathBuf::from("/runs/r1/stderr.log"));
        assert_eq!(layout.pid_path(), PathBuf::from("/runs/r1/pid"));
        assert_eq!(layout.inputs_path(), PathBuf::from("/runs/r1/inputs.json"));
        assert_eq!(layout.exit_path(), PathBuf::from("/runs/r1/exit.json"));
    }
}
