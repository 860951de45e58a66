use std::sync::Arc;

use container_launcher::{ContainerHandle, ContainerLauncher};
use run_protocol::{ProcessStatus, ProcessStatusResponse, RunOutputResponse, RunStatus};
use tracing::{debug, info};

use crate::error::RuntimeError;
use crate::models::{RunOutput, RunOutputView, RunRecord, RunStatusResponse};
use crate::store::RunStore;
use crate::supervisor_client::SupervisorClient;

/// Answers status and output queries for runs.
///
/// Terminal runs are served from the store without touching any container.
/// Live runs are re-derived from their supervisor and the refreshed state is
/// persisted; a failed supervisor call leaves the stored run untouched.
#[derive(Clone)]
pub struct RunReconciler {
    store: RunStore,
    launcher: Arc<ContainerLauncher>,
    client: Arc<dyn SupervisorClient>,
    container_host: String,
}

impl RunReconciler {
    pub fn new(
        store: RunStore,
        launcher: Arc<ContainerLauncher>,
        client: Arc<dyn SupervisorClient>,
        container_host: impl Into<String>,
    ) -> Self {
        Self {
            store,
            launcher,
            client,
            container_host: container_host.into(),
        }
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        self.load(run_id).await
    }

    pub async fn get_status(&self, run_id: &str) -> Result<RunStatusResponse, RuntimeError> {
        let record = self.load(run_id).await?;
        if record.status != RunStatus::Running {
            return Ok(status_of(&record));
        }

        let base_url = self.base_url(&record).await?;
        let probe = self.client.status(&base_url, run_id).await?;
        if !probe.status.has_exited() {
            return Ok(status_of(&record));
        }

        // Capture the final output together with the terminal status.
        let output = self.client.output(&base_url, run_id).await?;
        let record = self.persist_exit(&record, &probe, output).await?;
        Ok(status_of(&record))
    }

    pub async fn get_output(&self, run_id: &str) -> Result<RunOutputView, RuntimeError> {
        let record = self.load(run_id).await?;
        if record.status != RunStatus::Running {
            // PENDING has nothing to show yet; terminal runs are immutable.
            return Ok(RunOutputView::from_record(&record));
        }

        let base_url = self.base_url(&record).await?;
        let probe = self.client.status(&base_url, run_id).await?;
        let output = self.client.output(&base_url, run_id).await?;

        let record = if probe.status.has_exited() {
            self.persist_exit(&record, &probe, output).await?
        } else {
            let partial = RunOutput {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: None,
            };
            self.store
                .update_run(run_id, |stored| {
                    if stored.status != RunStatus::Running || stored.output.as_ref() == Some(&partial) {
                        return false;
                    }
                    stored.output = Some(partial);
                    stored.updated_at = chrono::Utc::now();
                    true
                })
                .await
                .map_err(RuntimeError::Store)?
                .ok_or_else(|| not_found(run_id))?
        };
        Ok(RunOutputView::from_record(&record))
    }

    async fn load(&self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        self.store
            .get_run(run_id)
            .await
            .ok_or_else(|| not_found(run_id))
    }

    async fn base_url(&self, record: &RunRecord) -> Result<String, RuntimeError> {
        let handle: ContainerHandle = self
            .launcher
            .locate(&record.image_ref)
            .await?
            .ok_or_else(|| RuntimeError::ContainerUnavailable {
                image_ref: record.image_ref.clone(),
            })?;
        debug!(run = %record.run_id, container = %handle.container_id, "resolved run container");
        Ok(handle.base_url(&self.container_host))
    }

    async fn persist_exit(
        &self,
        record: &RunRecord,
        probe: &ProcessStatusResponse,
        output: RunOutputResponse,
    ) -> Result<RunRecord, RuntimeError> {
        let next = probe.status.as_run_status();
        let error = exit_error(probe);
        let output = RunOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: probe.exit_code,
        };

        let stored = self
            .store
            .mark_terminal(&record.run_id, next, Some(output), error)
            .await
            .map_err(RuntimeError::Store)?
            .ok_or_else(|| not_found(&record.run_id))?;
        info!(
            run = %record.run_id,
            status = %stored.status,
            exit_code = ?probe.exit_code,
            "run finished"
        );
        Ok(stored)
    }
}

fn status_of(record: &RunRecord) -> RunStatusResponse {
    RunStatusResponse {
        run_id: record.run_id.clone(),
        status: record.status,
    }
}

fn not_found(run_id: &str) -> RuntimeError {
    RuntimeError::RunNotFound {
        run_id: run_id.to_string(),
    }
}

fn exit_error(probe: &ProcessStatusResponse) -> Option<String> {
    match probe.status {
        ProcessStatus::Done | ProcessStatus::Running => None,
        ProcessStatus::Failed => Some(match (probe.exit_code, probe.signal) {
            (Some(code), _) => format!("workload exited with code {}", code),
            (None, Some(signal)) => format!("workload killed by signal {}", signal),
            (None, None) => "workload failed".to_string(),
        }),
        ProcessStatus::Lost => {
            Some("workload process disappeared without an exit status".to_string())
        }
    }
}
