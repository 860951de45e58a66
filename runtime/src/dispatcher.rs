use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use container_launcher::{ContainerLauncher, ReadinessProbe};
use run_protocol::{validate_run_id, RunStatus, StartRunRequest};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::models::{BuildStatus, RunConfig, RunOutput, RunRecord};
use crate::store::RunStore;
use crate::supervisor_client::SupervisorClient;

/// Result of handing a run to its container's supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub container_id: String,
    pub pid: u32,
}

/// Gets a PENDING run onto a ready container.
///
/// Dispatch is synchronous: it returns once the supervisor has spawned the
/// workload, never waiting for the workload itself. Any failure after the
/// request has been validated marks the run `ERROR` before it propagates.
#[derive(Clone)]
pub struct RunDispatcher {
    store: RunStore,
    launcher: Arc<ContainerLauncher>,
    probe: ReadinessProbe,
    client: Arc<dyn SupervisorClient>,
    container_host: String,
}

impl RunDispatcher {
    pub fn new(
        store: RunStore,
        launcher: Arc<ContainerLauncher>,
        probe: ReadinessProbe,
        client: Arc<dyn SupervisorClient>,
        container_host: impl Into<String>,
    ) -> Self {
        Self {
            store,
            launcher,
            probe,
            client,
            container_host: container_host.into(),
        }
    }

    /// Creates a run for the agent's latest built image and dispatches it.
    pub async fn submit_run(
        &self,
        agent_id: &str,
        envs: BTreeMap<String, String>,
        inputs: BTreeMap<String, String>,
    ) -> Result<DispatchOutcome, RuntimeError> {
        let image = self
            .store
            .latest_image(agent_id, Some(BuildStatus::Done))
            .await
            .ok_or_else(|| RuntimeError::NoBuiltImage {
                agent_id: agent_id.to_string(),
            })?;
        let image_ref = image.image_ref.ok_or_else(|| RuntimeError::NoBuiltImage {
            agent_id: agent_id.to_string(),
        })?;
        check_inputs(&image.declared_inputs, &inputs)?;

        let run_id = Uuid::new_v4().to_string();
        let record = RunRecord::new(
            &run_id,
            agent_id,
            &image_ref,
            RunConfig {
                envs: envs.clone(),
                inputs: inputs.clone(),
            },
        );
        self.store
            .insert_run(record)
            .await
            .map_err(RuntimeError::Store)?;
        info!(run = %run_id, agent = %agent_id, image = %image_ref, "run submitted");

        self.start_run(&run_id, &image_ref, envs, inputs).await
    }

    /// Locates or launches the image's container, waits for its supervisor
    /// to become ready and asks it to start the run.
    pub async fn start_run(
        &self,
        run_id: &str,
        image_ref: &str,
        envs: BTreeMap<String, String>,
        inputs: BTreeMap<String, String>,
    ) -> Result<DispatchOutcome, RuntimeError> {
        validate_run_id(run_id)?;
        if image_ref.trim().is_empty() {
            return Err(container_launcher::LaunchError::MissingImageRef.into());
        }
        let record = self
            .store
            .get_run(run_id)
            .await
            .ok_or_else(|| RuntimeError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        if record.status != RunStatus::Pending {
            return Err(RuntimeError::RunNotPending {
                run_id: run_id.to_string(),
                status: record.status,
            });
        }

        let handle = match self.launcher.locate_or_launch(image_ref).await {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail(run_id, err.into(), None).await),
        };
        let base_url = handle.base_url(&self.container_host);

        if let Err(err) = self.probe.wait_until_ready(&base_url).await {
            warn!(
                run = %run_id,
                container = %handle.container_id,
                error = %err,
                "container supervisor never became ready"
            );
            return Err(self.fail(run_id, err.into(), None).await);
        }

        let request = StartRunRequest::new(envs, inputs);
        let started = match self.client.start(&base_url, run_id, &request).await {
            Ok(started) => started,
            Err(err) => {
                let output = err.response_body().map(|body| RunOutput {
                    stdout: String::new(),
                    stderr: body.to_string(),
                    exit_code: None,
                });
                return Err(self.fail(run_id, err.into(), output).await);
            }
        };

        let status = match self.store.mark_running(run_id).await {
            Ok(Some(record)) => record.status,
            Ok(None) => {
                return Err(RuntimeError::RunNotFound {
                    run_id: run_id.to_string(),
                })
            }
            Err(err) => return Err(RuntimeError::Store(err)),
        };

        info!(
            run = %run_id,
            container = %handle.container_id,
            pid = started.pid,
            "run dispatched"
        );
        Ok(DispatchOutcome {
            run_id: run_id.to_string(),
            status,
            container_id: handle.container_id,
            pid: started.pid,
        })
    }

    async fn fail(
        &self,
        run_id: &str,
        err: RuntimeError,
        output: Option<RunOutput>,
    ) -> RuntimeError {
        warn!(run = %run_id, error = %err, "dispatch failed");
        if let Err(store_err) = self
            .store
            .mark_error(run_id, err.to_string(), output)
            .await
        {
            error!(run = %run_id, error = %store_err, "failed to record dispatch failure");
        }
        err
    }
}

/// Inputs must match the image's declared keys exactly.
fn check_inputs(
    declared: &[String],
    inputs: &BTreeMap<String, String>,
) -> Result<(), RuntimeError> {
    let declared: BTreeSet<&str> = declared.iter().map(String::as_str).collect();

    let undeclared: Vec<String> = inputs
        .keys()
        .filter(|key| !declared.contains(key.as_str()))
        .cloned()
        .collect();
    if !undeclared.is_empty() {
        return Err(RuntimeError::UndeclaredInputs { keys: undeclared });
    }

    let missing: Vec<String> = declared
        .iter()
        .filter(|key| !inputs.contains_key(**key))
        .map(|key| key.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(RuntimeError::MissingInputs { keys: missing });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn declared_inputs_must_all_be_supplied() {
        let declared = vec!["topic".to_string(), "depth".to_string()];

        assert!(check_inputs(&declared, &inputs(&[("topic", "x"), ("depth", "2")])).is_ok());
        match check_inputs(&declared, &inputs(&[("topic", "x")])) {
            Err(RuntimeError::MissingInputs { keys }) => assert_eq!(keys, vec!["depth"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn undeclared_inputs_are_rejected() {
        let declared = vec!["topic".to_string()];
        match check_inputs(&declared, &inputs(&[("topic", "x"), ("extra", "y")])) {
            Err(RuntimeError::UndeclaredInputs { keys }) => assert_eq!(keys, vec!["extra"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn no_declared_inputs_accepts_empty_map() {
        assert!(check_inputs(&[], &BTreeMap::new()).is_ok());
    }
}
