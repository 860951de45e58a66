use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::{BuildStatus, ImageRecord, RunOutput, RunRecord, RunStatus};

/// JSON-file persistence for runs and images.
///
/// Every mutation rewrites the whole file while the write lock is held, so
/// the file on disk never lags behind a mutation that has already returned.
#[derive(Debug, Clone)]
pub struct RunStore {
    path: PathBuf,
    state: Arc<RwLock<StoreDb>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDb {
    #[serde(default)]
    runs: HashMap<String, RunRecord>,
    #[serde(default)]
    images: HashMap<String, ImageRecord>,
}

impl RunStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading run store at {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| "parsing run store JSON")?
        } else {
            StoreDb::default()
        };

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(state)),
        })
    }

    pub async fn insert_run(&self, record: RunRecord) -> Result<RunRecord> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        next.runs.insert(record.run_id.clone(), record.clone());
        persist(&self.path, &next).await?;
        *guard = next;
        Ok(record)
    }

    pub async fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        let guard = self.state.read().await;
        guard.runs.get(run_id).cloned()
    }

    /// Applies `update` to a copy of the record under the write lock. The
    /// closure returns whether it changed anything; unchanged records are not
    /// persisted. The copy replaces the stored record only once it is on
    /// disk. Returns the record as stored afterwards, or `None` for an
    /// unknown run.
    pub async fn update_run<F>(&self, run_id: &str, update: F) -> Result<Option<RunRecord>>
    where
        F: FnOnce(&mut RunRecord) -> bool,
    {
        let mut guard = self.state.write().await;
        let Some(current) = guard.runs.get(run_id) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        if !update(&mut updated) {
            return Ok(Some(current.clone()));
        }

        let mut next = guard.clone();
        next.runs.insert(run_id.to_string(), updated.clone());
        persist(&self.path, &next).await?;
        *guard = next;
        Ok(Some(updated))
    }

    pub async fn mark_running(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.update_run(run_id, |record| {
            let changed = record.status != RunStatus::Running;
            record.transition(RunStatus::Running).is_ok() && changed
        })
        .await
    }

    /// Records a terminal outcome unless the run already reached one.
    pub async fn mark_terminal(
        &self,
        run_id: &str,
        status: RunStatus,
        output: Option<RunOutput>,
        error: Option<String>,
    ) -> Result<Option<RunRecord>> {
        self.update_run(run_id, |record| {
            if record.status.is_terminal() || record.transition(status).is_err() {
                return false;
            }
            if output.is_some() {
                record.output = output;
            }
            record.error = error;
            true
        })
        .await
    }

    pub async fn mark_error(
        &self,
        run_id: &str,
        message: String,
        output: Option<RunOutput>,
    ) -> Result<Option<RunRecord>> {
        self.mark_terminal(run_id, RunStatus::Error, output, Some(message))
            .await
    }

    pub async fn insert_image(&self, record: ImageRecord) -> Result<ImageRecord> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        next.images.insert(record.image_id.clone(), record.clone());
        persist(&self.path, &next).await?;
        *guard = next;
        Ok(record)
    }

    pub async fn update_image<F>(&self, image_id: &str, update: F) -> Result<Option<ImageRecord>>
    where
        F: FnOnce(&mut ImageRecord),
    {
        let mut guard = self.state.write().await;
        let Some(current) = guard.images.get(image_id) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        update(&mut updated);

        let mut next = guard.clone();
        next.images.insert(image_id.to_string(), updated.clone());
        persist(&self.path, &next).await?;
        *guard = next;
        Ok(Some(updated))
    }

    /// Most recent image for the agent, optionally restricted to one build status.
    pub async fn latest_image(
        &self,
        agent_id: &str,
        status: Option<BuildStatus>,
    ) -> Option<ImageRecord> {
        let guard = self.state.read().await;
        guard
            .images
            .values()
            .filter(|image| image.agent_id == agent_id)
            .filter(|image| status.map_or(true, |status| image.build_status == status))
            .max_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.image_id.cmp(&b.image_id))
            })
            .cloned()
    }
}

async fn persist(path: &Path, db: &StoreDb) -> Result<()> {
    let path = path.to_path_buf();
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating run store directory {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(&db).context("serializing run store")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("writing run store to {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("replacing run store at {}", path.display()))?;
        Ok::<(), anyhow::Error>(())
    })
    .await
    .context("joining run store persistence task")??;

    Ok(())
}
