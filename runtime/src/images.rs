use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::builder::{BuildError, ImageBuilder};
use crate::error::RuntimeError;
use crate::models::{BuildStatus, ImageRecord};
use crate::store::RunStore;

/// Builds agent images and keeps their records.
#[derive(Clone)]
pub struct ImageService {
    store: RunStore,
    builder: Arc<dyn ImageBuilder>,
}

impl ImageService {
    pub fn new(store: RunStore, builder: Arc<dyn ImageBuilder>) -> Self {
        Self { store, builder }
    }

    /// Runs a build to completion. The record is `BUILDING` while the build
    /// runs and ends up `DONE` or `FAILED`.
    pub async fn build_image(
        &self,
        agent_id: &str,
        repo_url: &str,
    ) -> Result<ImageRecord, RuntimeError> {
        if repo_url.trim().is_empty() {
            return Err(BuildError::MissingRepoUrl.into());
        }

        let image_id = Uuid::new_v4().to_string();
        self.store
            .insert_image(ImageRecord::building(&image_id, agent_id))
            .await
            .map_err(RuntimeError::Store)?;
        info!(agent = %agent_id, image_id = %image_id, %repo_url, "image build started");

        match self.builder.build(repo_url, agent_id).await {
            Ok(built) => {
                let record = self
                    .store
                    .update_image(&image_id, |record| {
                        record.build_status = BuildStatus::Done;
                        record.image_ref = Some(built.image_ref.clone());
                        record.declared_inputs = built.declared_inputs.clone();
                    })
                    .await
                    .map_err(RuntimeError::Store)?;
                record.ok_or_else(|| {
                    RuntimeError::Store(anyhow::anyhow!("image record {} vanished", image_id))
                })
            }
            Err(err) => {
                warn!(agent = %agent_id, image_id = %image_id, error = %err, "image build failed");
                let message = err.to_string();
                if let Err(store_err) = self
                    .store
                    .update_image(&image_id, |record| {
                        record.build_status = BuildStatus::Failed;
                        record.error = Some(message);
                    })
                    .await
                {
                    warn!(image_id = %image_id, error = %store_err, "failed to record build failure");
                }
                Err(err.into())
            }
        }
    }

    pub async fn latest_image(&self, agent_id: &str) -> Result<ImageRecord, RuntimeError> {
        self.store
            .latest_image(agent_id, None)
            .await
            .ok_or_else(|| RuntimeError::ImageNotFound {
                agent_id: agent_id.to_string(),
            })
    }
}
