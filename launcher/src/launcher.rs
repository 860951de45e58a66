use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::LaunchError;
use crate::runtime::ContainerRuntime;

/// A running container and the host port bound to its supervisor port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub container_id: String,
    pub host_port: u16,
}

impl ContainerHandle {
    pub fn base_url(&self, host: &str) -> String {
        format!("http://{}:{}", host, self.host_port)
    }
}

/// Ensures at most one container backs each image reference.
///
/// Lookup and launch for the same image reference run inside a per-image
/// critical section, so concurrent callers never both observe "not running"
/// and both start a container. Different images do not contend.
pub struct ContainerLauncher {
    runtime: Arc<dyn ContainerRuntime>,
    service_port: u16,
    launch_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ContainerLauncher {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, service_port: u16) -> Self {
        Self {
            runtime,
            service_port,
            launch_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Find the running container for `image_ref` without starting one.
    pub async fn locate(&self, image_ref: &str) -> Result<Option<ContainerHandle>, LaunchError> {
        let image_ref = normalize_image_ref(image_ref)?;
        self.lookup(image_ref).await
    }

    /// Find the running container for `image_ref`, starting one if needed.
    pub async fn locate_or_launch(&self, image_ref: &str) -> Result<ContainerHandle, LaunchError> {
        let image_ref = normalize_image_ref(image_ref)?;
        let lock = self.lock_for(image_ref);
        let _guard = lock.lock().await;

        if let Some(handle) = self.lookup(image_ref).await? {
            return Ok(handle);
        }

        let container_id = self
            .runtime
            .run_detached(image_ref, self.service_port)
            .await?;
        let host_port = self
            .runtime
            .host_port(&container_id, self.service_port)
            .await?;

        info!(
            image = %image_ref,
            container = %container_id,
            port = host_port,
            "launched container"
        );

        Ok(ContainerHandle {
            container_id,
            host_port,
        })
    }

    async fn lookup(&self, image_ref: &str) -> Result<Option<ContainerHandle>, LaunchError> {
        let running = self.runtime.find_running(image_ref).await?;
        let Some(container_id) = running.first().cloned() else {
            return Ok(None);
        };

        if running.len() > 1 {
            warn!(
                image = %image_ref,
                containers = ?running,
                "multiple containers running for image; using the first"
            );
        }

        let host_port = self
            .runtime
            .host_port(&container_id, self.service_port)
            .await?;

        Ok(Some(ContainerHandle {
            container_id,
            host_port,
        }))
    }

    fn lock_for(&self, image_ref: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .launch_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            locks
                .entry(image_ref.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}

fn normalize_image_ref(image_ref: &str) -> Result<&str, LaunchError> {
    let trimmed = image_ref.trim();
    if trimmed.is_empty() {
        return Err(LaunchError::MissingImageRef);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_uses_host_port() {
        let handle = ContainerHandle {
            container_id: "abc".to_string(),
            host_port: 49153,
        };
        assert_eq!(handle.base_url("127.0.0.1"), "http://127.0.0.1:49153");
    }

    #[test]
    fn blank_image_refs_are_rejected() {
        assert!(matches!(
            normalize_image_ref("   "),
            Err(LaunchError::MissingImageRef)
        ));
        assert_eq!(normalize_image_ref(" img ").unwrap(), "img");
    }
}
