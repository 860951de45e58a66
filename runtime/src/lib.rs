//! Harbor control plane.
//!
//! Builds agent images, dispatches runs onto the container backing each
//! image and reconciles run state from the supervisor inside that container.
//! Runs and images are persisted in a JSON store under the state directory.

use std::sync::Arc;

use anyhow::Result;
use container_launcher::{ContainerLauncher, ContainerRuntime, DockerCli, ReadinessProbe};

pub mod api;
pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod images;
pub mod models;
pub mod reconciler;
pub mod store;
pub mod supervisor_client;

pub use api::create_app;
pub use builder::{BuildError, BuiltImage, DockerImageBuilder, ImageBuilder};
pub use config::Config;
pub use dispatcher::{DispatchOutcome, RunDispatcher};
pub use error::RuntimeError;
pub use images::ImageService;
pub use reconciler::RunReconciler;
pub use store::RunStore;
pub use supervisor_client::{HttpSupervisorClient, SupervisorCallError, SupervisorClient};

/// Everything the HTTP handlers need, wired around one store and launcher.
#[derive(Clone)]
pub struct AppState {
    pub images: ImageService,
    pub dispatcher: RunDispatcher,
    pub reconciler: RunReconciler,
}

/// Collaborators shared by the services in [`AppState`].
pub struct Components {
    pub store: RunStore,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub supervisor_port: u16,
    pub probe: ReadinessProbe,
    pub client: Arc<dyn SupervisorClient>,
    pub builder: Arc<dyn ImageBuilder>,
    pub container_host: String,
}

impl AppState {
    pub fn new(components: Components) -> Self {
        let Components {
            store,
            runtime,
            supervisor_port,
            probe,
            client,
            builder,
            container_host,
        } = components;
        let launcher = Arc::new(ContainerLauncher::new(runtime, supervisor_port));

        Self {
            images: ImageService::new(store.clone(), builder),
            dispatcher: RunDispatcher::new(
                store.clone(),
                Arc::clone(&launcher),
                probe,
                Arc::clone(&client),
                container_host.clone(),
            ),
            reconciler: RunReconciler::new(store, launcher, client, container_host),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let store = RunStore::open(config.store_path()?)?;
        let builder = DockerImageBuilder::new(config.container_runtime.clone())
            .with_staging_root(config.staging_root_dir.clone())
            .with_dockerfile(config.agent_dockerfile.clone())
            .with_supervisor_binary(config.supervisor_binary.clone());

        Ok(Self::new(Components {
            store,
            runtime: Arc::new(DockerCli::new(config.container_runtime.clone())),
            supervisor_port: config.supervisor_port,
            probe: ReadinessProbe::new(config.ready_timeout, config.ready_poll_interval),
            client: Arc::new(HttpSupervisorClient::new(config.supervisor_request_timeout)?),
            builder: Arc::new(builder),
            container_host: config.container_host.clone(),
        }))
    }
}
