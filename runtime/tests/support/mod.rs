#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use container_launcher::{ContainerRuntime, LaunchError, ReadinessProbe};
use runtime::models::{BuildStatus, ImageRecord, RunConfig, RunRecord, RunStatus};
use runtime::{
    AppState, BuildError, BuiltImage, Components, HttpSupervisorClient, ImageBuilder, RunStore,
};
use tempfile::TempDir;

pub const IMAGE: &str = "img_A";
pub const AGENT: &str = "agent-1";

/// Container runtime whose every container maps the supervisor port to one
/// fixed host port (a wiremock server or an in-process supervisor).
pub struct FakeRuntime {
    host_port: u16,
    running: Mutex<HashMap<String, String>>,
    pub launches: AtomicUsize,
    pub lookups: AtomicUsize,
    fail_launch: AtomicBool,
}

impl FakeRuntime {
    pub fn new(host_port: u16) -> Arc<Self> {
        Arc::new(Self {
            host_port,
            running: Mutex::new(HashMap::new()),
            launches: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
            fail_launch: AtomicBool::new(false),
        })
    }

    pub fn with_running(host_port: u16, image_ref: &str) -> Arc<Self> {
        let runtime = Self::new(host_port);
        runtime
            .running
            .lock()
            .unwrap()
            .insert(image_ref.to_string(), "ctr-existing".to_string());
        runtime
    }

    pub fn failing(host_port: u16) -> Arc<Self> {
        let runtime = Self::new(host_port);
        runtime.fail_launch.store(true, Ordering::SeqCst);
        runtime
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn find_running(&self, image_ref: &str) -> Result<Vec<String>, LaunchError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let running = self.running.lock().unwrap();
        Ok(running.get(image_ref).cloned().into_iter().collect())
    }

    async fn run_detached(
        &self,
        image_ref: &str,
        _container_port: u16,
    ) -> Result<String, LaunchError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(LaunchError::CommandFailed {
                command: format!("docker run -d {}", image_ref),
                status: "exit status: 125".to_string(),
                stderr: format!("Unable to find image '{}' locally", image_ref),
            });
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("ctr-{}", n);
        self.running
            .lock()
            .unwrap()
            .insert(image_ref.to_string(), id.clone());
        Ok(id)
    }

    async fn host_port(&self, _container_id: &str, _container_port: u16) -> Result<u16, LaunchError> {
        Ok(self.host_port)
    }
}

/// Image builder that always produces `img_A` declaring the given inputs.
pub struct FixedBuilder {
    pub declared_inputs: Vec<String>,
}

#[async_trait]
impl ImageBuilder for FixedBuilder {
    async fn build(&self, repo_url: &str, _agent_id: &str) -> Result<BuiltImage, BuildError> {
        if repo_url.contains("no-manifest") {
            return Err(BuildError::MissingAgentConfig {
                repo_url: repo_url.to_string(),
            });
        }
        Ok(BuiltImage {
            image_ref: IMAGE.to_string(),
            declared_inputs: self.declared_inputs.clone(),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: RunStore,
    pub runtime: Arc<FakeRuntime>,
    pub state: AppState,
}

pub fn harness(runtime: Arc<FakeRuntime>, probe: ReadinessProbe) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = RunStore::open(dir.path().join("runs.json")).unwrap();
    let state = AppState::new(Components {
        store: store.clone(),
        runtime: runtime.clone(),
        supervisor_port: 4000,
        probe,
        client: Arc::new(HttpSupervisorClient::new(Duration::from_secs(5)).unwrap()),
        builder: Arc::new(FixedBuilder {
            declared_inputs: vec!["topic".to_string()],
        }),
        container_host: "127.0.0.1".to_string(),
    });
    Harness {
        dir,
        store,
        runtime,
        state,
    }
}

pub fn fast_probe() -> ReadinessProbe {
    ReadinessProbe::new(Duration::from_secs(5), Duration::from_millis(20))
}

pub async fn seed_run(store: &RunStore, run_id: &str, status: RunStatus) -> RunRecord {
    let mut record = RunRecord::new(run_id, AGENT, IMAGE, RunConfig::default());
    match status {
        RunStatus::Pending => {}
        RunStatus::Running => record.transition(RunStatus::Running).unwrap(),
        terminal => {
            record.transition(RunStatus::Running).unwrap();
            record.transition(terminal).unwrap();
        }
    }
    store.insert_run(record).await.unwrap()
}

pub async fn seed_built_image(store: &RunStore, declared_inputs: &[&str]) -> ImageRecord {
    let mut image = ImageRecord::building("image-1", AGENT);
    image.build_status = BuildStatus::Done;
    image.image_ref = Some(IMAGE.to_string());
    image.declared_inputs = declared_inputs.iter().map(|s| s.to_string()).collect();
    store.insert_image(image).await.unwrap()
}
