use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use zeta_common::ZetaError;
use zeta_engine::{
    ContainerEngine, ContainerSpec, ContainerStatus, ContainerSummaryInfo, ImageInfo,
    RunnerEndpoint,
};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub running: bool,
    pub host_port: u16,
}

#[derive(Debug, Default)]
struct FakeState {
    images: Vec<ImageInfo>,
    containers: HashMap<String, FakeContainer>,
    networks: Vec<String>,
    removed_images: Vec<String>,
    fail_build: bool,
    /// When set, every container endpoint reports this host port instead of
    /// the one it was started with (lets tests point probes at a loopback
    /// server).
    runner_port: Option<u16>,
}

/// In-memory engine double for orchestrator tests.
pub struct FakeEngine {
    state: Mutex<FakeState>,
    next_id: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_runner_port(port: u16) -> Self {
        let engine = Self::new();
        engine.lock().runner_port = Some(port);
        engine
    }

    pub fn failing_builds() -> Self {
        let engine = Self::new();
        engine.lock().fail_build = true;
        engine
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn seed_container(&self, container: FakeContainer) {
        self.lock()
            .containers
            .insert(container.name.clone(), container);
    }

    pub fn drop_container(&self, name: &str) {
        self.lock().containers.remove(name);
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().containers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.lock().containers.get(name).cloned()
    }

    pub fn image_count(&self) -> usize {
        self.lock().images.len()
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.lock().removed_images.clone()
    }

    pub fn networks(&self) -> Vec<String> {
        self.lock().networks.clone()
    }

    fn find_by_name_or_id(state: &FakeState, name_or_id: &str) -> Option<FakeContainer> {
        state.containers.get(name_or_id).cloned().or_else(|| {
            state
                .containers
                .values()
                .find(|container| container.id == name_or_id)
                .cloned()
        })
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> Result<(), ZetaError> {
        Ok(())
    }

    async fn build_image(&self, tag: &str, _context_dir: &Path) -> Result<String, ZetaError> {
        let mut state = self.lock();
        if state.fail_build {
            return Err(ZetaError::BuildFailed(format!(
                "unable to build the image '{tag}'"
            )));
        }
        let id = format!("sha256:fake{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        state.images.push(ImageInfo {
            id: id.clone(),
            tags: vec![tag.to_string()],
        });
        Ok(id)
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, ZetaError> {
        Ok(self.lock().images.clone())
    }

    async fn remove_image(&self, id: &str, _force: bool) -> Result<(), ZetaError> {
        let mut state = self.lock();
        let before = state.images.len();
        state.images.retain(|image| image.id != id);
        if state.images.len() == before {
            return Err(ZetaError::NotFound(format!("no such image: {id}")));
        }
        state.removed_images.push(id.to_string());
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, ZetaError> {
        let mut state = self.lock();
        if state.containers.contains_key(&spec.name) {
            return Err(ZetaError::EngineUnavailable(format!(
                "container name '{}' already in use",
                spec.name
            )));
        }
        let id = format!("fakecontainer{:08x}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let host_port = state.runner_port.unwrap_or(spec.host_port);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                name: spec.name.clone(),
                image_id: spec.image_id.clone(),
                running: true,
                host_port,
            },
        );
        Ok(id)
    }

    async fn get_container(&self, name_or_id: &str) -> Result<ContainerStatus, ZetaError> {
        let state = self.lock();
        let container = Self::find_by_name_or_id(&state, name_or_id)
            .ok_or_else(|| ZetaError::NotFound(format!("no such container: {name_or_id}")))?;
        let endpoint = container.running.then(|| RunnerEndpoint {
            host_ip: "127.0.0.1".to_string(),
            host_port: container.host_port,
        });
        let status = if container.running {
            "running".to_string()
        } else {
            "exited".to_string()
        };
        Ok(ContainerStatus {
            id: container.id,
            name: container.name,
            image_id: container.image_id,
            status,
            running: container.running,
            endpoint,
        })
    }

    async fn containers_of_image(
        &self,
        image_id: &str,
    ) -> Result<Vec<ContainerSummaryInfo>, ZetaError> {
        Ok(self
            .lock()
            .containers
            .values()
            .filter(|container| container.image_id == image_id)
            .map(|container| ContainerSummaryInfo {
                id: container.id.clone(),
                name: container.name.clone(),
                image_id: container.image_id.clone(),
                state: if container.running {
                    "running".to_string()
                } else {
                    "exited".to_string()
                },
            })
            .collect())
    }

    async fn is_running(&self, name: &str) -> Result<bool, ZetaError> {
        let state = self.lock();
        Ok(Self::find_by_name_or_id(&state, name)
            .map(|container| container.running)
            .unwrap_or(false))
    }

    async fn exists(&self, name: &str) -> Result<bool, ZetaError> {
        let state = self.lock();
        Ok(Self::find_by_name_or_id(&state, name).is_some())
    }

    async fn stop(&self, name_or_id: &str) -> Result<(), ZetaError> {
        let mut state = self.lock();
        let name = Self::find_by_name_or_id(&state, name_or_id)
            .ok_or_else(|| ZetaError::NotFound(format!("no such container: {name_or_id}")))?
            .name;
        if let Some(container) = state.containers.get_mut(&name) {
            container.running = false;
        }
        Ok(())
    }

    async fn restart(&self, name_or_id: &str) -> Result<(), ZetaError> {
        let mut state = self.lock();
        let name = Self::find_by_name_or_id(&state, name_or_id)
            .ok_or_else(|| ZetaError::NotFound(format!("no such container: {name_or_id}")))?
            .name;
        if let Some(container) = state.containers.get_mut(&name) {
            container.running = true;
        }
        Ok(())
    }

    async fn remove(&self, name_or_id: &str) -> Result<(), ZetaError> {
        let mut state = self.lock();
        let name = Self::find_by_name_or_id(&state, name_or_id)
            .ok_or_else(|| ZetaError::NotFound(format!("no such container: {name_or_id}")))?
            .name;
        state.containers.remove(&name);
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<(), ZetaError> {
        self.lock().networks.push(name.to_string());
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, ZetaError> {
        Ok(self.lock().networks.iter().any(|network| network == name))
    }

    async fn remove_network(&self, name: &str) -> Result<(), ZetaError> {
        self.lock().networks.retain(|network| network != name);
        Ok(())
    }
}
