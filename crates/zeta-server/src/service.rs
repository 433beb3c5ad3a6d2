use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use zeta_common::util::now_secs;
use zeta_common::{
    RunnerImageInfo, ZetaError, ZetaMetadata, RUNNER_PORT, RUNNER_SOCKET_PATH,
};
use zeta_engine::{ContainerEngine, ContainerSpec, RunnerEndpoint};
use zeta_store::MetaStore;

use crate::builder;
use crate::locks::StartLocks;
use crate::pns::PortNameSystem;

#[derive(Debug, Clone)]
pub struct ZetaConfig {
    /// Shared bridge network runner containers join.
    pub network: String,
    /// Base image runner images are built from.
    pub base_runner_image: String,
    /// Host path of the heartbeat socket, bind-mounted into every runner.
    pub heartbeat_socket: PathBuf,
    /// Deadline for a start to become ready.
    pub start_timeout: Duration,
    /// Delay between readiness probes.
    pub probe_interval: Duration,
    /// Delay between polls for the engine to publish the container port.
    pub endpoint_poll_interval: Duration,
}

impl ZetaConfig {
    pub fn new(network: String, base_runner_image: String, heartbeat_socket: PathBuf) -> Self {
        Self {
            network,
            base_runner_image,
            heartbeat_socket,
            start_timeout: Duration::from_secs(60),
            probe_interval: Duration::from_secs(1),
            endpoint_poll_interval: Duration::from_millis(500),
        }
    }
}

/// The orchestrator: owns the create/delete lifecycle and the cold/warm
/// start state machine, and proxies invocations into runner containers.
pub struct ZetaService {
    engine: Arc<dyn ContainerEngine>,
    store: Arc<MetaStore>,
    pns: Arc<PortNameSystem>,
    locks: StartLocks,
    http: reqwest::Client,
    cfg: ZetaConfig,
}

impl ZetaService {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<MetaStore>,
        pns: Arc<PortNameSystem>,
        cfg: ZetaConfig,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            engine,
            store,
            pns,
            locks: StartLocks::new(),
            http,
            cfg,
        }
    }

    pub fn list_metadata(&self) -> Result<Vec<ZetaMetadata>, ZetaError> {
        self.store.fetch_all()
    }

    pub fn get_metadata(&self, name: &str) -> Result<Option<ZetaMetadata>, ZetaError> {
        self.store.fetch_by_name(name)
    }

    /// Deploy (or redeploy) a zeta function from its handler source.
    pub async fn create_zeta(
        &self,
        name: &str,
        handler_source: &str,
    ) -> Result<ZetaMetadata, ZetaError> {
        if name.len() < 2 {
            return Err(ZetaError::InvalidInput(format!(
                "Zeta name ('{name}') length needs to be 2 or more characters in length."
            )));
        }

        let _guard = self.locks.acquire(name).await;

        tracing::info!(zeta = %name, "deleting old zeta function data");
        self.clean_zeta(name).await?;

        let (image_id, tag) = builder::build_runner_image(
            self.engine.as_ref(),
            &self.cfg.base_runner_image,
            name,
            handler_source,
        )
        .await?;

        let image = RunnerImageInfo {
            image_id: image_id.clone(),
            tag,
        };
        if let Err(e) = self.store.insert_function(name, now_secs(), &image) {
            // the image has no owning function row, drop it before surfacing
            tracing::warn!(zeta = %name, error = %e, "metadata insert failed, removing freshly built image");
            self.remove_image_forced(&image_id).await;
            return Err(e);
        }

        self.store.fetch_by_name(name)?.ok_or_else(|| {
            ZetaError::Store(format!("function '{name}' missing right after insert"))
        })
    }

    /// Delete a zeta function: its container, its images, its rows, its port.
    pub async fn delete_zeta(&self, name: &str) -> Result<(), ZetaError> {
        let result = {
            let _guard = self.locks.acquire(name).await;
            self.delete_zeta_locked(name).await
        };
        self.locks.forget(name);
        result
    }

    async fn delete_zeta_locked(&self, name: &str) -> Result<(), ZetaError> {
        if self.store.fetch_by_name(name)?.is_none() {
            return Err(ZetaError::NotFound(format!(
                "Zeta function {name} not found."
            )));
        }

        if self.engine.exists(name).await.unwrap_or(false) {
            if let Err(e) = self.engine.stop(name).await {
                tracing::warn!(zeta = %name, error = %e, "unable to stop the runner container");
            }
            match self.engine.remove(name).await {
                Ok(()) => tracing::info!(zeta = %name, "removed zeta runner container"),
                Err(e) => {
                    tracing::warn!(zeta = %name, error = %e, "unable to remove the runner container")
                }
            }
        } else {
            tracing::info!(zeta = %name, "no runner container to remove");
        }

        for image in self.engine.images_with_prefix(name).await? {
            self.remove_image_forced(&image.id).await;
        }

        if let Some(container) = self.store.delete_container_of_function(name)? {
            self.pns.release(container.host_port);
        }
        self.store.delete_function(name)?;
        Ok(())
    }

    /// Start the function if needed, then proxy `params` to its runner.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value, ZetaError> {
        let meta = self.store.fetch_by_name(name)?.ok_or_else(|| {
            ZetaError::NotFound(format!("Zeta function {name} not found."))
        })?;
        let hostname = self.ensure_started(&meta).await?;
        self.run_zeta(&hostname, params).await
    }

    async fn run_zeta(&self, hostname: &str, params: Value) -> Result<Value, ZetaError> {
        let response = self
            .http
            .post(format!("{hostname}/run"))
            .json(&params)
            .send()
            .await
            .map_err(|e| ZetaError::Transport(format!("unable to reach the runner: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ZetaError::Transport(format!("unable to read the runner response: {e}")))?;
        if !status.is_success() {
            return Err(ZetaError::Handler(format!(
                "runner returned {status}: {body}"
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| ZetaError::Transport(format!("runner response is not JSON: {e}")))
    }

    /// Resolve a ready runner hostname, cold-starting when there is none.
    ///
    /// Holds the function's start lock across the whole decision so
    /// concurrent invocations of a cold function start exactly one
    /// container.
    async fn ensure_started(&self, meta: &ZetaMetadata) -> Result<String, ZetaError> {
        let name = meta.zeta_name.clone();
        let _guard = self.locks.acquire(&name).await;

        // re-read under the lock, a concurrent start may have run already
        let meta = self
            .store
            .fetch_by_name(&name)?
            .ok_or_else(|| ZetaError::NotFound(format!("Zeta function {name} not found.")))?;

        if let Some(container) = &meta.runner_container {
            match self.engine.get_container(&container.container_name).await {
                Ok(status) if status.running => return self.warm_start(&meta).await,
                Ok(_) => {
                    tracing::warn!(zeta = %name, "runner container present but not running, replacing it");
                    if let Err(e) = self.engine.remove(&container.container_name).await {
                        tracing::warn!(zeta = %name, error = %e, "unable to remove the stale container");
                    }
                    self.reconcile_lost_container(&name)?;
                }
                Err(ZetaError::NotFound(_)) => {
                    tracing::warn!(zeta = %name, "runner container lost externally, reconciling");
                    self.reconcile_lost_container(&name)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.cold_start(&meta).await
    }

    fn reconcile_lost_container(&self, name: &str) -> Result<(), ZetaError> {
        if let Some(row) = self.store.delete_container_of_function(name)? {
            self.pns.release(row.host_port);
        }
        Ok(())
    }

    async fn cold_start(&self, meta: &ZetaMetadata) -> Result<String, ZetaError> {
        let name = &meta.zeta_name;
        tracing::info!(zeta = %name, "cold starting");

        let host_port = self.pns.allocate(name).await?;
        let spec = ContainerSpec {
            name: name.clone(),
            image_id: meta.runner_image.image_id.clone(),
            container_port: RUNNER_PORT,
            host_port,
            network: self.cfg.network.clone(),
            binds: vec![format!(
                "{}:{}:ro",
                self.cfg.heartbeat_socket.display(),
                RUNNER_SOCKET_PATH
            )],
        };

        let container_id = match self.engine.run_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                self.pns.release(host_port);
                return Err(e);
            }
        };

        let endpoint = match self.wait_for_endpoint(name).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.abort_start(name, host_port).await;
                return Err(e);
            }
        };

        if let Err(e) = self.store.insert_container(
            name,
            &container_id,
            name,
            endpoint.host_port,
            &endpoint.host_ip,
        ) {
            self.abort_start(name, host_port).await;
            return Err(e);
        }

        let hostname = hostname_of(&endpoint);
        if let Err(e) = self.wait_until_ready(name, &hostname).await {
            self.abort_start(name, host_port).await;
            return Err(e);
        }

        tracing::info!(zeta = %name, %hostname, "cold start complete");
        Ok(hostname)
    }

    async fn warm_start(&self, meta: &ZetaMetadata) -> Result<String, ZetaError> {
        let name = &meta.zeta_name;
        tracing::info!(zeta = %name, "warm starting");
        let endpoint = self.wait_for_endpoint(name).await?;
        let hostname = hostname_of(&endpoint);
        self.wait_until_ready(name, &hostname).await?;
        Ok(hostname)
    }

    /// Undo a failed cold start: container, row and port all go.
    async fn abort_start(&self, name: &str, host_port: u16) {
        if let Err(e) = self.engine.stop(name).await {
            tracing::debug!(zeta = %name, error = %e, "stop failed during start rollback");
        }
        if let Err(e) = self.engine.remove(name).await {
            tracing::warn!(zeta = %name, error = %e, "remove failed during start rollback");
        }
        if let Err(e) = self.store.delete_container_of_function(name) {
            tracing::warn!(zeta = %name, error = %e, "failed to drop container row during start rollback");
        }
        self.pns.release(host_port);
    }

    /// Wait for the engine to publish the container port on the host.
    async fn wait_for_endpoint(&self, name: &str) -> Result<RunnerEndpoint, ZetaError> {
        let deadline = tokio::time::Instant::now() + self.cfg.start_timeout;
        loop {
            let status = self.engine.get_container(name).await?;
            if let Some(endpoint) = status.endpoint {
                return Ok(endpoint);
            }
            if tokio::time::Instant::now() > deadline {
                return Err(ZetaError::StartTimeout(format!(
                    "unable to retrieve the runner hostname for '{name}'"
                )));
            }
            tokio::time::sleep(self.cfg.endpoint_poll_interval).await;
        }
    }

    /// Probe the runner until it answers `/is-running` or the deadline hits.
    async fn wait_until_ready(&self, name: &str, hostname: &str) -> Result<(), ZetaError> {
        let deadline = tokio::time::Instant::now() + self.cfg.start_timeout;
        let url = format!("{hostname}/is-running");
        loop {
            if self.is_up(name, &url).await {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                return Err(ZetaError::StartTimeout(format!(
                    "Zeta function '{name}' is not up, exited due to timeout"
                )));
            }
            tokio::time::sleep(self.cfg.probe_interval).await;
        }
    }

    /// Up means: the container runs and the agent inside answers.
    async fn is_up(&self, name: &str, url: &str) -> bool {
        match self.engine.is_running(name).await {
            Ok(true) => {}
            _ => {
                tracing::debug!(zeta = %name, "runner container is not running yet");
                return false;
            }
        }
        match self
            .http
            .get(url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Redeploy cleanup: drop everything a previous deployment of this name
    /// may have left behind. Unlike `delete_zeta` this succeeds when the
    /// name was never registered.
    async fn clean_zeta(&self, name: &str) -> Result<(), ZetaError> {
        let images = self.engine.images_with_prefix(name).await?;
        for image in &images {
            match self.engine.containers_of_image(&image.id).await {
                Ok(containers) => {
                    for container in containers {
                        if let Err(e) = self.engine.stop(&container.id).await {
                            tracing::debug!(container = %container.id, error = %e, "stop failed during cleanup");
                        }
                        if let Err(e) = self.engine.remove(&container.id).await {
                            tracing::warn!(container = %container.id, error = %e, "remove failed during cleanup");
                        }
                    }
                }
                Err(e) => {
                    tracing::info!(zeta = %name, error = %e, "no containers found during cleanup")
                }
            }
            self.remove_image_forced(&image.id).await;
        }

        if let Some(container) = self.store.delete_container_of_function(name)? {
            self.pns.release(container.host_port);
        }
        self.store.delete_function(name)
    }

    async fn remove_image_forced(&self, image_id: &str) {
        if self.engine.remove_image(image_id, false).await.is_ok() {
            return;
        }
        match self.engine.remove_image(image_id, true).await {
            Ok(()) => tracing::info!(image = %image_id, "force-removed runner image"),
            Err(e) => {
                tracing::warn!(image = %image_id, error = %e, "unable to remove the runner image")
            }
        }
    }
}

fn hostname_of(endpoint: &RunnerEndpoint) -> String {
    format!("http://{}:{}", endpoint.host_ip, endpoint.host_port)
}
