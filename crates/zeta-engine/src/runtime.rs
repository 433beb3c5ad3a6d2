use std::path::Path;

use async_trait::async_trait;

use zeta_common::ZetaError;

/// Tag fragment identifying the shared base runner image. Images carrying it
/// are never treated as per-function runner images.
pub const BASE_RUNNER_MARKER: &str = "base-runner";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub tags: Vec<String>,
}

/// Everything needed to start one runner container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image_id: String,
    pub container_port: u16,
    pub host_port: u16,
    pub network: String,
    /// Bind mounts, `host_path:container_path:opts` form.
    pub binds: Vec<String>,
}

/// Host-side address a container port was published on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerEndpoint {
    pub host_ip: String,
    pub host_port: u16,
}

#[derive(Debug, Clone)]
pub struct ContainerStatus {
    pub id: String,
    pub name: String,
    pub image_id: String,
    /// Engine lifecycle state, e.g. "running" or "exited".
    pub status: String,
    pub running: bool,
    /// None until the engine has published the container port on the host.
    pub endpoint: Option<RunnerEndpoint>,
}

impl ContainerStatus {
    /// The short id runners also report in heartbeats.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

#[derive(Debug, Clone)]
pub struct ContainerSummaryInfo {
    pub id: String,
    pub name: String,
    pub image_id: String,
    pub state: String,
}

/// Narrow contract over the container engine.
///
/// Failures are either `NotFound` (permanent: the named thing does not
/// exist) or `EngineUnavailable` (transient engine trouble); image builds
/// fail with `BuildFailed`.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> Result<(), ZetaError>;

    /// Build an image from a prepared context directory, returning its id.
    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<String, ZetaError>;

    async fn list_images(&self) -> Result<Vec<ImageInfo>, ZetaError>;

    /// Images whose tag starts with `prefix`, excluding the base runner.
    async fn images_with_prefix(&self, prefix: &str) -> Result<Vec<ImageInfo>, ZetaError> {
        Ok(self
            .list_images()
            .await?
            .into_iter()
            .filter(|image| image.tags.iter().any(|tag| is_runner_tag(tag, prefix)))
            .collect())
    }

    async fn remove_image(&self, id: &str, force: bool) -> Result<(), ZetaError>;

    /// Create and start a container, returning its id.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, ZetaError>;

    async fn get_container(&self, name_or_id: &str) -> Result<ContainerStatus, ZetaError>;

    /// Containers created from the given image, in any state.
    async fn containers_of_image(
        &self,
        image_id: &str,
    ) -> Result<Vec<ContainerSummaryInfo>, ZetaError>;

    async fn is_running(&self, name: &str) -> Result<bool, ZetaError>;

    async fn exists(&self, name: &str) -> Result<bool, ZetaError>;

    async fn stop(&self, name_or_id: &str) -> Result<(), ZetaError>;

    async fn restart(&self, name_or_id: &str) -> Result<(), ZetaError>;

    /// Remove a container, retrying with force when the graceful attempt
    /// fails.
    async fn remove(&self, name_or_id: &str) -> Result<(), ZetaError>;

    /// Create a bridge network of the given name.
    async fn create_network(&self, name: &str) -> Result<(), ZetaError>;

    async fn network_exists(&self, name: &str) -> Result<bool, ZetaError>;

    async fn remove_network(&self, name: &str) -> Result<(), ZetaError>;
}

pub fn is_runner_tag(tag: &str, prefix: &str) -> bool {
    tag.starts_with(prefix) && !tag.contains(BASE_RUNNER_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_tag_matches_prefix() {
        assert!(is_runner_tag("echo-runner-image-1234:latest", "echo"));
        assert!(!is_runner_tag("greet-runner-image-1234:latest", "echo"));
    }

    #[test]
    fn test_runner_tag_excludes_base_runner() {
        assert!(!is_runner_tag("python-base-runner:latest", "python"));
        assert!(!is_runner_tag("echo-base-runner:latest", "echo"));
    }

    #[test]
    fn test_short_id_truncates_long_ids() {
        let status = ContainerStatus {
            id: "cafebabe1234deadbeef5678".to_string(),
            name: "echo".to_string(),
            image_id: "sha256:img".to_string(),
            status: "running".to_string(),
            running: true,
            endpoint: None,
        };
        assert_eq!(status.short_id(), "cafebabe1234");
    }
}
