use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::query_parameters::{
    BuildImageOptions, CreateContainerOptions, ListContainersOptions, ListImagesOptions,
    ListNetworksOptions, RemoveContainerOptions, RemoveImageOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::service::{ContainerCreateBody, HostConfig, NetworkCreateRequest, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;

use zeta_common::ZetaError;

use crate::runtime::{
    ContainerEngine, ContainerSpec, ContainerStatus, ContainerSummaryInfo, ImageInfo,
    RunnerEndpoint,
};

/// Container engine reached over its HTTP API on a local UNIX socket.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect(socket_path: &str) -> Result<Self, ZetaError> {
        let docker = Docker::connect_with_unix(socket_path, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| {
                ZetaError::EngineUnavailable(format!(
                    "engine connection over '{socket_path}' failed: {e}"
                ))
            })?;
        Ok(Self { docker })
    }
}

fn to_err(e: bollard::errors::Error) -> ZetaError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ZetaError::NotFound(e.to_string()),
        _ => ZetaError::EngineUnavailable(e.to_string()),
    }
}

fn build_context_tar(context_dir: &Path) -> Result<Vec<u8>, ZetaError> {
    let mut archive = tar::Builder::new(Vec::new());
    archive
        .append_dir_all(".", context_dir)
        .map_err(|e| ZetaError::BuildFailed(format!("failed to archive build context: {e}")))?;
    archive
        .into_inner()
        .map_err(|e| ZetaError::BuildFailed(format!("failed to finalize build context: {e}")))
}

/// Pick the first host binding the engine published for `container_port`.
/// Unspecified host addresses are normalized to loopback so the returned
/// endpoint is always dialable from the control plane.
pub(crate) fn endpoint_from_ports(
    ports: &HashMap<String, Option<Vec<PortBinding>>>,
    container_port: u16,
) -> Option<RunnerEndpoint> {
    let bindings = ports.get(&format!("{container_port}/tcp"))?.as_ref()?;
    let first = bindings.first()?;
    let host_port: u16 = first.host_port.as_deref()?.parse().ok()?;
    let host_ip = match first.host_ip.as_deref() {
        None | Some("") | Some("0.0.0.0") => "127.0.0.1".to_string(),
        Some(ip) => ip.to_string(),
    };
    Some(RunnerEndpoint { host_ip, host_port })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), ZetaError> {
        self.docker.ping().await.map_err(to_err)?;
        Ok(())
    }

    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<String, ZetaError> {
        let tar_bytes = build_context_tar(context_dir)?;

        let opts = BuildImageOptions {
            t: Some(tag.to_string()),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let body = bollard::body_full(tar_bytes.into());
        let mut stream = self.docker.build_image(opts, None, Some(body));
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(msg) = info.stream {
                        let msg = msg.trim();
                        if !msg.is_empty() {
                            tracing::debug!(%tag, "build: {msg}");
                        }
                    }
                    if let Some(detail) = info.error_detail {
                        return Err(ZetaError::BuildFailed(format!(
                            "engine build error for '{tag}': {}",
                            detail.message.unwrap_or_default()
                        )));
                    }
                }
                Err(e) => {
                    return Err(ZetaError::BuildFailed(format!(
                        "unable to build the image '{tag}': {e}"
                    )))
                }
            }
        }

        let inspect = self.docker.inspect_image(tag).await.map_err(to_err)?;
        inspect
            .id
            .ok_or_else(|| ZetaError::BuildFailed(format!("built image '{tag}' has no id")))
    }

    async fn list_images(&self) -> Result<Vec<ImageInfo>, ZetaError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::default()))
            .await
            .map_err(to_err)?;
        Ok(images
            .into_iter()
            .map(|image| ImageInfo {
                id: image.id,
                tags: image.repo_tags,
            })
            .collect())
    }

    async fn remove_image(&self, id: &str, force: bool) -> Result<(), ZetaError> {
        self.docker
            .remove_image(
                id,
                Some(RemoveImageOptions {
                    force,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, ZetaError> {
        let port_key = format!("{}/tcp", spec.container_port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: Some(spec.network.clone()),
            binds: Some(spec.binds.clone()),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(spec.image_id.clone()),
            exposed_ports: Some(vec![port_key]),
            host_config: Some(host_config),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(opts), body)
            .await
            .map_err(to_err)?;
        self.docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .map_err(to_err)?;

        tracing::info!(container = %spec.name, id = %created.id, host_port = spec.host_port, "runner container started");
        Ok(created.id)
    }

    async fn get_container(&self, name_or_id: &str) -> Result<ContainerStatus, ZetaError> {
        let info = self
            .docker
            .inspect_container(name_or_id, None)
            .await
            .map_err(to_err)?;

        let running = info
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        let status = info
            .state
            .as_ref()
            .and_then(|state| state.status.as_ref())
            .map(|status| status.to_string())
            .unwrap_or_default();
        let endpoint = info
            .network_settings
            .as_ref()
            .and_then(|settings| settings.ports.as_ref())
            .and_then(|ports| endpoint_from_ports(ports, zeta_common::RUNNER_PORT));

        Ok(ContainerStatus {
            id: info.id.unwrap_or_default(),
            name: info
                .name
                .map(|name| name.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            image_id: info.image.unwrap_or_default(),
            status,
            running,
            endpoint,
        })
    }

    async fn containers_of_image(
        &self,
        image_id: &str,
    ) -> Result<Vec<ContainerSummaryInfo>, ZetaError> {
        let opts = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(to_err)?;

        Ok(containers
            .into_iter()
            .filter(|container| container.image_id.as_deref() == Some(image_id))
            .map(|container| {
                let name = container
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|name| name.trim_start_matches('/').to_string())
                    .unwrap_or_default();
                ContainerSummaryInfo {
                    id: container.id.unwrap_or_default(),
                    name,
                    image_id: container.image_id.unwrap_or_default(),
                    state: container
                        .state
                        .map(|state| state.to_string())
                        .unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn is_running(&self, name: &str) -> Result<bool, ZetaError> {
        match self.docker.inspect_container(name, None).await {
            Ok(info) => Ok(info.state.and_then(|state| state.running).unwrap_or(false)),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(to_err(e)),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, ZetaError> {
        match self.docker.inspect_container(name, None).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(to_err(e)),
        }
    }

    async fn stop(&self, name_or_id: &str) -> Result<(), ZetaError> {
        self.docker
            .stop_container(
                name_or_id,
                Some(StopContainerOptions {
                    t: Some(10),
                    signal: None,
                }),
            )
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn restart(&self, name_or_id: &str) -> Result<(), ZetaError> {
        self.docker
            .restart_container(name_or_id, None::<RestartContainerOptions>)
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn remove(&self, name_or_id: &str) -> Result<(), ZetaError> {
        if let Err(e) = self
            .docker
            .remove_container(name_or_id, None::<RemoveContainerOptions>)
            .await
        {
            tracing::info!(container = %name_or_id, error = %e, "forcefully removing container");
            self.docker
                .remove_container(
                    name_or_id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(to_err)?;
        }
        Ok(())
    }

    async fn create_network(&self, name: &str) -> Result<(), ZetaError> {
        self.docker
            .create_network(NetworkCreateRequest {
                name: name.to_string(),
                driver: Some("bridge".to_string()),
                ..Default::default()
            })
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn network_exists(&self, name: &str) -> Result<bool, ZetaError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions>)
            .await
            .map_err(to_err)?;
        Ok(networks
            .iter()
            .any(|network| network.name.as_deref() == Some(name)))
    }

    async fn remove_network(&self, name: &str) -> Result<(), ZetaError> {
        self.docker.remove_network(name).await.map_err(to_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports_with(
        key: &str,
        bindings: Option<Vec<PortBinding>>,
    ) -> HashMap<String, Option<Vec<PortBinding>>> {
        let mut ports = HashMap::new();
        ports.insert(key.to_string(), bindings);
        ports
    }

    #[test]
    fn test_endpoint_absent_until_published() {
        assert_eq!(endpoint_from_ports(&HashMap::new(), 8000), None);
        assert_eq!(
            endpoint_from_ports(&ports_with("8000/tcp", None), 8000),
            None
        );
        assert_eq!(
            endpoint_from_ports(&ports_with("8000/tcp", Some(vec![])), 8000),
            None
        );
    }

    #[test]
    fn test_endpoint_from_published_port() {
        let ports = ports_with(
            "8000/tcp",
            Some(vec![PortBinding {
                host_ip: Some("192.168.1.20".to_string()),
                host_port: Some("9090".to_string()),
            }]),
        );
        assert_eq!(
            endpoint_from_ports(&ports, 8000),
            Some(RunnerEndpoint {
                host_ip: "192.168.1.20".to_string(),
                host_port: 9090,
            })
        );
    }

    #[test]
    fn test_endpoint_normalizes_wildcard_host() {
        let ports = ports_with(
            "8000/tcp",
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("9090".to_string()),
            }]),
        );
        let endpoint = endpoint_from_ports(&ports, 8000).unwrap();
        assert_eq!(endpoint.host_ip, "127.0.0.1");
    }

    #[test]
    fn test_endpoint_ignores_other_ports() {
        let ports = ports_with(
            "9000/tcp",
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some("9090".to_string()),
            }]),
        );
        assert_eq!(endpoint_from_ports(&ports, 8000), None);
    }

    #[test]
    fn test_build_context_tar_includes_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("function.py"), "def main_handler(p):\n    return p\n")
            .unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM base\n").unwrap();

        let bytes = build_context_tar(dir.path()).unwrap();
        let mut archive = tar::Archive::new(&bytes[..]);
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        names.sort();
        assert!(names.iter().any(|n| n.ends_with("Dockerfile")));
        assert!(names.iter().any(|n| n.ends_with("function.py")));
    }
}
