//! Docker Engine implementation of the container engine contract.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::models::{ContainerInspectResponse, ContainerSummary, Network, Volume};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions};
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};

use crate::engine::{ContainerEngine, EngineError, EngineResult, LogStream};

/// Container engine backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the Docker daemon.
    ///
    /// Tries these locations in order:
    /// 1. `DOCKER_HOST` env var (bollard default)
    /// 2. `/var/run/docker.sock` (Linux default)
    /// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
    pub async fn connect() -> EngineResult<Self> {
        if let Ok(docker) = Docker::connect_with_local_defaults() {
            if docker.ping().await.is_ok() {
                return Ok(Self::new(docker));
            }
        }

        if let Some(home) = std::env::var_os("HOME") {
            let desktop_sock = std::path::Path::new(&home).join(".docker/run/docker.sock");
            if desktop_sock.exists() {
                let sock_str = desktop_sock.to_string_lossy();
                if let Ok(docker) =
                    Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
                {
                    if docker.ping().await.is_ok() {
                        return Ok(Self::new(docker));
                    }
                }
            }
        }

        Err(EngineError::Unavailable {
            reason: "Docker socket not found or daemon not responding".to_string(),
        })
    }
}

fn map_err(err: bollard::errors::Error) -> EngineError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound { message },
        other => EngineError::Api(other),
    }
}

fn label_filters(selector: &str) -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![selector.to_string()])])
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn volume_inspect(&self, name: &str) -> EngineResult<Volume> {
        self.docker.inspect_volume(name).await.map_err(map_err)
    }

    async fn volume_create(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        self.docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                labels,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn volume_remove(&self, name: &str) -> EngineResult<()> {
        self.docker
            .remove_volume(name, None)
            .await
            .map_err(map_err)
    }

    async fn volume_list(&self, label_selector: &str) -> EngineResult<Vec<Volume>> {
        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions {
                filters: label_filters(label_selector),
            }))
            .await
            .map_err(map_err)?;
        Ok(response.volumes.unwrap_or_default())
    }

    async fn network_inspect(&self, name: &str) -> EngineResult<Network> {
        self.docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(map_err)
    }

    async fn network_create(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                labels,
                ..Default::default()
            })
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn network_remove(&self, id: &str) -> EngineResult<()> {
        self.docker.remove_network(id).await.map_err(map_err)
    }

    async fn network_list(&self, label_selector: &str) -> EngineResult<Vec<Network>> {
        self.docker
            .list_networks(Some(ListNetworksOptions {
                filters: label_filters(label_selector),
            }))
            .await
            .map_err(map_err)
    }

    async fn container_inspect(
        &self,
        name_or_id: &str,
    ) -> EngineResult<ContainerInspectResponse> {
        self.docker
            .inspect_container(name_or_id, None)
            .await
            .map_err(map_err)
    }

    async fn container_create(&self, name: &str, config: Config<String>) -> EngineResult<String> {
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(map_err)?;
        Ok(response.id)
    }

    async fn container_start(&self, id: &str) -> EngineResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_err)
    }

    async fn container_stop(&self, id: &str) -> EngineResult<()> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(map_err)
    }

    async fn container_remove(&self, id: &str, force: bool) -> EngineResult<()> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    v: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn container_list(&self, label_selector: &str) -> EngineResult<Vec<ContainerSummary>> {
        self.docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: label_filters(label_selector),
                ..Default::default()
            }))
            .await
            .map_err(map_err)
    }

    fn container_logs(&self, id: &str) -> LogStream {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            timestamps: false,
            ..Default::default()
        };
        self.docker.logs(id, Some(options)).map_err(map_err).boxed()
    }

    async fn container_wait(&self, id: &str) -> EngineResult<i64> {
        let mut stream = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as a wait error; the status is
            // for the reconciler to judge, not the transport.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(err)) => Err(map_err(err)),
            None => Err(EngineError::Unavailable {
                reason: "container wait stream ended unexpectedly".to_string(),
            }),
        }
    }
}
