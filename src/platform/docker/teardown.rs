//! Label-driven teardown of everything a job owns.
//!
//! Three discovery passes over the engine, keyed on the job label: containers
//! first (collecting their resource-name labels), then volumes, then
//! networks. Ownership is scoped to the job, not the run; artifacts from any
//! prior run are removed alike.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::agent::AgentApi;
use crate::engine::ContainerEngine;
use crate::error::{Result, RunnerError};
use crate::platform::docker::{collect_resource_names, job_selector, DockerPlatform};

impl<E, A> DockerPlatform<E, A>
where
    E: ContainerEngine,
    A: AgentApi,
{
    pub(crate) async fn teardown(&self, job: Uuid) -> Result<()> {
        self.teardown_services(job).await?;
        self.teardown_volumes(job).await?;
        self.teardown_networks(job).await
    }

    async fn teardown_services(&self, job: Uuid) -> Result<()> {
        let selector = job_selector(job);
        let containers = self.engine().container_list(&selector).await.map_err(|source| {
            RunnerError::ContainerOperationFailed {
                name: selector.clone(),
                op: "list",
                source,
            }
        })?;

        let mut resource_names: BTreeSet<String> = BTreeSet::new();

        for container in containers {
            let Some(id) = container.id else {
                continue;
            };

            let inspect = match self.engine().container_inspect(&id).await {
                Ok(inspect) => inspect,
                // Vanished between list and inspect.
                Err(err) if err.is_not_found() => continue,
                Err(source) => {
                    return Err(RunnerError::ContainerOperationFailed {
                        name: id,
                        op: "inspect",
                        source,
                    })
                }
            };
            collect_resource_names(&inspect, &mut resource_names);

            let _ = self.engine().container_stop(&id).await;
            match self.engine().container_remove(&id, true).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(source) => {
                    return Err(RunnerError::ContainerOperationFailed {
                        name: id,
                        op: "remove",
                        source,
                    })
                }
            }
        }

        // Resource records outlive containers; deleting them on the agent is
        // best-effort during teardown.
        for resource in resource_names {
            if let Err(err) = self.agent().delete_resource_by_name(&resource).await {
                tracing::warn!(resource = %resource, "failed to delete resource on agent: {err}");
            }
        }

        Ok(())
    }

    async fn teardown_volumes(&self, job: Uuid) -> Result<()> {
        let selector = job_selector(job);
        let volumes = self.engine().volume_list(&selector).await.map_err(|source| {
            RunnerError::VolumeOperationFailed {
                name: selector.clone(),
                op: "list",
                source,
            }
        })?;

        for volume in volumes {
            if volume.name.is_empty() {
                continue;
            }

            match self.engine().volume_remove(&volume.name).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(source) => {
                    return Err(RunnerError::VolumeOperationFailed {
                        name: volume.name,
                        op: "remove",
                        source,
                    })
                }
            }
        }

        Ok(())
    }

    async fn teardown_networks(&self, job: Uuid) -> Result<()> {
        let selector = job_selector(job);
        let networks = self.engine().network_list(&selector).await.map_err(|source| {
            RunnerError::NetworkOperationFailed {
                name: selector.clone(),
                op: "list",
                source,
            }
        })?;

        for network in networks {
            // Remove by id: network names are not unique across jobs.
            let (Some(name), Some(id)) = (network.name, network.id) else {
                continue;
            };
            if name.is_empty() || id.is_empty() {
                continue;
            }

            match self.engine().network_remove(&id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(source) => {
                    return Err(RunnerError::NetworkOperationFailed {
                        name,
                        op: "remove",
                        source,
                    })
                }
            }
        }

        Ok(())
    }
}
