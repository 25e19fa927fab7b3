//! Partial teardown requested by the manifest's remove lists.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::agent::AgentApi;
use crate::engine::ContainerEngine;
use crate::error::{Result, RunnerError};
use crate::platform::docker::{collect_resource_names, naming, DockerPlatform};

impl<E, A> DockerPlatform<E, A>
where
    E: ContainerEngine,
    A: AgentApi,
{
    /// Remove the named services' containers and best-effort delete the
    /// resources their labels recorded.
    pub(crate) async fn remove_services(
        &self,
        job: Uuid,
        remove: Option<&[String]>,
    ) -> Result<()> {
        let Some(remove) = remove else {
            return Ok(());
        };

        let mut resource_names: BTreeSet<String> = BTreeSet::new();

        for service in remove {
            let container_name = naming::service_container_name(job, service);

            let Ok(inspect) = self.engine().container_inspect(&container_name).await else {
                continue;
            };
            collect_resource_names(&inspect, &mut resource_names);

            let _ = self.engine().container_stop(&container_name).await;
            if let Err(source) = self.engine().container_remove(&container_name, true).await {
                return Err(RunnerError::ContainerOperationFailed {
                    name: container_name,
                    op: "remove",
                    source,
                });
            }
            tracing::info!(container = %container_name, "removed service container");
        }

        for resource in resource_names {
            if let Err(err) = self.agent().delete_resource_by_name(&resource).await {
                tracing::warn!(resource = %resource, "failed to delete resource on agent: {err}");
            }
        }

        Ok(())
    }

    /// Remove the named volumes; already-gone volumes are success.
    pub(crate) async fn remove_volumes(&self, job: Uuid, remove: Option<&[String]>) -> Result<()> {
        let Some(remove) = remove else {
            return Ok(());
        };

        for volume in remove {
            if volume.is_empty() {
                continue;
            }

            let name = naming::named_volume_name(job, volume);
            match self.engine().volume_remove(&name).await {
                Ok(()) => {
                    tracing::info!(volume = %name, "removed volume");
                }
                Err(err) if err.is_not_found() => {}
                Err(source) => {
                    return Err(RunnerError::VolumeOperationFailed {
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
