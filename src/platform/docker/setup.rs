//! Manifest reconciliation: volumes, networks, services, connections.
//!
//! Creation primitives all follow one race-safe shape: inspect, create, and
//! on a create failure re-inspect before surfacing the error, so a second
//! runner performing the identical action cannot fail the run. Containers
//! are the exception to idempotence: a service container is always replaced
//! wholesale, never updated in place.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use bollard::container::{Config, NetworkingConfig};
use bollard::models::{
    EndpointSettings, HostConfig, Mount, MountTypeEnum, PortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use serde_json::Value;
use tokio::io::{stderr, stdout};
use uuid::Uuid;

use crate::agent::{AgentApi, CreateConnectionRequest, CreateResource};
use crate::engine::ContainerEngine;
use crate::error::{Result, RunnerError};
use crate::manifest::{ConnectionPlan, Metadata, ResourceRef, ServiceSpec};
use crate::platform::docker::{
    collect_resource_names, logs, naming, DockerPlatform, DockerPlatformConnection, LABEL_JOB,
    LABEL_KIND, LABEL_NET, LABEL_RESOURCES, LABEL_RUN, LABEL_SERVICE, LABEL_VOLUME,
};

impl<E, A> DockerPlatform<E, A>
where
    E: ContainerEngine,
    A: AgentApi,
{
    /// Ensure every declared volume exists, labeled with the job.
    pub(crate) async fn volume_setup(
        &self,
        job: Uuid,
        run: Uuid,
        metadata: &Metadata,
    ) -> Result<()> {
        let Some(volumes) = metadata.volumes.as_ref() else {
            return Ok(());
        };

        for logical in volumes {
            let name = naming::named_volume_name(job, logical);

            match self.engine().volume_inspect(&name).await {
                Ok(_) => continue,
                Err(err) if err.is_not_found() => {}
                Err(source) => {
                    return Err(RunnerError::VolumeOperationFailed {
                        name,
                        op: "inspect",
                        source,
                    })
                }
            }

            let labels = HashMap::from([
                (LABEL_JOB.to_string(), job.to_string()),
                (LABEL_RUN.to_string(), run.to_string()),
                (LABEL_VOLUME.to_string(), logical.clone()),
            ]);

            if let Err(source) = self.engine().volume_create(&name, labels).await {
                // A concurrent runner may have won the create; re-inspect
                // rather than pattern-matching the error.
                if self.engine().volume_inspect(&name).await.is_ok() {
                    continue;
                }
                return Err(RunnerError::VolumeOperationFailed {
                    name,
                    op: "create",
                    source,
                });
            }

            tracing::debug!(volume = %name, "created volume");
        }

        Ok(())
    }

    /// Ensure a network exists. `created` is threaded through the whole run
    /// so the first caller pays the inspect/create cost and later services
    /// skip straight to attach.
    async fn ensure_network(
        &self,
        created: &mut HashSet<String>,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        if created.contains(name) {
            return Ok(());
        }

        if self.engine().network_inspect(name).await.is_err() {
            if let Err(source) = self.engine().network_create(name, labels).await {
                if self.engine().network_inspect(name).await.is_err() {
                    return Err(RunnerError::NetworkOperationFailed {
                        name: name.to_string(),
                        op: "create",
                        source,
                    });
                }
            }
            tracing::debug!(network = %name, "ensured network");
        }

        created.insert(name.to_string());
        Ok(())
    }

    /// Reconcile one service: compute its attachment set, replace its
    /// container, and publish the resources it produces.
    pub(crate) async fn setup_service(
        &self,
        job: Uuid,
        run: Uuid,
        created_networks: &mut HashSet<String>,
        service_key: &str,
        service: &ServiceSpec,
    ) -> Result<()> {
        let is_runner = service.is_runner();

        // Attachment set: group networks, consumed platform networks, and
        // per-resource networks; fall back to the default job network.
        let mut attachments: BTreeSet<String> = BTreeSet::new();

        if let Some(groups) = &service.network_groups {
            for group in groups {
                let net_name = naming::group_network_name(job, group);
                let labels = HashMap::from([
                    (LABEL_JOB.to_string(), job.to_string()),
                    (LABEL_RUN.to_string(), run.to_string()),
                    (LABEL_NET.to_string(), group.clone()),
                    (LABEL_KIND.to_string(), "group".to_string()),
                ]);
                self.ensure_network(created_networks, &net_name, labels)
                    .await?;
                attachments.insert(net_name);
            }
        }

        if let Some(connections) = &service.connections {
            for connection in connections {
                let Some(data) = connection.platform_data() else {
                    continue;
                };

                let wiring: DockerPlatformConnection = serde_json::from_value(data.clone())
                    .map_err(|err| RunnerError::PlatformConnectionInvalid {
                        reason: err.to_string(),
                    })?;
                if wiring.network.is_empty() {
                    return Err(RunnerError::PlatformConnectionInvalid {
                        reason: "platform connection network is required".to_string(),
                    });
                }

                // Connection networks are created by other jobs. Use the
                // name exactly as provided, never job-prefixed.
                if let Err(source) = self.engine().network_inspect(&wiring.network).await {
                    return Err(RunnerError::PlatformNetworkMissing {
                        network: wiring.network,
                        source,
                    });
                }

                attachments.insert(wiring.network);
            }
        }

        let mut resources: Vec<CreateResource> = Vec::new();
        let mut resource_names: BTreeSet<String> = BTreeSet::new();

        if let Some(specs) = &service.resources {
            for spec in specs {
                if is_runner {
                    // A runner's resources have no backing container once it
                    // exits; there is no network to wire consumers into.
                    resources.push(CreateResource {
                        resource_type: spec.resource_type.clone(),
                        name: spec.name.clone(),
                        platform_connection: None,
                        public_connection: spec.public_connection.clone(),
                        metadata: spec.metadata.clone(),
                    });
                    continue;
                }

                let net_name = naming::resource_network_name(job, &spec.name);
                let labels = HashMap::from([
                    (LABEL_JOB.to_string(), job.to_string()),
                    (LABEL_RUN.to_string(), run.to_string()),
                    (LABEL_NET.to_string(), spec.name.clone()),
                    (LABEL_KIND.to_string(), "resource".to_string()),
                ]);
                self.ensure_network(created_networks, &net_name, labels)
                    .await?;

                resources.push(CreateResource {
                    resource_type: spec.resource_type.clone(),
                    name: spec.name.clone(),
                    platform_connection: Some(serde_json::json!({ "network": net_name })),
                    public_connection: spec.public_connection.clone(),
                    metadata: spec.metadata.clone(),
                });
                resource_names.insert(spec.name.clone());

                // The service joins its own resource network so it can reach
                // the resource it fronts.
                attachments.insert(net_name);
            }
        }

        if attachments.is_empty() {
            let job_net = naming::job_network_name(job);
            let labels = HashMap::from([
                (LABEL_JOB.to_string(), job.to_string()),
                (LABEL_RUN.to_string(), run.to_string()),
            ]);
            self.ensure_network(created_networks, &job_net, labels)
                .await?;
            attachments.insert(job_net);
        }

        let container_name = naming::service_container_name(job, service_key);

        // Replace any prior container wholesale, carrying its resource-name
        // label forward so records published by earlier runs stay labeled.
        if let Ok(inspect) = self.engine().container_inspect(&container_name).await {
            collect_resource_names(&inspect, &mut resource_names);

            let _ = self.engine().container_stop(&container_name).await;
            if let Err(source) = self.engine().container_remove(&container_name, true).await {
                return Err(RunnerError::ContainerOperationFailed {
                    name: container_name,
                    op: "remove",
                    source,
                });
            }
        }

        let env: Vec<String> = service
            .environment
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let mut mounts: Vec<Mount> = Vec::new();
        if let Some(volume_mounts) = &service.volumes {
            for mount in volume_mounts {
                if mount.mount_path.trim().is_empty() {
                    return Err(RunnerError::MountPathInvalid {
                        service: service_key.to_string(),
                        path: mount.mount_path.clone(),
                        reason: "mount_path is empty".to_string(),
                    });
                }

                let source = match &mount.name {
                    Some(name) => naming::named_volume_name(job, name),
                    None => naming::runner_volume_name(job),
                };

                mounts.push(Mount {
                    target: Some(mount.mount_path.clone()),
                    source: Some(source),
                    typ: Some(MountTypeEnum::VOLUME),
                    ..Default::default()
                });
            }
        }

        let mut exposed: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_map: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        if let Some(bindings) = &service.bindings {
            for binding in bindings {
                let Some(container_port) = binding.container_port else {
                    continue;
                };

                for proto in ["tcp", "udp"] {
                    let port_key = format!("{container_port}/{proto}");
                    exposed.insert(port_key.clone(), HashMap::new());

                    let Some(host_port) = binding.host_port else {
                        continue;
                    };
                    let host_ip = binding.host_ip.as_deref().unwrap_or("0.0.0.0");
                    if host_ip.parse::<std::net::IpAddr>().is_err() {
                        return Err(RunnerError::InvalidHostIp {
                            service: service_key.to_string(),
                            addr: host_ip.to_string(),
                        });
                    }

                    port_map
                        .entry(port_key)
                        .or_insert_with(|| Some(Vec::new()))
                        .get_or_insert_with(Vec::new)
                        .push(PortBinding {
                            host_ip: Some(host_ip.to_string()),
                            host_port: Some(host_port.to_string()),
                        });
                }
            }
        }

        let mut labels: HashMap<String, String> = HashMap::from([
            (LABEL_JOB.to_string(), job.to_string()),
            (LABEL_RUN.to_string(), run.to_string()),
            (LABEL_SERVICE.to_string(), service_key.to_string()),
        ]);
        if !resource_names.is_empty() {
            let names =
                Value::Array(resource_names.iter().cloned().map(Value::String).collect());
            labels.insert(LABEL_RESOURCES.to_string(), names.to_string());
        }

        let restart_policy = if is_runner {
            // One-shot: the exit status is the signal; never restart.
            RestartPolicyNameEnum::NO
        } else {
            RestartPolicyNameEnum::ALWAYS
        };

        let host_config = HostConfig {
            mounts: Some(mounts),
            port_bindings: Some(port_map),
            restart_policy: Some(RestartPolicy {
                name: Some(restart_policy),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut endpoints: HashMap<String, EndpointSettings> = HashMap::new();
        for network in &attachments {
            let mut endpoint = EndpointSettings::default();
            if let Some(aliases) = &service.aliases {
                if !aliases.is_empty() {
                    endpoint.aliases = Some(aliases.clone());
                }
            }
            endpoints.insert(network.clone(), endpoint);
        }

        let config = Config {
            image: Some(service.image.clone()),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: Some(exposed),
            host_config: Some(host_config),
            networking_config: Some(NetworkingConfig {
                endpoints_config: endpoints,
            }),
            ..Default::default()
        };

        let container_id = match self.engine().container_create(&container_name, config).await {
            Ok(id) => id,
            Err(create_err) => {
                // Race-safe: a concurrent runner created the identical twin.
                match self.engine().container_inspect(&container_name).await {
                    Ok(inspect) => inspect.id.unwrap_or_else(|| container_name.clone()),
                    Err(_) => {
                        return Err(RunnerError::ContainerOperationFailed {
                            name: container_name,
                            op: "create",
                            source: create_err,
                        })
                    }
                }
            }
        };

        if let Err(source) = self.engine().container_start(&container_id).await {
            return Err(RunnerError::ContainerOperationFailed {
                name: container_name,
                op: "start",
                source,
            });
        }

        tracing::info!(service = service_key, container = %container_name, "started container");

        if is_runner {
            self.wait_for_runner(&container_name, &container_id).await?;
        }

        for resource in &resources {
            if let Err(err) = self.agent().create_resource(resource).await {
                tracing::error!(resource = %resource.name, "failed to publish resource");
                return Err(err.into());
            }
            tracing::debug!(resource = %resource.name, "published resource");
        }

        Ok(())
    }

    /// Stream a runner's logs to our stdout/stderr, wait for it to exit,
    /// and remove it. Non-zero exit is fatal after the container is gone.
    async fn wait_for_runner(&self, container_name: &str, container_id: &str) -> Result<()> {
        let stream = self.engine().container_logs(container_id);
        let log_task = tokio::spawn(logs::demux(stream, stdout(), stderr()));

        let status = self
            .engine()
            .container_wait(container_id)
            .await
            .map_err(|source| RunnerError::ContainerOperationFailed {
                name: container_name.to_string(),
                op: "wait",
                source,
            })?;

        // The log stream ends when the container exits; anything other than
        // clean EOF is worth surfacing.
        match log_task.await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(RunnerError::LogStreamFailed {
                    name: container_name.to_string(),
                    source,
                })
            }
            Err(join_err) => {
                return Err(RunnerError::LogStreamFailed {
                    name: container_name.to_string(),
                    source: std::io::Error::other(join_err),
                })
            }
        }

        if let Err(source) = self.engine().container_remove(container_id, true).await {
            return Err(RunnerError::ContainerOperationFailed {
                name: container_name.to_string(),
                op: "remove",
                source,
            });
        }

        if status != 0 {
            return Err(RunnerError::RunnerExited {
                name: container_name.to_string(),
                status,
            });
        }

        Ok(())
    }

    /// Reconcile all services in dependency order.
    ///
    /// Pass-based rather than Kahn's algorithm on purpose: a runner-role
    /// service blocks its pass until it exits, and downstream services must
    /// observe its side effects before starting.
    pub(crate) async fn service_setup(
        &self,
        job: Uuid,
        run: Uuid,
        metadata: &Metadata,
    ) -> Result<()> {
        if metadata.services.is_empty() {
            return Ok(());
        }

        let mut remaining: BTreeMap<String, &ServiceSpec> = metadata
            .services
            .iter()
            .map(|(key, spec)| (key.clone(), spec))
            .collect();
        let mut completed: HashSet<String> = HashSet::new();
        let mut created_networks: HashSet<String> = HashSet::new();

        while !remaining.is_empty() {
            let runnable: Vec<String> = remaining
                .iter()
                .filter(|(_, spec)| {
                    spec.depends_on.as_ref().map_or(true, |deps| {
                        deps.iter().all(|dep| completed.contains(dep))
                    })
                })
                .map(|(key, _)| key.clone())
                .collect();

            // Unreachable once validation passed; defensive against a graph
            // that deadlocks anyway.
            if runnable.is_empty() {
                return Err(RunnerError::DeadlockedGraph {
                    remaining: remaining.keys().cloned().collect(),
                });
            }

            for key in runnable {
                if let Some(spec) = remaining.remove(&key) {
                    self.setup_service(job, run, &mut created_networks, &key, spec)
                        .await?;
                    completed.insert(key);
                }
            }
        }

        Ok(())
    }

    /// Apply the connection plan, strictly after all services are reconciled.
    pub(crate) async fn setup_connections(&self, plan: Option<&ConnectionPlan>) -> Result<()> {
        let Some(plan) = plan else {
            return Ok(());
        };

        if let Some(create) = &plan.create {
            for spec in create {
                let resource_id = resolve_resource_id(&spec.resource)?;
                // The agent returns the new connection's id; nothing
                // downstream consumes it yet.
                self.agent()
                    .create_connection(&CreateConnectionRequest {
                        resource: resource_id,
                        job: spec.job,
                        metadata: spec.metadata.clone(),
                    })
                    .await?;
                tracing::debug!(resource = %resource_id, job = %spec.job, "created connection");
            }
        }

        if let Some(remove) = &plan.remove {
            for spec in remove {
                if let Some(id) = spec.id {
                    let Some(resource_ref) = &spec.resource else {
                        return Err(RunnerError::ResourceRefRequiredForDelete { id });
                    };
                    let resource_id = resolve_resource_id(resource_ref)?;
                    self.agent().delete_connection(resource_id, id).await?;
                    continue;
                }

                // Resource-only removal would need a list-connections
                // endpoint the agent does not offer.
                if spec.resource.is_some() {
                    return Err(RunnerError::BulkConnectionRemovalUnsupported);
                }
            }
        }

        Ok(())
    }
}

/// Resolve a resource ref to a UUID. Only the explicit-id form resolves at
/// the runner layer; there is no (service, name) lookup mechanism here.
fn resolve_resource_id(resource_ref: &ResourceRef) -> Result<Uuid> {
    if let Some(id) = resource_ref.id {
        return Ok(id);
    }
    Err(RunnerError::UnresolvableResourceRef {
        service: resource_ref.service.clone(),
        name: resource_ref.name.clone(),
    })
}
