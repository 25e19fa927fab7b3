//! Static manifest validation.
//!
//! Runs before any engine mutation: dependency existence, acyclicity, volume
//! declarations, mount-path legality. The only engine traffic is the final
//! straggler check, which accepts mounts of volumes that were pre-provisioned
//! outside the manifest, provided they already exist under the job's
//! engine-name.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use uuid::Uuid;

use crate::agent::AgentApi;
use crate::engine::ContainerEngine;
use crate::error::{Result, RunnerError};
use crate::manifest::{Metadata, ServiceSpec};
use crate::platform::docker::{naming, DockerPlatform};

impl<E, A> DockerPlatform<E, A>
where
    E: ContainerEngine,
    A: AgentApi,
{
    /// Validate the manifest; first failure aborts.
    pub(crate) async fn check_metadata(&self, job: Uuid, metadata: &Metadata) -> Result<()> {
        if metadata.services.is_empty() {
            return Ok(());
        }

        check_depends_on_exist(&metadata.services)?;
        check_circular_dependencies(&metadata.services)?;
        self.check_volumes(job, &metadata.services, metadata.volumes.as_deref())
            .await
    }

    async fn check_volumes(
        &self,
        job: Uuid,
        services: &BTreeMap<String, ServiceSpec>,
        volumes: Option<&[String]>,
    ) -> Result<()> {
        let declared = declared_volume_set(volumes)?;
        let stragglers = check_service_volume_mounts(services, &declared)?;

        // A straggler is acceptable only when the engine already holds a
        // volume under the job's deterministic name for it.
        for logical in stragglers {
            let engine_name = naming::named_volume_name(job, &logical);
            if let Err(source) = self.engine().volume_inspect(&engine_name).await {
                return Err(RunnerError::UnknownVolume {
                    volume: logical,
                    source,
                });
            }
        }

        Ok(())
    }
}

/// Every `depends_on` entry must name a sibling service. Services iterate in
/// key order, so error messages are stable.
pub(crate) fn check_depends_on_exist(services: &BTreeMap<String, ServiceSpec>) -> Result<()> {
    for (service_key, spec) in services {
        let Some(depends_on) = &spec.depends_on else {
            continue;
        };
        for dependency in depends_on {
            if !services.contains_key(dependency) {
                return Err(RunnerError::DependsOnMissing {
                    service: service_key.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Visited,
}

/// DFS with three-color marking; on a back-edge the cycle is reconstructed
/// from parent pointers recorded during descent.
pub(crate) fn check_circular_dependencies(
    services: &BTreeMap<String, ServiceSpec>,
) -> Result<()> {
    let mut state: HashMap<&str, Mark> = HashMap::with_capacity(services.len());
    let mut parent: HashMap<&str, &str> = HashMap::new();

    for node in services.keys() {
        if *state.get(node.as_str()).unwrap_or(&Mark::Unvisited) == Mark::Unvisited {
            dfs(services, node, &mut state, &mut parent)?;
        }
    }

    Ok(())
}

fn dfs<'a>(
    services: &'a BTreeMap<String, ServiceSpec>,
    node: &'a str,
    state: &mut HashMap<&'a str, Mark>,
    parent: &mut HashMap<&'a str, &'a str>,
) -> Result<()> {
    match state.get(node).unwrap_or(&Mark::Unvisited) {
        Mark::Visiting => {
            return Err(RunnerError::CycleDetected {
                cycle: reconstruct_cycle(parent, node),
            });
        }
        Mark::Visited => return Ok(()),
        Mark::Unvisited => {}
    }

    state.insert(node, Mark::Visiting);

    if let Some(spec) = services.get(node) {
        if let Some(depends_on) = &spec.depends_on {
            for dependency in depends_on {
                // Existence is checked separately; skip unknown keys here.
                let Some((dep_key, _)) = services.get_key_value(dependency) else {
                    continue;
                };
                parent.entry(dep_key.as_str()).or_insert(node);
                dfs(services, dep_key, state, parent)?;
            }
        }
    }

    state.insert(node, Mark::Visited);
    Ok(())
}

/// Walk parent pointers from the back-edge target until a node repeats, then
/// format the path forward as `"a" -> "b" -> "a"`.
fn reconstruct_cycle(parent: &HashMap<&str, &str>, start: &str) -> String {
    let mut seen: BTreeSet<&str> = BTreeSet::from([start]);
    let mut path: Vec<&str> = vec![start];

    let mut current = start;
    while let Some(&up) = parent.get(current) {
        path.push(up);
        if seen.contains(up) {
            break;
        }
        seen.insert(up);
        current = up;
    }

    path.reverse();
    if path.last() != path.first() {
        let first = path[0];
        path.push(first);
    }

    path.iter()
        .map(|node| format!("{node:?}"))
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Deduplicate declared volume names; empties and duplicates are rejected.
pub(crate) fn declared_volume_set(volumes: Option<&[String]>) -> Result<BTreeSet<String>> {
    let mut set = BTreeSet::new();
    let Some(volumes) = volumes else {
        return Ok(set);
    };

    for volume in volumes {
        let name = volume.trim();
        if name.is_empty() {
            return Err(RunnerError::VolumeNameInvalid {
                reason: "metadata.volumes contains an empty name".to_string(),
            });
        }
        if !set.insert(name.to_string()) {
            return Err(RunnerError::VolumeNameInvalid {
                reason: format!("metadata.volumes contains duplicate volume {name:?}"),
            });
        }
    }

    Ok(set)
}

/// Check every service's mounts and collect stragglers: named mounts whose
/// volume is not declared. A `null` name means the runner-provided scratch
/// volume and bypasses the declared-set check.
pub(crate) fn check_service_volume_mounts(
    services: &BTreeMap<String, ServiceSpec>,
    declared: &BTreeSet<String>,
) -> Result<BTreeSet<String>> {
    let mut stragglers = BTreeSet::new();

    for (service_key, spec) in services {
        let Some(mounts) = &spec.volumes else {
            continue;
        };

        let mut seen_mount_paths: BTreeSet<&str> = BTreeSet::new();

        for mount in mounts {
            let mount_path = mount.mount_path.trim();
            if mount_path.is_empty() {
                return Err(RunnerError::MountPathInvalid {
                    service: service_key.clone(),
                    path: mount.mount_path.clone(),
                    reason: "mount_path is empty".to_string(),
                });
            }
            if !mount_path.starts_with('/') {
                return Err(RunnerError::MountPathInvalid {
                    service: service_key.clone(),
                    path: mount.mount_path.clone(),
                    reason: "mount_path must be absolute".to_string(),
                });
            }
            if !seen_mount_paths.insert(mount_path) {
                return Err(RunnerError::DuplicateMountPath {
                    service: service_key.clone(),
                    path: mount_path.to_string(),
                });
            }

            let Some(name) = &mount.name else {
                continue;
            };

            let name = name.trim();
            if name.is_empty() {
                return Err(RunnerError::VolumeNameInvalid {
                    reason: format!("service {service_key:?} has a volume with empty name"),
                });
            }

            if !declared.contains(name) {
                stragglers.insert(name.to_string());
            }
        }
    }

    Ok(stragglers)
}
