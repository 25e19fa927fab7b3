//! Docker platform: reconciles a job's manifest against the Docker Engine.
//!
//! One invocation walks this pipeline for a `setup` action:
//!
//! ```text
//! validate manifest ──► provision volumes ──► schedule services
//!                                                   │
//!                              (per service) ensure networks, replace
//!                               container, publish resources to agent
//!                                                   │
//!                        remove_services ──► remove_volumes ──► connections
//! ```
//!
//! A `teardown` action instead discovers everything labeled with the job and
//! removes it. All artifacts carry the `deploy-runner.*` labels below so a
//! later run can find prior state without a database.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentApi;
use crate::config::{Configuration, ACTION_TEARDOWN};
use crate::engine::ContainerEngine;
use crate::error::Result;
use crate::platform::Platform;

mod logs;
pub mod naming;
mod remove;
mod setup;
mod teardown;
mod validate;

/// Owning job; the unit every discovery and teardown query keys on.
pub const LABEL_JOB: &str = "deploy-runner.job";
/// Invocation that created the artifact; audit only.
pub const LABEL_RUN: &str = "deploy-runner.run";
pub const LABEL_SERVICE: &str = "deploy-runner.service";
/// Logical volume name behind an engine volume.
pub const LABEL_VOLUME: &str = "deploy-runner.volume";
/// Logical network (group or resource) name.
pub const LABEL_NET: &str = "deploy-runner.net";
/// Network kind: "group" or "resource".
pub const LABEL_KIND: &str = "deploy-runner.kind";
/// JSON array of resource names a container produced.
pub const LABEL_RESOURCES: &str = "deploy-runner.resources";

/// Docker-specific wiring for a resource connection: the network the
/// resource container is attached to is the only thing a consumer needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerPlatformConnection {
    pub network: String,
}

/// Platform backend for the local Docker Engine.
pub struct DockerPlatform<E, A> {
    engine: E,
    agent: A,
}

impl<E, A> DockerPlatform<E, A>
where
    E: ContainerEngine,
    A: AgentApi,
{
    pub fn new(engine: E, agent: A) -> Self {
        Self { engine, agent }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }
}

#[async_trait]
impl<E, A> Platform for DockerPlatform<E, A>
where
    E: ContainerEngine,
    A: AgentApi,
{
    async fn run(&self, config: Configuration) -> Result<()> {
        if config.action == ACTION_TEARDOWN {
            return self.teardown(config.job).await;
        }

        let Some(metadata) = &config.metadata else {
            tracing::info!(job = %config.job, "no metadata; nothing to reconcile");
            return Ok(());
        };

        self.check_metadata(config.job, metadata).await?;
        self.volume_setup(config.job, config.run, metadata).await?;
        self.service_setup(config.job, config.run, metadata).await?;
        self.remove_services(config.job, metadata.remove_services.as_deref())
            .await?;
        self.remove_volumes(config.job, metadata.remove_volumes.as_deref())
            .await?;
        self.setup_connections(metadata.connections.as_ref()).await
    }
}

/// Pull the `resources` label off a container inspection and union the names
/// into `into`. Malformed JSON is ignored; records for these resources
/// outlive the container, so losing the label only skips agent cleanup.
pub(crate) fn collect_resource_names(
    inspect: &bollard::models::ContainerInspectResponse,
    into: &mut std::collections::BTreeSet<String>,
) {
    let Some(raw) = inspect
        .config
        .as_ref()
        .and_then(|config| config.labels.as_ref())
        .and_then(|labels| labels.get(LABEL_RESOURCES))
    else {
        return;
    };
    if raw.is_empty() {
        return;
    }
    if let Ok(names) = serde_json::from_str::<Vec<String>>(raw) {
        for name in names {
            if !name.is_empty() {
                into.insert(name);
            }
        }
    }
}

/// Label selector matching every artifact owned by a job.
pub(crate) fn job_selector(job: Uuid) -> String {
    format!("{LABEL_JOB}={job}")
}
