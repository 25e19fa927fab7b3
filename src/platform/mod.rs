//! Platform dispatch.
//!
//! A platform turns one job configuration into engine artifacts and agent
//! records. Docker is the only backend today; the seam exists so another
//! engine (k8s) can slot in without touching the entry point.

use async_trait::async_trait;

use crate::agent::AgentClient;
use crate::config::Configuration;
use crate::engine::DockerEngine;
use crate::error::{Result, RunnerError};

pub mod docker;

/// One platform backend: executes the configured action and terminates.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn run(&self, config: Configuration) -> Result<()>;
}

/// Resolve the configured platform name to a backend.
pub async fn select_platform(name: &str, agent: AgentClient) -> Result<Box<dyn Platform>> {
    match name {
        "docker" => {
            let engine = DockerEngine::connect()
                .await
                .map_err(|err| RunnerError::EngineUnavailable {
                    reason: err.to_string(),
                })?;
            Ok(Box::new(docker::DockerPlatform::new(engine, agent)))
        }
        other => Err(RunnerError::UnsupportedPlatform {
            platform: other.to_string(),
        }),
    }
}
