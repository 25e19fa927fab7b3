//! Container engine abstraction.
//!
//! The reconcile engine talks to the container engine through this trait so
//! the flow can be exercised against an in-memory double. The vocabulary is
//! bollard's model types; [`docker::DockerEngine`] is the production
//! implementation.
//!
//! The one distinction callers rely on is `NotFound` vs everything else:
//! idempotent removes swallow it, and the inspect/create/re-inspect pattern
//! pivots on it.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{Config, LogOutput};
use bollard::models::{ContainerInspectResponse, ContainerSummary, Network, Volume};
use futures::stream::BoxStream;

pub mod docker;

pub use docker::DockerEngine;

/// Errors surfaced by a container engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The named artifact does not exist.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The engine daemon could not be reached.
    #[error("container engine unavailable: {reason}")]
    Unavailable { reason: String },

    /// Any other engine API failure.
    #[error(transparent)]
    Api(bollard::errors::Error),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A follow-mode log stream of demultiplexed stdout/stderr frames.
pub type LogStream = BoxStream<'static, EngineResult<LogOutput>>;

/// The capability set the reconcile engine needs from a container engine.
///
/// List operations take a `key=value` label selector. `container_remove`
/// never removes the container's volumes; volume lifecycle is owned by the
/// volume reconciler alone.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn volume_inspect(&self, name: &str) -> EngineResult<Volume>;

    async fn volume_create(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()>;

    async fn volume_remove(&self, name: &str) -> EngineResult<()>;

    async fn volume_list(&self, label_selector: &str) -> EngineResult<Vec<Volume>>;

    async fn network_inspect(&self, name: &str) -> EngineResult<Network>;

    async fn network_create(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()>;

    /// Removes by id rather than name to avoid name collisions across jobs.
    async fn network_remove(&self, id: &str) -> EngineResult<()>;

    async fn network_list(&self, label_selector: &str) -> EngineResult<Vec<Network>>;

    async fn container_inspect(&self, name_or_id: &str)
        -> EngineResult<ContainerInspectResponse>;

    /// Creates a container and returns its id.
    async fn container_create(&self, name: &str, config: Config<String>) -> EngineResult<String>;

    async fn container_start(&self, id: &str) -> EngineResult<()>;

    async fn container_stop(&self, id: &str) -> EngineResult<()>;

    async fn container_remove(&self, id: &str, force: bool) -> EngineResult<()>;

    /// Lists all containers (including stopped) matching the selector.
    async fn container_list(&self, label_selector: &str) -> EngineResult<Vec<ContainerSummary>>;

    /// Opens a follow-mode stdout+stderr log stream.
    fn container_logs(&self, id: &str) -> LogStream;

    /// Blocks until the container stops and returns its exit status.
    async fn container_wait(&self, id: &str) -> EngineResult<i64>;
}
