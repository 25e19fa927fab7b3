//! Error types for the deployment runner.
//!
//! Every error is fatal to the current invocation; the orchestrator above
//! this runner is responsible for re-invoking. The exceptions (not-found on
//! idempotent removes, create races resolved by re-inspection, best-effort
//! agent deletions during teardown) are swallowed at the call site and never
//! surface here.

use uuid::Uuid;

use crate::agent::AgentError;
use crate::engine::EngineError;

/// Errors that can abort a runner invocation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A service depends on a key that is not present in the manifest.
    #[error("service {service:?} depends_on {dependency:?}, but {dependency:?} does not exist")]
    DependsOnMissing { service: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("circular dependency detected: {cycle}")]
    CycleDetected { cycle: String },

    /// A declared volume name is empty or duplicated.
    #[error("invalid volume declaration: {reason}")]
    VolumeNameInvalid { reason: String },

    /// A volume mount path is empty or not absolute.
    #[error("service {service:?} volume mount_path {path:?} is invalid: {reason}")]
    MountPathInvalid {
        service: String,
        path: String,
        reason: String,
    },

    /// Two mounts within one service target the same path.
    #[error("service {service:?} has duplicate volume mount_path {path:?}")]
    DuplicateMountPath { service: String, path: String },

    /// A mounted volume is neither declared in the manifest nor present in
    /// the engine.
    #[error("volume {volume:?} is not declared in metadata.volumes and was not found in the engine: {source}")]
    UnknownVolume {
        volume: String,
        #[source]
        source: EngineError,
    },

    /// A port binding's host_ip does not parse as an IP address.
    #[error("service {service:?} has invalid host_ip {addr:?}")]
    InvalidHostIp { service: String, addr: String },

    /// A platform connection's data payload is malformed.
    #[error("invalid platform connection data: {reason}")]
    PlatformConnectionInvalid { reason: String },

    /// A platform connection names a network that does not exist. Connection
    /// networks are created by other jobs; this runner never creates them.
    #[error("platform connection network {network:?} not found: {source}")]
    PlatformNetworkMissing {
        network: String,
        #[source]
        source: EngineError,
    },

    /// A connection plan entry references a resource without an id. The
    /// (service, name) form is declared in the schema but has no lookup
    /// mechanism at the runner layer.
    #[error("cannot resolve resource ref (service={service:?} name={name:?}); an explicit resource id is required")]
    UnresolvableResourceRef {
        service: Option<String>,
        name: Option<String>,
    },

    /// Deleting a connection needs both the connection id and a resource ref.
    #[error("remove connection {id}: a resource ref is required alongside the connection id")]
    ResourceRefRequiredForDelete { id: Uuid },

    /// "Remove all connections for a resource" has no agent endpoint.
    #[error("removing all connections for a resource is unsupported")]
    BulkConnectionRemovalUnsupported,

    /// The container engine could not be reached at all.
    #[error("container engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    #[error("{op} volume {name:?}: {source}")]
    VolumeOperationFailed {
        name: String,
        op: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("{op} network {name:?}: {source}")]
    NetworkOperationFailed {
        name: String,
        op: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("{op} container {name:?}: {source}")]
    ContainerOperationFailed {
        name: String,
        op: &'static str,
        #[source]
        source: EngineError,
    },

    /// The runner log stream ended with something other than clean EOF.
    #[error("stream logs for {name:?}: {source}")]
    LogStreamFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A runner-role container exited non-zero; dependents never start.
    #[error("runner container {name:?} exited with status {status}")]
    RunnerExited { name: String, status: i64 },

    /// No service was runnable in a scheduler pass. Cannot occur once the
    /// manifest validated; kept as a defensive check.
    #[error("dependency graph deadlocked: no runnable service among {remaining:?}")]
    DeadlockedGraph { remaining: Vec<String> },

    /// Control-plane agent call failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The configuration names a platform this runner has no backend for.
    #[error("{platform:?} is not a valid platform")]
    UnsupportedPlatform { platform: String },
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
