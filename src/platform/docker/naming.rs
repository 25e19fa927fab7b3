//! Deterministic engine names scoped by `(job, logical name)`.
//!
//! A re-invocation discovers prior state purely by recomputing these names;
//! none of them may ever change shape once jobs exist in the wild.

use uuid::Uuid;

/// Container name for a service: `{job}-{service_key}`.
pub fn service_container_name(job: Uuid, service_key: &str) -> String {
    format!("{}-{}", job, service_key.trim())
}

/// Group network name: `{job}-{group}`.
pub fn group_network_name(job: Uuid, group: &str) -> String {
    format!("{job}-{group}")
}

/// Per-resource network name: `{job}-{resource}-resource`. The suffix keeps
/// it distinct from a group network with the same logical name.
pub fn resource_network_name(job: Uuid, resource: &str) -> String {
    format!("{job}-{resource}-resource")
}

/// Default network when a service requests no attachments: the raw job id.
pub fn job_network_name(job: Uuid) -> String {
    job.to_string()
}

/// Scratch volume provided to mounts with a `null` name: `{job}-runner`.
pub fn runner_volume_name(job: Uuid) -> String {
    format!("{job}-runner")
}

/// Named volume: `dc-{job}-{volume}`, lowercased with spaces dashed to stay
/// inside the engine's allowed character set.
pub fn named_volume_name(job: Uuid, volume: &str) -> String {
    fn safe(s: &str) -> String {
        s.trim().to_lowercase().replace(' ', "-")
    }
    format!("dc-{}-{}", safe(&job.to_string()), safe(volume))
}
