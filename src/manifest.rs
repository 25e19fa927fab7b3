//! Deployment manifest data model.
//!
//! The manifest travels as JSON inside the job configuration. Presence and
//! absence carry meaning ("do nothing" vs "apply"), so optional lists stay
//! `Option<Vec<_>>` rather than collapsing to empty vectors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The manifest for one job: services to reconcile, volumes to provision,
/// partial teardown lists, and a connection plan.
///
/// Services live in a `BTreeMap` so every walk over them (validation,
/// scheduling passes) is deterministic and sorted by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_services: Option<Vec<String>>,

    /// Logical volume names declared for the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_volumes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<ConnectionPlan>,
}

/// How a service participates in the deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// Long-running application service.
    #[default]
    Service,
    /// One-shot step; its exit status gates dependents.
    Runner,
}

/// One service entry in the manifest. Produces exactly one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub image: String,

    /// Network-visible DNS aliases applied on every attached network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ServiceRole>,

    /// Keys of sibling services that must complete first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,

    /// Named network groups this service joins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_groups: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindings: Option<Vec<BindingSpec>>,

    /// Resource connections this service consumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<ResourceConnection>>,

    /// Resources this service produces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceSpec>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeMount>>,

    /// Scaling intent. Carried through; the runner honors only its presence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleSpec>,
}

impl ServiceSpec {
    pub fn is_runner(&self) -> bool {
        self.role == Some(ServiceRole::Runner)
    }
}

/// A port/IP binding for a service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,

    /// Host interface to publish on. Defaults to 0.0.0.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,

    /// Reserved; not consumed by the reconcile path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_ip: Option<String>,
}

/// A volume attached to a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of a volume declared in `metadata.volumes`. `null` means the
    /// runner-provided scratch volume for this job.
    pub name: Option<String>,

    /// Absolute path inside the container.
    pub mount_path: String,
}

/// Scaling intent: single | autoscale | autoscale-core | global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSpec {
    pub mode: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
}

/// How a consumer reaches a resource: either an address visible outside the
/// engine, or platform-specific wiring (for Docker, a network to attach to).
///
/// Wire form is the `{type, data}` envelope; serde's adjacent tagging keeps
/// the envelope at the boundary and the sum type inward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResourceConnection {
    Network(NetworkConnection),
    Platform(Value),
}

impl ResourceConnection {
    /// The opaque payload of a platform connection, if this is one.
    pub fn platform_data(&self) -> Option<&Value> {
        match self {
            ResourceConnection::Platform(data) => Some(data),
            ResourceConnection::Network(_) => None,
        }
    }
}

/// An address/port intended for callers outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConnection {
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// A resource produced by a service, unique by name within the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub resource_type: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_connection: Option<PublicConnection>,

    #[serde(default)]
    pub metadata: Value,
}

/// An address/port a resource exposes beyond the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Agent-side connection records to create and remove once all services are
/// reconciled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<Vec<CreateConnectionSpec>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<Vec<RemoveConnectionSpec>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConnectionSpec {
    pub job: Uuid,
    pub resource: ResourceRef,

    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveConnectionSpec {
    /// Connection UUID to remove.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    /// Resource the connection belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
}

/// Points at a resource either by UUID or by (service, name) within this
/// run. Exactly one form must resolve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
