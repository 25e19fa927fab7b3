//! In-memory engine and recording agent used by the flow tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use bollard::container::{Config, LogOutput};
use bollard::models::{
    ContainerConfig, ContainerInspectResponse, ContainerSummary, Network, Volume,
};
use bytes::Bytes;
use futures::StreamExt;
use uuid::Uuid;

use deploy_runner::agent::{AgentApi, AgentError, CreateConnectionRequest, CreateResource};
use deploy_runner::engine::{ContainerEngine, EngineError, EngineResult, LogStream};

pub struct FakeContainer {
    pub id: String,
    pub config: Config<String>,
    pub running: bool,
}

#[derive(Default)]
pub struct EngineState {
    pub volumes: BTreeMap<String, HashMap<String, String>>,
    pub networks: BTreeMap<String, (String, HashMap<String, String>)>,
    pub containers: BTreeMap<String, FakeContainer>,
    /// Container names in the order they were started.
    pub started: Vec<String>,
    /// Container names in the order they were removed.
    pub removed: Vec<String>,
    /// Every create call, in order, with the config as submitted. Survives
    /// container removal (runner containers are gone by the end of a run).
    pub created_configs: Vec<(String, Config<String>)>,
    pub volume_creates: u32,
    pub network_creates: u32,
    /// Exit status served by `container_wait`, by container name. Missing
    /// entries exit 0.
    pub wait_statuses: HashMap<String, i64>,
    /// Frames served to every log stream: (stream id, payload).
    pub log_frames: Vec<(u8, Vec<u8>)>,
    next_id: u64,
}

impl EngineState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn container_key(&self, name_or_id: &str) -> Option<String> {
        if self.containers.contains_key(name_or_id) {
            return Some(name_or_id.to_string());
        }
        self.containers
            .iter()
            .find(|(_, c)| c.id == name_or_id)
            .map(|(name, _)| name.clone())
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub state: Mutex<EngineState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_volume(&self, name: &str, labels: HashMap<String, String>) {
        self.state
            .lock()
            .unwrap()
            .volumes
            .insert(name.to_string(), labels);
    }

    pub fn insert_network(&self, name: &str, labels: HashMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("net");
        state.networks.insert(name.to_string(), (id, labels));
    }

    pub fn insert_container(&self, name: &str, labels: HashMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("ctr");
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id,
                config: Config {
                    labels: Some(labels),
                    ..Default::default()
                },
                running: true,
            },
        );
    }

    pub fn set_wait_status(&self, name: &str, status: i64) {
        self.state
            .lock()
            .unwrap()
            .wait_statuses
            .insert(name.to_string(), status);
    }
}

fn not_found(what: &str, name: &str) -> EngineError {
    EngineError::NotFound {
        message: format!("no such {what}: {name}"),
    }
}

fn conflict(message: &str) -> EngineError {
    EngineError::Api(bollard::errors::Error::DockerResponseServerError {
        status_code: 409,
        message: message.to_string(),
    })
}

fn matches_selector(labels: &HashMap<String, String>, selector: &str) -> bool {
    match selector.split_once('=') {
        Some((key, value)) => labels.get(key).map(String::as_str) == Some(value),
        None => labels.contains_key(selector),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn volume_inspect(&self, name: &str) -> EngineResult<Volume> {
        let state = self.state.lock().unwrap();
        match state.volumes.get(name) {
            Some(labels) => Ok(Volume {
                name: name.to_string(),
                labels: labels.clone(),
                ..Default::default()
            }),
            None => Err(not_found("volume", name)),
        }
    }

    async fn volume_create(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.volume_creates += 1;
        state.volumes.insert(name.to_string(), labels);
        Ok(())
    }

    async fn volume_remove(&self, name: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.volumes.remove(name).is_none() {
            return Err(not_found("volume", name));
        }
        Ok(())
    }

    async fn volume_list(&self, label_selector: &str) -> EngineResult<Vec<Volume>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .volumes
            .iter()
            .filter(|(_, labels)| matches_selector(labels, label_selector))
            .map(|(name, labels)| Volume {
                name: name.clone(),
                labels: labels.clone(),
                ..Default::default()
            })
            .collect())
    }

    async fn network_inspect(&self, name: &str) -> EngineResult<Network> {
        let state = self.state.lock().unwrap();
        match state.networks.get(name) {
            Some((id, labels)) => Ok(Network {
                name: Some(name.to_string()),
                id: Some(id.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            }),
            None => Err(not_found("network", name)),
        }
    }

    async fn network_create(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.networks.contains_key(name) {
            return Err(conflict("network already exists"));
        }
        state.network_creates += 1;
        let id = state.next_id("net");
        state.networks.insert(name.to_string(), (id, labels));
        Ok(())
    }

    async fn network_remove(&self, id: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(name) = state
            .networks
            .iter()
            .find(|(_, (net_id, _))| net_id == id)
            .map(|(name, _)| name.clone())
        else {
            return Err(not_found("network", id));
        };
        state.networks.remove(&name);
        Ok(())
    }

    async fn network_list(&self, label_selector: &str) -> EngineResult<Vec<Network>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|(_, (_, labels))| matches_selector(labels, label_selector))
            .map(|(name, (id, labels))| Network {
                name: Some(name.clone()),
                id: Some(id.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            })
            .collect())
    }

    async fn container_inspect(
        &self,
        name_or_id: &str,
    ) -> EngineResult<ContainerInspectResponse> {
        let state = self.state.lock().unwrap();
        let Some(key) = state.container_key(name_or_id) else {
            return Err(not_found("container", name_or_id));
        };
        let container = &state.containers[&key];
        Ok(ContainerInspectResponse {
            id: Some(container.id.clone()),
            name: Some(format!("/{key}")),
            config: Some(ContainerConfig {
                image: container.config.image.clone(),
                env: container.config.env.clone(),
                labels: container.config.labels.clone(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn container_create(&self, name: &str, config: Config<String>) -> EngineResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.containers.contains_key(name) {
            return Err(conflict("container name already in use"));
        }
        let id = state.next_id("ctr");
        state
            .created_configs
            .push((name.to_string(), config.clone()));
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id: id.clone(),
                config,
                running: false,
            },
        );
        Ok(id)
    }

    async fn container_start(&self, id: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(key) = state.container_key(id) else {
            return Err(not_found("container", id));
        };
        if let Some(container) = state.containers.get_mut(&key) {
            container.running = true;
        }
        state.started.push(key);
        Ok(())
    }

    async fn container_stop(&self, id: &str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(key) = state.container_key(id) else {
            return Err(not_found("container", id));
        };
        if let Some(container) = state.containers.get_mut(&key) {
            container.running = false;
        }
        Ok(())
    }

    async fn container_remove(&self, id: &str, _force: bool) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(key) = state.container_key(id) else {
            return Err(not_found("container", id));
        };
        state.containers.remove(&key);
        state.removed.push(key);
        Ok(())
    }

    async fn container_list(&self, label_selector: &str) -> EngineResult<Vec<ContainerSummary>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .containers
            .iter()
            .filter(|(_, container)| {
                container
                    .config
                    .labels
                    .as_ref()
                    .is_some_and(|labels| matches_selector(labels, label_selector))
            })
            .map(|(name, container)| ContainerSummary {
                id: Some(container.id.clone()),
                names: Some(vec![format!("/{name}")]),
                labels: container.config.labels.clone(),
                ..Default::default()
            })
            .collect())
    }

    fn container_logs(&self, _id: &str) -> LogStream {
        let frames: Vec<EngineResult<LogOutput>> = self
            .state
            .lock()
            .unwrap()
            .log_frames
            .iter()
            .map(|(stream_id, payload)| {
                let message = Bytes::from(payload.clone());
                Ok(match stream_id {
                    2 => LogOutput::StdErr { message },
                    _ => LogOutput::StdOut { message },
                })
            })
            .collect();
        futures::stream::iter(frames).boxed()
    }

    async fn container_wait(&self, id: &str) -> EngineResult<i64> {
        let mut state = self.state.lock().unwrap();
        let Some(key) = state.container_key(id) else {
            return Err(not_found("container", id));
        };
        if let Some(container) = state.containers.get_mut(&key) {
            container.running = false;
        }
        Ok(state.wait_statuses.get(&key).copied().unwrap_or(0))
    }
}

/// Agent double that records every call and hands back fresh ids.
#[derive(Default)]
pub struct RecordingAgent {
    pub created_resources: Mutex<Vec<CreateResource>>,
    pub deleted_resources: Mutex<Vec<Uuid>>,
    pub deleted_by_name: Mutex<Vec<String>>,
    pub created_connections: Mutex<Vec<CreateConnectionRequest>>,
    pub deleted_connections: Mutex<Vec<(Uuid, Uuid)>>,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentApi for RecordingAgent {
    async fn create_resource(&self, resource: &CreateResource) -> Result<Uuid, AgentError> {
        self.created_resources.lock().unwrap().push(resource.clone());
        Ok(Uuid::new_v4())
    }

    async fn delete_resource(&self, id: Uuid) -> Result<(), AgentError> {
        self.deleted_resources.lock().unwrap().push(id);
        Ok(())
    }

    async fn delete_resource_by_name(&self, name: &str) -> Result<(), AgentError> {
        self.deleted_by_name.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn create_connection(
        &self,
        request: &CreateConnectionRequest,
    ) -> Result<Uuid, AgentError> {
        self.created_connections
            .lock()
            .unwrap()
            .push(request.clone());
        Ok(Uuid::new_v4())
    }

    async fn delete_connection(&self, resource: Uuid, id: Uuid) -> Result<(), AgentError> {
        self.deleted_connections.lock().unwrap().push((resource, id));
        Ok(())
    }
}
