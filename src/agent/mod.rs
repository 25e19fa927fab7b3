//! Control-plane agent client.
//!
//! The agent is reached over plain HTTP+JSON, either through a unix domain
//! socket or TCP, selected by `AGENT_ENDPOINT`. Every request bears the
//! bearer token from `TOKEN`. One connection is dialed per request; the
//! runner makes a handful of calls per invocation, so pooling buys nothing.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper::{header, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use uuid::Uuid;

use crate::manifest::{PublicConnection, ResourceConnection};

const RESOURCES_PATH: &str = "/v1/resources";
const CONNECTIONS_PATH: &str = "/v1/connections";

/// Errors from agent configuration or calls.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("AGENT_ENDPOINT is not set")]
    EndpointMissing,

    #[error("TOKEN is not set")]
    TokenMissing,

    #[error("invalid AGENT_ENDPOINT {endpoint:?}: {reason}")]
    EndpointInvalid { endpoint: String, reason: String },

    #[error("agent connect failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("agent transport error: {0}")]
    Transport(#[from] hyper::Error),

    #[error("agent request invalid: {0}")]
    Request(#[from] hyper::http::Error),

    /// Non-success response; carries the HTTP status and the body text.
    #[error("{what} failed ({status}): {body}")]
    CallFailed {
        what: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid agent response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// Where the agent listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEndpoint {
    /// `unix:///absolute/socket/path`
    Unix { socket: String },
    /// `tcp://host:port`
    Tcp { host_port: String },
}

impl AgentEndpoint {
    /// Parse an endpoint like `unix:///var/run/agent.sock` or
    /// `tcp://example.com:8080`.
    pub fn parse(endpoint: &str) -> Result<Self, AgentError> {
        let trimmed = endpoint.trim();

        if let Some(rest) = trimmed.strip_prefix("unix://") {
            if rest.is_empty() || !rest.starts_with('/') {
                return Err(AgentError::EndpointInvalid {
                    endpoint: endpoint.to_string(),
                    reason: "unix endpoint missing absolute socket path".to_string(),
                });
            }
            return Ok(AgentEndpoint::Unix {
                socket: rest.to_string(),
            });
        }

        if let Some(rest) = trimmed.strip_prefix("tcp://") {
            if rest.is_empty() {
                return Err(AgentError::EndpointInvalid {
                    endpoint: endpoint.to_string(),
                    reason: "tcp endpoint missing host:port".to_string(),
                });
            }
            return Ok(AgentEndpoint::Tcp {
                host_port: rest.to_string(),
            });
        }

        Err(AgentError::EndpointInvalid {
            endpoint: endpoint.to_string(),
            reason: "unsupported scheme (use unix:// or tcp://)".to_string(),
        })
    }

    /// Host header value. The unix transport ignores the host but HTTP/1.1
    /// still requires one; a stable dummy keeps requests well-formed.
    fn host(&self) -> &str {
        match self {
            AgentEndpoint::Unix { .. } => "agent",
            AgentEndpoint::Tcp { host_port } => host_port,
        }
    }
}

/// Resource record published to the agent after a service is reconciled.
#[derive(Debug, Clone, Serialize)]
pub struct CreateResource {
    pub resource_type: String,
    pub name: String,

    /// Engine-specific wiring for consumers (for Docker, the network to
    /// attach to). `None` for resources produced by runner-role services.
    pub platform_connection: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_connection: Option<PublicConnection>,

    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateConnectionRequest {
    pub resource: Uuid,
    pub job: Uuid,
    pub metadata: Value,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: Uuid,
}

/// A resource record as the agent stores it.
#[derive(Debug, Clone, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub connection: Option<ResourceConnection>,
    #[serde(default)]
    pub metadata: Value,
}

/// A connection record as the agent stores it.
#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub resource: ResourceConnection,
    #[serde(default)]
    pub metadata: Value,
}

/// The agent operations the reconcile engine consumes.
#[async_trait::async_trait]
pub trait AgentApi: Send + Sync {
    async fn create_resource(&self, resource: &CreateResource) -> Result<Uuid, AgentError>;

    async fn delete_resource(&self, id: Uuid) -> Result<(), AgentError>;

    async fn delete_resource_by_name(&self, name: &str) -> Result<(), AgentError>;

    async fn create_connection(
        &self,
        request: &CreateConnectionRequest,
    ) -> Result<Uuid, AgentError>;

    async fn delete_connection(&self, resource: Uuid, id: Uuid) -> Result<(), AgentError>;
}

/// HTTP client for the control-plane agent.
pub struct AgentClient {
    endpoint: AgentEndpoint,
    token: String,
}

impl AgentClient {
    pub fn new(endpoint: AgentEndpoint, token: impl Into<String>) -> Self {
        Self {
            endpoint,
            token: token.into(),
        }
    }

    /// Build a client from `AGENT_ENDPOINT` and `TOKEN`.
    pub fn from_env() -> Result<Self, AgentError> {
        let endpoint = std::env::var("AGENT_ENDPOINT")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(AgentError::EndpointMissing)?;

        let token = std::env::var("TOKEN")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(AgentError::TokenMissing)?;

        Ok(Self::new(AgentEndpoint::parse(&endpoint)?, token))
    }

    /// Fetch a single resource record.
    pub async fn get_resource(&self, id: Uuid) -> Result<Resource, AgentError> {
        let path = format!("{RESOURCES_PATH}/{id}");
        let (status, body) = self.request(Method::GET, &path, None).await?;
        if status != StatusCode::OK {
            return Err(call_failed("get resource", status, &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetch a single connection record.
    pub async fn get_connection(
        &self,
        resource: Uuid,
        id: Uuid,
    ) -> Result<Connection, AgentError> {
        let path = format!("{CONNECTIONS_PATH}/{resource}/{id}");
        let (status, body) = self.request(Method::GET, &path, None).await?;
        if status != StatusCode::OK {
            return Err(call_failed("get connection", status, &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), AgentError> {
        let payload = Full::new(body.map(Bytes::from).unwrap_or_default());
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(header::HOST, self.endpoint.host())
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload)?;

        match &self.endpoint {
            AgentEndpoint::Tcp { host_port } => {
                let stream = TcpStream::connect(host_port.as_str()).await?;
                roundtrip(stream, request).await
            }
            #[cfg(unix)]
            AgentEndpoint::Unix { socket } => {
                let stream = UnixStream::connect(socket).await?;
                roundtrip(stream, request).await
            }
            #[cfg(not(unix))]
            AgentEndpoint::Unix { socket } => Err(AgentError::EndpointInvalid {
                endpoint: format!("unix://{socket}"),
                reason: "unix sockets are not supported on this platform".to_string(),
            }),
        }
    }
}

async fn roundtrip<S>(
    stream: S,
    request: Request<Full<Bytes>>,
) -> Result<(StatusCode, Bytes), AgentError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::debug!("agent connection ended: {}", err);
        }
    });

    let response = sender.send_request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();
    Ok((status, body))
}

fn call_failed(what: &'static str, status: StatusCode, body: &Bytes) -> AgentError {
    AgentError::CallFailed {
        what,
        status: status.as_u16(),
        body: String::from_utf8_lossy(body).into_owned(),
    }
}

#[async_trait::async_trait]
impl AgentApi for AgentClient {
    async fn create_resource(&self, resource: &CreateResource) -> Result<Uuid, AgentError> {
        let body = serde_json::to_vec(resource)?;
        let (status, body) = self
            .request(Method::POST, RESOURCES_PATH, Some(body))
            .await?;
        if status != StatusCode::CREATED {
            return Err(call_failed("create resource", status, &body));
        }
        let out: IdResponse = serde_json::from_slice(&body)?;
        Ok(out.id)
    }

    async fn delete_resource(&self, id: Uuid) -> Result<(), AgentError> {
        let path = format!("{RESOURCES_PATH}/{id}");
        let (status, body) = self.request(Method::DELETE, &path, None).await?;
        if status != StatusCode::NO_CONTENT {
            return Err(call_failed("delete resource", status, &body));
        }
        Ok(())
    }

    async fn delete_resource_by_name(&self, name: &str) -> Result<(), AgentError> {
        let path = format!("{RESOURCES_PATH}/name/{name}");
        let (status, body) = self.request(Method::DELETE, &path, None).await?;
        if status != StatusCode::NO_CONTENT {
            return Err(call_failed("delete resource", status, &body));
        }
        Ok(())
    }

    async fn create_connection(
        &self,
        request: &CreateConnectionRequest,
    ) -> Result<Uuid, AgentError> {
        let body = serde_json::to_vec(request)?;
        let (status, body) = self
            .request(Method::POST, CONNECTIONS_PATH, Some(body))
            .await?;
        if status != StatusCode::CREATED {
            return Err(call_failed("create connection", status, &body));
        }
        let out: IdResponse = serde_json::from_slice(&body)?;
        Ok(out.id)
    }

    async fn delete_connection(&self, resource: Uuid, id: Uuid) -> Result<(), AgentError> {
        let path = format!("{CONNECTIONS_PATH}/{resource}/{id}");
        let (status, body) = self.request(Method::DELETE, &path, None).await?;
        if status != StatusCode::NO_CONTENT {
            return Err(call_failed("delete connection", status, &body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_endpoint() {
        let endpoint = AgentEndpoint::parse("unix:///var/run/agent.sock").unwrap();
        assert_eq!(
            endpoint,
            AgentEndpoint::Unix {
                socket: "/var/run/agent.sock".to_string()
            }
        );
        assert_eq!(endpoint.host(), "agent");
    }

    #[test]
    fn parses_tcp_endpoint() {
        let endpoint = AgentEndpoint::parse("tcp://example.com:8080").unwrap();
        assert_eq!(
            endpoint,
            AgentEndpoint::Tcp {
                host_port: "example.com:8080".to_string()
            }
        );
        assert_eq!(endpoint.host(), "example.com:8080");
    }

    #[test]
    fn rejects_relative_unix_path() {
        let err = AgentEndpoint::parse("unix://agent.sock").unwrap_err();
        assert!(matches!(err, AgentError::EndpointInvalid { .. }));
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = AgentEndpoint::parse("http://example.com").unwrap_err();
        assert!(matches!(err, AgentError::EndpointInvalid { .. }));
    }

    #[test]
    fn rejects_empty_tcp_host() {
        let err = AgentEndpoint::parse("tcp://").unwrap_err();
        assert!(matches!(err, AgentError::EndpointInvalid { .. }));
    }
}
