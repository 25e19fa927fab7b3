//! Agent client tests against a real loopback HTTP server.

use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use uuid::Uuid;

use deploy_runner::agent::{
    AgentApi, AgentClient, AgentEndpoint, AgentError, CreateConnectionRequest, CreateResource,
};

const TOKEN: &str = "secret-token";
const FIXED_ID: &str = "3d9f2a10-7c4e-4b5f-9d7e-0a1b2c3d4e5f";

fn fixed_id() -> Uuid {
    FIXED_ID.parse().unwrap()
}

async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let expected = format!("Bearer {TOKEN}");
    let authorized = req
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return Ok(respond(StatusCode::UNAUTHORIZED, "missing or bad token"));
    }

    let path = req.uri().path().to_string();
    let response = match (req.method(), path.as_str()) {
        (&Method::POST, "/v1/resources") | (&Method::POST, "/v1/connections") => respond(
            StatusCode::CREATED,
            &format!(r#"{{"id": "{FIXED_ID}"}}"#),
        ),
        (&Method::DELETE, "/v1/resources/name/explode") => {
            respond(StatusCode::INTERNAL_SERVER_ERROR, "boom")
        }
        (&Method::DELETE, path)
            if path.starts_with("/v1/resources/") || path.starts_with("/v1/connections/") =>
        {
            respond(StatusCode::NO_CONTENT, "")
        }
        _ => respond(StatusCode::NOT_FOUND, "no such route"),
    };

    Ok(response)
}

fn respond(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(
                http1::Builder::new().serve_connection(TokioIo::new(stream), service_fn(handle)),
            );
        }
    });
    addr
}

fn tcp_client(addr: SocketAddr, token: &str) -> AgentClient {
    AgentClient::new(
        AgentEndpoint::Tcp {
            host_port: addr.to_string(),
        },
        token,
    )
}

fn sample_resource() -> CreateResource {
    CreateResource {
        resource_type: "pg".to_string(),
        name: "main".to_string(),
        platform_connection: Some(serde_json::json!({"network": "job-main-resource"})),
        public_connection: None,
        metadata: serde_json::json!({}),
    }
}

#[tokio::test]
async fn create_resource_round_trips() {
    let addr = spawn_server().await;
    let client = tcp_client(addr, TOKEN);

    let id = client.create_resource(&sample_resource()).await.unwrap();
    assert_eq!(id, fixed_id());
}

#[tokio::test]
async fn bad_token_surfaces_status_and_body() {
    let addr = spawn_server().await;
    let client = tcp_client(addr, "wrong-token");

    let err = client.create_resource(&sample_resource()).await.unwrap_err();
    match err {
        AgentError::CallFailed { status, body, .. } => {
            assert_eq!(status, 401);
            assert!(body.contains("token"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn delete_resource_by_name_accepts_no_content() {
    let addr = spawn_server().await;
    let client = tcp_client(addr, TOKEN);

    client.delete_resource_by_name("main").await.unwrap();
}

#[tokio::test]
async fn delete_resource_by_id_accepts_no_content() {
    let addr = spawn_server().await;
    let client = tcp_client(addr, TOKEN);

    client.delete_resource(Uuid::new_v4()).await.unwrap();
}

#[tokio::test]
async fn server_error_body_is_carried_in_the_error() {
    let addr = spawn_server().await;
    let client = tcp_client(addr, TOKEN);

    let err = client.delete_resource_by_name("explode").await.unwrap_err();
    match err {
        AgentError::CallFailed { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn create_and_delete_connection_round_trip() {
    let addr = spawn_server().await;
    let client = tcp_client(addr, TOKEN);

    let id = client
        .create_connection(&CreateConnectionRequest {
            resource: Uuid::new_v4(),
            job: Uuid::new_v4(),
            metadata: serde_json::json!({"role": "reader"}),
        })
        .await
        .unwrap();
    assert_eq!(id, fixed_id());

    client
        .delete_connection(Uuid::new_v4(), id)
        .await
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_transport_round_trips() {
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("agent.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(
                http1::Builder::new().serve_connection(TokioIo::new(stream), service_fn(handle)),
            );
        }
    });

    let client = AgentClient::new(
        AgentEndpoint::Unix {
            socket: socket_path.display().to_string(),
        },
        TOKEN,
    );

    let id = client.create_resource(&sample_resource()).await.unwrap();
    assert_eq!(id, fixed_id());
}
