//! Integration tests for end-to-end WebSocket synchronization.
//!
//! These tests start a real server and talk to it over raw WebSockets,
//! verifying the full sync pipeline.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tandem_core::ManualClock;
use tandem_sync::hub::HealthReport;
use tandem_sync::protocol::{kind, ErrorCode, Frame, ServerMessage};
use tandem_sync::{MemoryRepository, ServerConfig, SharedHub, SyncServer, TokenAuthenticator};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    url: String,
    hub: SharedHub,
    clock: ManualClock,
}

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on an ephemeral port with a manual clock.
async fn start_test_server(config: ServerConfig) -> TestServer {
    let clock = ManualClock::new(Utc::now());
    let auth = TokenAuthenticator::new().with_token("t-alice", "alice", "editor");
    let server = Arc::new(
        SyncServer::with_parts(
            ServerConfig {
                bind_addr: "127.0.0.1:0".into(),
                housekeeping_tick_ms: 10,
                ..config
            },
            Arc::new(MemoryRepository::new()),
            Arc::new(auth),
            Arc::new(clock.clone()),
        )
        .unwrap(),
    );
    let listener = server.bind().await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hub = server.hub();
    tokio::spawn(async move {
        server.serve(listener, std::future::pending()).await.unwrap();
    });
    TestServer {
        url: format!("ws://127.0.0.1:{port}"),
        hub,
        clock,
    }
}

async fn open_server() -> TestServer {
    start_test_server(ServerConfig {
        require_auth: false,
        ..ServerConfig::default()
    })
    .await
}

async fn connect(url: &str) -> Ws {
    tokio_tungstenite::connect_async(url).await.unwrap().0
}

async fn send(ws: &mut Ws, kind: &str, data: Value, request_id: Option<&str>) {
    let mut frame = Frame::new(kind, data, Utc::now().timestamp_millis());
    frame.request_id = request_id.map(str::to_string);
    ws.send(Message::Text(frame.encode().unwrap().into()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Ws) -> ServerMessage {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return ServerMessage::decode(text.as_str()).unwrap();
        }
    }
}

async fn expect_silence(ws: &mut Ws) {
    assert!(
        timeout(Duration::from_millis(150), ws.next()).await.is_err(),
        "expected no frame"
    );
}

async fn sync(ws: &mut Ws) -> ServerMessage {
    send(ws, kind::REQUEST_SYNC, json!({}), None).await;
    recv(ws).await
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let server = open_server().await;
    let mut ws = connect(&server.url).await;

    send(&mut ws, kind::PING, json!({}), None).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::Pong);
    assert_eq!(server.hub.lock().await.connection_count(), 1);
}

#[tokio::test]
async fn test_first_sync_full_then_unchanged() {
    let server = open_server().await;
    let mut writer = connect(&server.url).await;
    send(&mut writer, kind::ADD_PROJECT, json!({ "id": "p1", "title": "One" }), Some("r1")).await;
    assert!(matches!(recv(&mut writer).await, ServerMessage::Ack(_)));

    let mut reader = connect(&server.url).await;
    match sync(&mut reader).await {
        ServerMessage::SyncProjects(all) => assert!(all.contains_key("p1")),
        other => panic!("expected sync_projects, got {other:?}"),
    }
    assert_eq!(sync(&mut reader).await, ServerMessage::SyncUnchanged);
}

#[tokio::test]
async fn test_peer_mutation_is_broadcast_to_others_only() {
    let server = open_server().await;
    let mut a = connect(&server.url).await;
    let mut b = connect(&server.url).await;
    assert!(matches!(sync(&mut a).await, ServerMessage::SyncProjects(_)));

    send(&mut b, kind::ADD_PROJECT, json!({ "title": "From B" }), Some("r1")).await;
    let ack = match recv(&mut b).await {
        ServerMessage::Ack(ack) => ack,
        other => panic!("expected ack, got {other:?}"),
    };
    assert!(ack.applied);
    let id = ack.id.expect("server assigns an id");

    match recv(&mut a).await {
        ServerMessage::ProjectAdded(p) => assert_eq!(p.id, id),
        other => panic!("expected add_project, got {other:?}"),
    }
    // The broadcast already advanced A's cursor.
    assert_eq!(sync(&mut a).await, ServerMessage::SyncUnchanged);
    expect_silence(&mut b).await;
}

#[tokio::test]
async fn test_step_update_reaches_peers_with_progress() {
    let server = open_server().await;
    let mut a = connect(&server.url).await;
    let mut b = connect(&server.url).await;

    send(
        &mut a,
        kind::ADD_PROJECT,
        json!({
            "id": "p1",
            "title": "Launch",
            "steps": [
                { "id": "s1", "title": "Plan", "completed": true },
                { "id": "s2", "title": "Build", "completed": false },
                { "id": "s3", "title": "Test", "completed": false },
                { "id": "s4", "title": "Ship", "completed": false }
            ]
        }),
        None,
    )
    .await;
    match recv(&mut b).await {
        ServerMessage::ProjectAdded(p) => assert_eq!(p.progress, 25),
        other => panic!("expected add_project, got {other:?}"),
    }

    send(
        &mut a,
        kind::UPDATE_STEP,
        json!({ "id": "s2", "projectId": "p1", "title": "Build", "completed": true }),
        None,
    )
    .await;
    match recv(&mut b).await {
        ServerMessage::StepUpdated(n) => {
            assert_eq!(n.progress, 50);
            assert_eq!(n.next_step, "Test");
        }
        other => panic!("expected update_step, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_propagation() {
    let server = open_server().await;
    let mut a = connect(&server.url).await;
    let mut b = connect(&server.url).await;
    send(&mut b, kind::ADD_PROJECT, json!({ "id": "p1", "title": "One" }), None).await;
    send(&mut b, kind::ADD_PROJECT, json!({ "id": "p2", "title": "Two" }), None).await;
    recv(&mut a).await;
    recv(&mut a).await;
    assert!(matches!(sync(&mut a).await, ServerMessage::SyncProjects(all) if all.len() == 2));

    send(&mut b, kind::DELETE_PROJECT, json!({ "id": "p1" }), None).await;

    assert_eq!(recv(&mut a).await, ServerMessage::ProjectDeleted { id: "p1".into() });
    let snapshot = server.hub.lock().await.snapshot();
    assert!(!snapshot.contains_key("p1"));
    assert!(snapshot.contains_key("p2"));
}

#[tokio::test]
async fn test_validation_boundary() {
    let server = open_server().await;
    let mut ws = connect(&server.url).await;

    for bad in [
        json!({ "title": "x", "status": "bogus", "progress": 50 }),
        json!({ "title": "x", "status": "on-track", "progress": 150 }),
        json!({ "title": "x", "deadline": "10/05/2024" }),
        json!({ "status": "on-track" }),
    ] {
        send(&mut ws, kind::ADD_PROJECT, bad, Some("r")).await;
        match recv(&mut ws).await {
            ServerMessage::Error(e) => assert_eq!(e.code, ErrorCode::ValidationError),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
    assert!(server.hub.lock().await.snapshot().is_empty());
}

#[tokio::test]
async fn test_unknown_and_malformed_frames() {
    let server = open_server().await;
    let mut ws = connect(&server.url).await;

    send(&mut ws, "explode", json!({}), Some("r1")).await;
    match recv(&mut ws).await {
        ServerMessage::Error(e) => {
            assert_eq!(e.code, ErrorCode::UnknownMessageType);
            assert_eq!(e.request_id.as_deref(), Some("r1"));
        }
        other => panic!("expected error, got {other:?}"),
    }

    ws.send(Message::Text("{{{".to_string().into()))
        .await
        .unwrap();
    assert!(matches!(recv(&mut ws).await, ServerMessage::Error(e) if e.code == ErrorCode::BadMessage));

    // The connection survives both.
    send(&mut ws, kind::PING, json!({}), None).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::Pong);
}

#[tokio::test]
async fn test_auth_required_for_changes() {
    let server = start_test_server(ServerConfig::default()).await;
    let mut ws = connect(&server.url).await;
    let mut peer = connect(&server.url).await;

    send(&mut ws, kind::ADD_PROJECT, json!({ "title": "x" }), Some("r1")).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Error(e) if e.code == ErrorCode::AuthRequired));
    expect_silence(&mut peer).await;

    // Reads are allowed without a token.
    assert!(matches!(sync(&mut ws).await, ServerMessage::SyncProjects(all) if all.is_empty()));

    send(&mut ws, kind::AUTHENTICATE, json!({ "token": "t-alice" }), None).await;
    match recv(&mut ws).await {
        ServerMessage::AuthStatus(s) => {
            assert!(s.authenticated);
            assert_eq!(s.username.as_deref(), Some("alice"));
        }
        other => panic!("expected auth_status, got {other:?}"),
    }

    send(&mut ws, kind::ADD_PROJECT, json!({ "title": "x" }), Some("r2")).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::Ack(a) if a.applied));
    assert!(matches!(recv(&mut peer).await, ServerMessage::ProjectAdded(_)));
}

#[tokio::test]
async fn test_inactive_connection_is_swept() {
    let server = open_server().await;
    let mut idle = connect(&server.url).await;
    send(&mut idle, kind::PING, json!({}), None).await;
    recv(&mut idle).await;

    server.clock.advance(ChronoDuration::minutes(31));

    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match idle.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "idle connection should be closed");
    assert_eq!(server.hub.lock().await.connection_count(), 0);
}

#[tokio::test]
async fn test_health_endpoint() {
    let health_port = free_port().await;
    let server = start_test_server(ServerConfig {
        require_auth: false,
        health_addr: Some(format!("127.0.0.1:{health_port}")),
        ..ServerConfig::default()
    })
    .await;
    let mut ws = connect(&server.url).await;
    send(&mut ws, kind::ADD_PROJECT, json!({ "title": "x" }), Some("r1")).await;
    recv(&mut ws).await;

    let mut stream = TcpStream::connect(("127.0.0.1", health_port)).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    timeout(Duration::from_secs(2), stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let report: HealthReport = serde_json::from_str(body).unwrap();
    assert_eq!(report.status, "ok");
    assert_eq!(report.connections, 1);
    assert_eq!(report.projects, 1);
}
