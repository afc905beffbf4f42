//! End-to-end tests over a real listener and WebSocket clients.
//!
//! Run with: `cargo test -p huddle-server --test websocket_e2e`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use huddle_hub::{HubConfig, ObjectBlobStore};
use huddle_server::server::{create_router, AppState};
use huddle_server::ServerConfig;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    spawn_server_with(HubConfig::default()).await
}

async fn spawn_server_with(hub: HubConfig) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        bind: addr,
        token_secret: Some("e2e-secret".to_string()),
        hub,
        ..ServerConfig::default()
    };
    let state = Arc::new(AppState::with_blobs(
        config,
        Arc::new(ObjectBlobStore::in_memory()),
    ));
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });
    addr
}

async fn open(addr: SocketAddr) -> Client {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    let greeting = next_event(&mut ws).await;
    assert_eq!(greeting["event"], "connected");
    assert!(greeting["data"]["sessionId"].is_string());
    ws
}

async fn send(ws: &mut Client, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    ws.send(Message::text(frame)).await.unwrap();
}

async fn next_event(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket closed")
            .unwrap();
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

/// Skip events until one named `name` arrives.
async fn expect_event(ws: &mut Client, name: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == name {
            return event["data"].clone();
        }
    }
}

#[tokio::test]
async fn test_room_fan_out_over_websocket() {
    let addr = spawn_server().await;
    let mut alice = open(addr).await;
    let mut bob = open(addr).await;

    send(&mut alice, "register_user", json!({"username": "alice"})).await;
    expect_event(&mut alice, "user_joined").await;
    send(&mut bob, "register_user", json!({"username": "bob"})).await;
    expect_event(&mut bob, "user_joined").await;

    send(&mut alice, "join_room", json!("general")).await;
    let sync = expect_event(&mut alice, "room_update").await;
    assert_eq!(sync["room"], "general");
    send(&mut bob, "join_room", json!("general")).await;
    expect_event(&mut bob, "room_update").await;

    send(&mut alice, "room_message", json!({"room": "general", "message": "hi all"})).await;

    let to_alice = expect_event(&mut alice, "room_message").await;
    let to_bob = expect_event(&mut bob, "room_message").await;
    assert_eq!(to_bob["message"], "hi all");
    assert_eq!(to_bob["sender"], "alice");
    assert_eq!(to_alice["id"], to_bob["id"]);
}

#[tokio::test]
async fn test_disconnect_announces_departure() {
    let addr = spawn_server().await;
    let mut alice = open(addr).await;
    let mut bob = open(addr).await;

    send(&mut alice, "register_user", json!({"username": "alice"})).await;
    expect_event(&mut alice, "user_joined").await;
    expect_event(&mut bob, "user_joined").await;

    alice.close(None).await.unwrap();

    let left = expect_event(&mut bob, "user_left").await;
    assert_eq!(left["username"], "alice");
}

#[tokio::test]
async fn test_resumed_session_gets_its_rooms_back() {
    let addr = spawn_server().await;
    let mut alice = open(addr).await;
    let mut bob = open(addr).await;
    let credentials = json!({"username": "alice", "password": "hunter22"});

    send(&mut alice, "register", credentials.clone()).await;
    expect_event(&mut alice, "register_success").await;
    send(&mut alice, "login", credentials).await;
    let token = expect_event(&mut alice, "login_success").await["token"].clone();
    send(&mut alice, "join_room", json!("general")).await;
    expect_event(&mut alice, "room_update").await;

    send(&mut bob, "register_user", json!({"username": "bob"})).await;
    expect_event(&mut bob, "user_joined").await;
    send(&mut bob, "join_room", json!("general")).await;
    expect_event(&mut bob, "room_update").await;

    alice.close(None).await.unwrap();
    let left = expect_event(&mut bob, "user_left").await;
    assert_eq!(left["username"], "alice");

    let mut alice = open(addr).await;
    send(&mut alice, "resume_session", json!({ "token": token })).await;
    let sync = expect_event(&mut alice, "room_update").await;
    assert_eq!(sync["room"], "general");
    let login = expect_event(&mut alice, "login_success").await;
    assert_eq!(login["username"], "alice");

    send(&mut bob, "room_message", json!({"room": "general", "message": "welcome back"})).await;
    let delivered = expect_event(&mut alice, "room_message").await;
    assert_eq!(delivered["message"], "welcome back");
    assert_eq!(delivered["sender"], "bob");
}

#[tokio::test]
async fn test_zero_outbound_buffer_still_serves_connections() {
    let addr = spawn_server_with(HubConfig {
        outbound_buffer: 0,
        ..HubConfig::default()
    })
    .await;
    let mut client = open(addr).await;

    send(&mut client, "register_user", json!({"username": "dana"})).await;
    let joined = expect_event(&mut client, "user_joined").await;
    assert_eq!(joined["username"], "dana");
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_connection_survives() {
    let addr = spawn_server().await;
    let mut client = open(addr).await;

    client.send(Message::text("{not json")).await.unwrap();
    let error = expect_event(&mut client, "error").await;
    assert!(error["message"].as_str().unwrap().contains("Invalid event"));

    send(&mut client, "register_user", json!({"username": "carol"})).await;
    expect_event(&mut client, "user_joined").await;
}

#[tokio::test]
async fn test_http_history_reflects_websocket_traffic() {
    let addr = spawn_server().await;
    let mut alice = open(addr).await;

    send(&mut alice, "register_user", json!({"username": "alice"})).await;
    expect_event(&mut alice, "user_joined").await;
    send(&mut alice, "send_message", json!({"message": "first"})).await;
    expect_event(&mut alice, "receive_message").await;

    // global history over plain HTTP/1.1
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET /messages?scope=global HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        addr
    );
    tokio::io::AsyncWriteExt::write_all(&mut stream, request.as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let page: Value = serde_json::from_str(body).unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["messages"][0]["message"], "first");
}
