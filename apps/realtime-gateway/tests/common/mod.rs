#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::Value;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use realtime_gateway::auth::jwt::{AccessClaims, JwtVerifier};
use realtime_gateway::services::memory::MemoryBackend;
use realtime_gateway::services::{GroupRole, Services};
use realtime_gateway::AppState;

pub const TEST_SECRET: &str = "gateway-test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub backend: Arc<MemoryBackend>,
}

/// Start an actual TCP server for WebSocket testing. The server runs in the background.
pub async fn start_server() -> TestServer {
    let backend = Arc::new(MemoryBackend::new());
    let identity = Arc::new(JwtVerifier::new(TEST_SECRET));
    let state = AppState::new(Services::from_backend(identity, backend.clone()));
    let app = realtime_gateway::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        backend,
    }
}

impl TestServer {
    /// Create a user `<id>` with username `<id>_name` and the given memberships.
    pub fn user(&self, id: &str, groups: &[(&str, GroupRole)]) {
        self.backend
            .add_user(id, &format!("{id}_name"), &format!("{id} Full"));
        for (group, role) in groups {
            self.backend.add_member(id, group, *role);
        }
    }

    pub async fn connect(&self) -> WsStream {
        let url = format!("ws://{}/socket", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("ws connect");
        ws
    }

    /// Connect and authenticate as `user_id`; returns after `authenticated`.
    pub async fn login(&self, user_id: &str) -> WsStream {
        let mut ws = self.connect().await;
        send_event(
            &mut ws,
            "authenticate",
            serde_json::json!({ "token": mint_token(user_id) }),
        )
        .await;
        let frame = recv_event(&mut ws).await;
        assert_eq!(frame["event"], "authenticated", "login as {user_id}: {frame}");
        ws
    }
}

/// Mint an access token signed with the test secret.
pub fn mint_token(user_id: &str) -> String {
    mint_token_expiring(user_id, 300)
}

pub fn mint_token_expiring(user_id: &str, exp_offset_secs: i64) -> String {
    let claims = AccessClaims {
        sub: Some(user_id.to_string()),
        user_id: None,
        exp: chrono::Utc::now().timestamp() + exp_offset_secs,
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

pub async fn send_event(ws: &mut WsStream, event: &str, data: Value) {
    let frame = serde_json::json!({ "event": event, "data": data });
    send_raw(ws, &frame.to_string()).await;
}

pub async fn send_raw(ws: &mut WsStream, text: &str) {
    ws.send(tungstenite::Message::Text(text.to_string().into()))
        .await
        .expect("ws send");
}

/// Read the next event frame, failing after 5 seconds.
pub async fn recv_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for event")
            .expect("stream ended")
            .expect("ws read error");

        match msg {
            tungstenite::Message::Text(text) => {
                return serde_json::from_str(&text).expect("parse event");
            }
            tungstenite::Message::Close(frame) => panic!("connection closed: {frame:?}"),
            _ => continue,
        }
    }
}

/// Assert no event arrives within a short window.
pub async fn expect_silence(ws: &mut WsStream) {
    match time::timeout(Duration::from_millis(250), ws.next()).await {
        Err(_elapsed) => {}
        Ok(Some(Ok(tungstenite::Message::Text(text)))) => panic!("unexpected event: {text}"),
        Ok(other) => panic!("unexpected stream item: {other:?}"),
    }
}
