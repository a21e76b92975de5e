//! Helpers for driving handlers without a socket.

use std::sync::Arc;

use feedback_common::ConnectionId;
use tokio::sync::mpsc;

use crate::services::memory::MemoryBackend;
use crate::services::{GroupRole, Services};
use crate::AppState;

use super::connection::Connection;
use super::events::{AuthenticatePayload, ServerMessage};
use super::handshake;
use super::registry::outbound_channel;

pub(crate) struct Harness {
    pub state: AppState,
    pub backend: Arc<MemoryBackend>,
}

/// A registered connection plus the receiving end of its outbound queue.
pub(crate) struct TestClient {
    pub conn: Connection,
    pub rx: mpsc::Receiver<Arc<ServerMessage>>,
}

impl TestClient {
    /// Everything queued for this connection so far.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push((*msg).clone());
        }
        out
    }

    pub fn events(&mut self) -> Vec<&'static str> {
        self.drain().into_iter().map(|m| m.event).collect()
    }
}

impl Harness {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let services = Services::from_backend(backend.clone(), backend.clone());
        Self {
            state: AppState::new(services),
            backend,
        }
    }

    /// Create a user who can authenticate with token `tok_<id>`.
    pub fn user(&self, id: &str, groups: &[(&str, GroupRole)]) {
        self.backend.add_user(id, &format!("{id}_name"), &format!("{id} Full"));
        self.backend.issue_token(&format!("tok_{id}"), id);
        for (group, role) in groups {
            self.backend.add_member(id, group, *role);
        }
    }

    pub fn connect(&self) -> TestClient {
        let id = ConnectionId::generate();
        let (tx, rx) = outbound_channel();
        self.state.registry.register(id.clone(), tx);
        TestClient {
            conn: Connection::new(id),
            rx,
        }
    }

    /// Connect and authenticate as `user_id`, discarding the handshake frames.
    pub async fn login(&self, user_id: &str) -> TestClient {
        let mut client = self.connect();
        let payload = AuthenticatePayload {
            token: format!("tok_{user_id}"),
        };
        handshake::authenticate(&self.state, &mut client.conn, payload)
            .await
            .expect("authenticate");
        assert!(client.conn.is_authenticated(), "login as {user_id} failed");
        client.drain();
        client
    }
}
