//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use feedback_common::ConnectionId;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::AppState;

use super::connection::Connection;
use super::events::{ClientEvent, ServerMessage};
use super::registry::outbound_channel;
use super::router;

pub fn router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();
    let (out_tx, out_rx) = outbound_channel();

    let mut conn = Connection::new(ConnectionId::generate());
    state.registry.register(conn.id().clone(), out_tx);
    tracing::info!(connection_id = %conn.id(), "connection opened");

    run_connection(&state, &mut conn, ws_tx, ws_rx, out_rx).await;

    router::disconnect(&state, &conn);
    tracing::info!(
        connection_id = %conn.id(),
        user_id = conn.user_id().unwrap_or("-"),
        "connection closed"
    );
}

/// Main loop: handle client frames one at a time and flush queued frames.
async fn run_connection(
    state: &AppState,
    conn: &mut Connection,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut out_rx: mpsc::Receiver<Arc<ServerMessage>>,
) {
    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match ClientEvent::decode(&text) {
                        Ok(event) => router::dispatch(state, conn, event).await,
                        Err(err) => {
                            tracing::debug!(connection_id = %conn.id(), ?err, "undecodable frame");
                            state.registry.emit(conn.id(), ServerMessage::error(err.message()));
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %conn.id(), "ws read error");
                        break;
                    }
                    // Ping, pong and binary frames carry no events.
                    Some(Ok(_)) => continue,
                }
            }

            // Frame queued for this connection by any handler.
            Some(out) = out_rx.recv() => {
                let Some(json) = out.to_json() else {
                    continue;
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
