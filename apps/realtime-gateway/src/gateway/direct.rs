//! One-to-one message relay.

use feedback_common::Room;

use crate::error::HandlerError;
use crate::AppState;

use super::connection::Connection;
use super::events::{
    timestamp_now, DirectMessageAck, DirectMessageError, DirectMessageOut, EventName,
    ServerMessage,
};

pub const CODE_BLOCKED: &str = "blocked";
pub const CODE_SERVER_ERROR: &str = "server_error";

pub fn error_frame(code: &str, message: &str) -> ServerMessage {
    ServerMessage::new(
        EventName::DIRECT_MESSAGE_ERROR,
        &DirectMessageError { code, message },
    )
}

/// Relay a direct message to every connection of the recipient and echo an
/// ack to the sending connection.
///
/// Blank content is dropped without a reply. A recipient who disallows
/// messaging gets nothing and the sender gets `direct_message_error`.
/// Persistence is best-effort; a failed save is logged and delivery
/// continues. The only failure returned is a frame that cannot be encoded,
/// which is checked before anything is saved or sent. Messages are not
/// deduplicated.
pub async fn send(
    state: &AppState,
    conn: &Connection,
    to_user_id: &str,
    content: &str,
) -> Result<(), HandlerError> {
    let from = conn.user().ok_or(HandlerError::Unauthenticated)?;
    let content = content.trim();
    if content.is_empty() {
        return Ok(());
    }

    let registry = &state.registry;
    if !state.preferences.is_messaging_allowed(to_user_id) {
        tracing::debug!(from_user_id = %from.id, %to_user_id, "direct message blocked");
        registry.emit(
            conn.id(),
            error_frame(CODE_BLOCKED, "This user is not accepting direct messages"),
        );
        return Ok(());
    }

    let timestamp = timestamp_now();
    let relay = ServerMessage::encode(
        EventName::DIRECT_MESSAGE,
        &DirectMessageOut {
            from_user_id: &from.id,
            content,
            timestamp: &timestamp,
        },
    )?;
    let ack = ServerMessage::encode(
        EventName::DIRECT_MESSAGE_ACK,
        &DirectMessageAck {
            to_user_id,
            content,
            timestamp: &timestamp,
        },
    )?;

    if let Err(err) = state
        .services
        .messages
        .save(&from.id, to_user_id, content, &timestamp)
        .await
    {
        tracing::warn!(
            from_user_id = %from.id,
            %to_user_id,
            %err,
            "failed to persist direct message"
        );
    }

    registry.broadcast(&Room::user(to_user_id), relay, Some(conn.id()));
    registry.emit(conn.id(), ack);
    Ok(())
}
