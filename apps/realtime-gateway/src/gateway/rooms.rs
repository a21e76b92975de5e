//! Group and session room joins.
//!
//! Membership is checked against the group directory on every join and is
//! never cached: it can change between connects.

use feedback_common::Room;

use crate::error::HandlerError;
use crate::AppState;

use super::connection::Connection;
use super::events::{EventName, GroupAck, GroupMemberEvent, ServerMessage, SessionAck};

pub const NOT_A_MEMBER: &str = "Not a member of this group";
pub const SESSION_NOT_FOUND: &str = "Session not found";
pub const ACCESS_DENIED: &str = "Access denied";

/// `join_group`: verify membership, join `group:<id>`, acknowledge, and
/// announce the join to the rest of the room.
pub async fn join_group(
    state: &AppState,
    conn: &Connection,
    group_id: &str,
) -> Result<(), HandlerError> {
    let user = conn.user().ok_or(HandlerError::Unauthenticated)?;
    let registry = &state.registry;

    if !state.services.groups.is_member(&user.id, group_id).await? {
        tracing::debug!(connection_id = %conn.id(), user_id = %user.id, %group_id, "group join denied");
        registry.emit(conn.id(), ServerMessage::error(NOT_A_MEMBER));
        return Ok(());
    }

    let room = Room::group(group_id);
    registry.join(conn.id(), room.clone());
    registry.emit(
        conn.id(),
        ServerMessage::new(EventName::JOINED_GROUP, &GroupAck { group_id }),
    );
    registry.broadcast(
        &room,
        ServerMessage::new(
            EventName::USER_JOINED_GROUP,
            &GroupMemberEvent {
                group_id,
                user_id: &user.id,
                username: &user.username,
            },
        ),
        Some(conn.id()),
    );
    Ok(())
}

/// `leave_group`: leave unconditionally and tell the remaining members.
pub fn leave_group(state: &AppState, conn: &Connection, group_id: &str) -> Result<(), HandlerError> {
    let user = conn.user().ok_or(HandlerError::Unauthenticated)?;
    let registry = &state.registry;
    let room = Room::group(group_id);

    registry.leave(conn.id(), &room);
    registry.emit(
        conn.id(),
        ServerMessage::new(EventName::LEFT_GROUP, &GroupAck { group_id }),
    );
    registry.broadcast(
        &room,
        ServerMessage::new(
            EventName::USER_LEFT_GROUP,
            &GroupMemberEvent {
                group_id,
                user_id: &user.id,
                username: &user.username,
            },
        ),
        None,
    );
    Ok(())
}

/// `join_session`: the session's owning group decides access.
pub async fn join_session(
    state: &AppState,
    conn: &Connection,
    session_id: &str,
) -> Result<(), HandlerError> {
    let user = conn.user().ok_or(HandlerError::Unauthenticated)?;
    let registry = &state.registry;
    let services = &state.services;

    let Some(group_id) = services.sessions.get_session_group(session_id).await? else {
        registry.emit(conn.id(), ServerMessage::error(SESSION_NOT_FOUND));
        return Ok(());
    };

    if !services.groups.is_member(&user.id, &group_id).await? {
        tracing::debug!(connection_id = %conn.id(), user_id = %user.id, %session_id, "session join denied");
        registry.emit(conn.id(), ServerMessage::error(ACCESS_DENIED));
        return Ok(());
    }

    registry.join(conn.id(), Room::session(session_id));
    registry.emit(
        conn.id(),
        ServerMessage::new(EventName::JOINED_SESSION, &SessionAck { session_id }),
    );
    Ok(())
}
