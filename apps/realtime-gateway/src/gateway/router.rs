//! Inbound event dispatch and outbound fan-out rules.
//!
//! Interactive events (`join_*`, `leave_group`, `feedback_submitted`,
//! `settings_updated`) answer an unauthenticated caller with `error`.
//! Signalling events (`session_status_change`, `direct_message`, `typing`)
//! drop it silently. No handler failure ever closes the connection.

use feedback_common::Room;

use crate::error::HandlerError;
use crate::AppState;

use super::connection::Connection;
use super::events::{
    timestamp_now, ClientEvent, EventName, FeedbackSubmittedPayload, Inbound, NewFeedbackPayload,
    ServerMessage, SessionStatusChangePayload, SessionStatusChangedPayload, SessionUpdatePayload,
    SettingsChangedPayload, SettingsUpdatedPayload, TypingPayload, UserDisconnectedPayload,
    UserTypingPayload,
};
use super::{direct, handshake, rooms};

pub const NOT_AUTHENTICATED: &str = "Not authenticated";

/// Route one decoded event to its handler and translate any failure.
pub async fn dispatch(state: &AppState, conn: &mut Connection, event: ClientEvent) {
    let name = event.name();
    let result = match event {
        ClientEvent::Authenticate(payload) => handshake::authenticate(state, conn, payload).await,
        ClientEvent::JoinGroup(p) => rooms::join_group(state, conn, &p.group_id).await,
        ClientEvent::LeaveGroup(p) => rooms::leave_group(state, conn, &p.group_id),
        ClientEvent::JoinSession(p) => rooms::join_session(state, conn, &p.session_id).await,
        ClientEvent::FeedbackSubmitted(p) => feedback_submitted(state, conn, &p),
        ClientEvent::SessionStatusChange(p) => session_status_change(state, conn, &p).await,
        ClientEvent::SettingsUpdated(p) => settings_updated(state, conn, &p),
        ClientEvent::DirectMessage(p) => direct::send(state, conn, &p.to_user_id, &p.content).await,
        ClientEvent::Typing(p) => typing(state, conn, &p),
    };

    if let Err(err) = result {
        match &err {
            HandlerError::Unauthenticated => {
                tracing::debug!(connection_id = %conn.id(), event = %name, "event before authentication");
            }
            HandlerError::Service(e) => {
                tracing::error!(
                    connection_id = %conn.id(),
                    event = %name,
                    err = %e,
                    "event handler failed"
                );
            }
        }
        if let Some(reply) = failure_reply(name, &err) {
            state.registry.emit(conn.id(), reply);
        }
    }
}

/// The frame, if any, a caller sees when its handler fails.
pub fn failure_reply(event: &str, err: &HandlerError) -> Option<ServerMessage> {
    match (event, err) {
        (
            Inbound::SESSION_STATUS_CHANGE | Inbound::DIRECT_MESSAGE | Inbound::TYPING,
            HandlerError::Unauthenticated,
        ) => None,
        (_, HandlerError::Unauthenticated) => Some(ServerMessage::error(NOT_AUTHENTICATED)),
        (Inbound::DIRECT_MESSAGE, HandlerError::Service(_)) => Some(direct::error_frame(
            direct::CODE_SERVER_ERROR,
            "Failed to send message",
        )),
        (_, HandlerError::Service(_)) => None,
    }
}

/// `feedback_submitted`: notify the target user and the session room.
fn feedback_submitted(
    state: &AppState,
    conn: &Connection,
    payload: &FeedbackSubmittedPayload,
) -> Result<(), HandlerError> {
    let user = conn.user().ok_or(HandlerError::Unauthenticated)?;
    let timestamp = timestamp_now();
    let registry = &state.registry;

    registry.broadcast(
        &Room::user(payload.target_user_id.as_str()),
        ServerMessage::new(
            EventName::NEW_FEEDBACK,
            &NewFeedbackPayload {
                session_id: &payload.session_id,
                from_user_id: &user.id,
                from_username: &user.username,
                timestamp: &timestamp,
            },
        ),
        Some(conn.id()),
    );
    registry.broadcast(
        &Room::session(payload.session_id.as_str()),
        ServerMessage::new(
            EventName::SESSION_UPDATE,
            &SessionUpdatePayload {
                kind: Inbound::FEEDBACK_SUBMITTED,
                session_id: &payload.session_id,
                timestamp: &timestamp,
            },
        ),
        Some(conn.id()),
    );
    Ok(())
}

/// `session_status_change`: admins of the owning group only; anyone else is
/// ignored without a reply.
async fn session_status_change(
    state: &AppState,
    conn: &Connection,
    payload: &SessionStatusChangePayload,
) -> Result<(), HandlerError> {
    let user = conn.user().ok_or(HandlerError::Unauthenticated)?;
    let services = &state.services;

    let Some(group_id) = services.sessions.get_session_group(&payload.session_id).await? else {
        tracing::debug!(user_id = %user.id, session_id = %payload.session_id, "status change for unknown session");
        return Ok(());
    };
    let role = services.groups.get_role(&user.id, &group_id).await?;
    if !role.is_some_and(|r| r.is_admin()) {
        tracing::debug!(user_id = %user.id, session_id = %payload.session_id, "status change by non-admin ignored");
        return Ok(());
    }

    let timestamp = timestamp_now();
    state.registry.broadcast(
        &Room::session(payload.session_id.as_str()),
        ServerMessage::new(
            EventName::SESSION_STATUS_CHANGED,
            &SessionStatusChangedPayload {
                session_id: &payload.session_id,
                status: &payload.status,
                changed_by: &user.username,
                timestamp: &timestamp,
            },
        ),
        Some(conn.id()),
    );
    Ok(())
}

/// `settings_updated`: refresh the caller's own cache entry and sync the
/// change to the user's other connections.
fn settings_updated(
    state: &AppState,
    conn: &Connection,
    payload: &SettingsUpdatedPayload,
) -> Result<(), HandlerError> {
    let user = conn.user().ok_or(HandlerError::Unauthenticated)?;

    state.preferences.update(&user.id, &payload.settings);
    state.registry.broadcast(
        &Room::user(user.id.as_str()),
        ServerMessage::new(
            EventName::SETTINGS_CHANGED,
            &SettingsChangedPayload {
                user_id: &user.id,
                settings: &payload.settings,
                version: &payload.version,
            },
        ),
        Some(conn.id()),
    );
    Ok(())
}

/// `typing`: relayed only within a group room the caller has joined.
fn typing(state: &AppState, conn: &Connection, payload: &TypingPayload) -> Result<(), HandlerError> {
    let user = conn.user().ok_or(HandlerError::Unauthenticated)?;
    let room = Room::group(payload.group_id.as_str());
    if !state.registry.is_member(conn.id(), &room) {
        return Ok(());
    }

    state.registry.broadcast(
        &room,
        ServerMessage::new(
            EventName::USER_TYPING,
            &UserTypingPayload {
                group_id: &payload.group_id,
                user_id: &user.id,
                username: &user.username,
                is_typing: payload.is_typing,
            },
        ),
        Some(conn.id()),
    );
    Ok(())
}

/// Transport closed: drop the connection everywhere and announce the
/// departure once per room it had joined. Unauthenticated connections were
/// never in a room, so nothing is announced for them.
pub fn disconnect(state: &AppState, conn: &Connection) {
    let rooms = state.registry.unregister(conn.id());
    let Some(user) = conn.user() else {
        return;
    };

    for room in &rooms {
        state.registry.broadcast(
            room,
            ServerMessage::new(
                EventName::USER_DISCONNECTED,
                &UserDisconnectedPayload {
                    user_id: &user.id,
                    username: &user.username,
                },
            ),
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::gateway::testing::Harness;
    use crate::services::GroupRole;

    fn decode(raw: serde_json::Value) -> ClientEvent {
        ClientEvent::decode(&raw.to_string()).unwrap()
    }

    #[tokio::test]
    async fn nothing_happens_before_authentication() {
        let h = Harness::new();
        h.user("b", &[("g1", GroupRole::Admin)]);
        h.backend.add_session("s1", "g1");
        let mut b = h.login("b").await;
        let mut anon = h.connect();

        let events = [
            serde_json::json!({"event": "join_group", "data": {"groupId": "g1"}}),
            serde_json::json!({"event": "leave_group", "data": {"groupId": "g1"}}),
            serde_json::json!({"event": "join_session", "data": {"sessionId": "s1"}}),
            serde_json::json!({"event": "feedback_submitted", "data": {"sessionId": "s1", "targetUserId": "b"}}),
            serde_json::json!({"event": "settings_updated", "data": {"settings": {"allowMessaging": false}, "version": 1}}),
            serde_json::json!({"event": "session_status_change", "data": {"sessionId": "s1", "status": "ACTIVE"}}),
            serde_json::json!({"event": "direct_message", "data": {"toUserId": "b", "content": "hi"}}),
            serde_json::json!({"event": "typing", "data": {"groupId": "g1"}}),
        ];
        for raw in events {
            dispatch(&h.state, &mut anon.conn, decode(raw)).await;
        }

        // Five interactive events answered with an error, three silent.
        let frames = anon.drain();
        assert_eq!(frames.len(), 5);
        assert!(frames
            .iter()
            .all(|f| f.event == EventName::ERROR && f.data["message"] == NOT_AUTHENTICATED));

        assert!(b.drain().is_empty());
        assert!(h.state.registry.rooms_of(anon.conn.id()).is_empty());
        assert!(h.backend.saved_messages().is_empty());
        assert!(h.state.preferences.is_messaging_allowed("b"));
    }

    #[tokio::test]
    async fn feedback_notifies_target_and_session_but_not_sender() {
        let h = Harness::new();
        h.user("a", &[("g1", GroupRole::Member)]);
        h.user("t", &[("g1", GroupRole::Member)]);
        h.backend.add_session("s1", "g1");
        let mut a = h.login("a").await;
        let mut t = h.login("t").await;
        rooms::join_session(&h.state, &a.conn, "s1").await.unwrap();
        rooms::join_session(&h.state, &t.conn, "s1").await.unwrap();
        a.drain();
        t.drain();

        dispatch(
            &h.state,
            &mut a.conn,
            decode(serde_json::json!({"event": "feedback_submitted", "data": {"sessionId": "s1", "targetUserId": "t"}})),
        )
        .await;

        assert!(a.drain().is_empty());
        let frames = t.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, EventName::NEW_FEEDBACK);
        assert_eq!(frames[0].data["fromUserId"], "a");
        assert_eq!(frames[0].data["fromUsername"], "a_name");
        assert_eq!(frames[0].data["sessionId"], "s1");
        assert_eq!(frames[1].event, EventName::SESSION_UPDATE);
        assert_eq!(frames[1].data["type"], "feedback_submitted");
        assert_eq!(frames[0].data["timestamp"], frames[1].data["timestamp"]);
    }

    #[tokio::test]
    async fn admin_status_change_reaches_session_room() {
        let h = Harness::new();
        h.user("admin", &[("g1", GroupRole::Admin)]);
        h.user("m", &[("g1", GroupRole::Member)]);
        h.backend.add_session("s1", "g1");
        let mut admin = h.login("admin").await;
        let mut m = h.login("m").await;
        rooms::join_session(&h.state, &admin.conn, "s1").await.unwrap();
        rooms::join_session(&h.state, &m.conn, "s1").await.unwrap();
        admin.drain();
        m.drain();

        let change = serde_json::json!({"event": "session_status_change", "data": {"sessionId": "s1", "status": "ACTIVE"}});
        dispatch(&h.state, &mut admin.conn, decode(change.clone())).await;

        assert!(admin.drain().is_empty());
        let frames = m.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, EventName::SESSION_STATUS_CHANGED);
        assert_eq!(frames[0].data["sessionId"], "s1");
        assert_eq!(frames[0].data["status"], "ACTIVE");
        assert_eq!(frames[0].data["changedBy"], "admin_name");

        // A plain member is ignored without any reply.
        dispatch(&h.state, &mut m.conn, decode(change)).await;
        assert!(m.drain().is_empty());
        assert!(admin.drain().is_empty());
    }

    #[tokio::test]
    async fn settings_update_blocks_and_syncs_devices() {
        let h = Harness::new();
        h.user("b", &[]);
        let mut b1 = h.login("b").await;
        let mut b2 = h.login("b").await;

        dispatch(
            &h.state,
            &mut b1.conn,
            decode(serde_json::json!({"event": "settings_updated", "data": {"settings": {"allowMessaging": false, "theme": "dark"}, "version": 7}})),
        )
        .await;

        assert!(!h.state.preferences.is_messaging_allowed("b"));
        assert!(b1.drain().is_empty());
        let frames = b2.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, EventName::SETTINGS_CHANGED);
        assert_eq!(frames[0].data["userId"], "b");
        assert_eq!(frames[0].data["settings"]["theme"], "dark");
        assert_eq!(frames[0].data["version"], 7);
    }

    #[tokio::test]
    async fn typing_requires_room_membership() {
        let h = Harness::new();
        h.user("a", &[("g1", GroupRole::Member)]);
        h.user("b", &[("g1", GroupRole::Member)]);
        let mut a = h.login("a").await;
        let mut b = h.login("b").await;

        dispatch(
            &h.state,
            &mut a.conn,
            decode(serde_json::json!({"event": "typing", "data": {"groupId": "g1", "isTyping": true}})),
        )
        .await;
        let frames = b.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, EventName::USER_TYPING);
        assert_eq!(frames[0].data["isTyping"], true);

        dispatch(
            &h.state,
            &mut a.conn,
            decode(serde_json::json!({"event": "typing", "data": {"groupId": "g9"}})),
        )
        .await;
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn disconnect_announces_once_per_room() {
        let h = Harness::new();
        h.user("x", &[("g1", GroupRole::Member), ("g2", GroupRole::Member)]);
        h.user("y", &[("g1", GroupRole::Member), ("g2", GroupRole::Member)]);
        let x = h.login("x").await;
        let mut y = h.login("y").await;

        disconnect(&h.state, &x.conn);

        let frames = y.drain();
        assert_eq!(frames.len(), 2, "one per shared room");
        assert!(frames.iter().all(|f| f.event == EventName::USER_DISCONNECTED
            && f.data["userId"] == "x"
            && f.data["username"] == "x_name"));
        assert_eq!(h.state.registry.member_count(&Room::user("x")), 0);
        assert_eq!(h.state.registry.member_count(&Room::group("g1")), 1);
        assert_eq!(h.state.registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_of_unauthenticated_connection_is_quiet() {
        let h = Harness::new();
        h.user("y", &[("g1", GroupRole::Member)]);
        let mut y = h.login("y").await;
        let anon = h.connect();

        disconnect(&h.state, &anon.conn);

        assert!(y.drain().is_empty());
        assert_eq!(h.state.registry.connection_count(), 1);
    }

    #[test]
    fn failure_replies_follow_event_kind() {
        let service = || HandlerError::Service(ServiceError::upstream("down"));

        let reply = failure_reply(Inbound::DIRECT_MESSAGE, &service()).unwrap();
        assert_eq!(reply.event, EventName::DIRECT_MESSAGE_ERROR);
        assert_eq!(reply.data["code"], direct::CODE_SERVER_ERROR);

        assert!(failure_reply(Inbound::JOIN_GROUP, &service()).is_none());
        assert!(failure_reply(Inbound::DIRECT_MESSAGE, &HandlerError::Unauthenticated).is_none());
        assert!(failure_reply(Inbound::SESSION_STATUS_CHANGE, &HandlerError::Unauthenticated).is_none());

        let reply = failure_reply(Inbound::JOIN_SESSION, &HandlerError::Unauthenticated).unwrap();
        assert_eq!(reply.event, EventName::ERROR);
        assert_eq!(reply.data["message"], NOT_AUTHENTICATED);
    }

    #[tokio::test]
    async fn directory_outage_fails_authentication() {
        let h = Harness::new();
        h.user("x", &[("g1", GroupRole::Member)]);
        let mut client = h.connect();
        let auth = serde_json::json!({"event": "authenticate", "data": {"token": "tok_x"}});

        h.backend.fail_directory(true);
        dispatch(&h.state, &mut client.conn, decode(auth.clone())).await;

        let frames = client.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, EventName::AUTHENTICATION_ERROR);
        assert!(!client.conn.is_authenticated());
        assert!(h.state.registry.rooms_of(client.conn.id()).is_empty());

        // Same connection, retried once the directory is back.
        h.backend.fail_directory(false);
        dispatch(&h.state, &mut client.conn, decode(auth)).await;
        assert_eq!(client.events(), vec![EventName::AUTHENTICATED]);
        assert!(h.state.registry.is_member(client.conn.id(), &Room::group("g1")));
    }

    #[tokio::test]
    async fn membership_lookup_failure_is_quiet_and_recoverable() {
        let h = Harness::new();
        h.user("x", &[]);
        h.user("y", &[]);
        h.backend.add_member("x", "g2", GroupRole::Member);
        h.backend.add_member("y", "g2", GroupRole::Member);
        let mut x = h.login("x").await;
        let mut y = h.login("y").await;
        let join = serde_json::json!({"event": "join_group", "data": {"groupId": "g2"}});
        dispatch(&h.state, &mut y.conn, decode(join.clone())).await;
        y.drain();

        h.backend.fail_directory(true);
        dispatch(&h.state, &mut x.conn, decode(join.clone())).await;

        assert!(x.drain().is_empty());
        assert!(y.drain().is_empty());
        assert!(!h.state.registry.is_member(x.conn.id(), &Room::group("g2")));
        assert_eq!(h.state.registry.connection_count(), 2);

        h.backend.fail_directory(false);
        dispatch(&h.state, &mut x.conn, decode(join)).await;
        assert_eq!(x.events(), vec![EventName::JOINED_GROUP]);
        assert_eq!(y.events(), vec![EventName::USER_JOINED_GROUP]);
    }

    #[tokio::test]
    async fn status_change_is_dropped_when_session_lookup_fails() {
        let h = Harness::new();
        h.user("admin", &[("g1", GroupRole::Admin)]);
        h.user("m", &[("g1", GroupRole::Member)]);
        h.backend.add_session("s1", "g1");
        let mut admin = h.login("admin").await;
        let mut m = h.login("m").await;
        rooms::join_session(&h.state, &admin.conn, "s1").await.unwrap();
        rooms::join_session(&h.state, &m.conn, "s1").await.unwrap();
        admin.drain();
        m.drain();

        h.backend.fail_directory(true);
        dispatch(
            &h.state,
            &mut admin.conn,
            decode(serde_json::json!({"event": "session_status_change", "data": {"sessionId": "s1", "status": "CLOSED"}})),
        )
        .await;

        assert!(admin.drain().is_empty());
        assert!(m.drain().is_empty());
        assert!(h.state.registry.is_member(admin.conn.id(), &Room::session("s1")));
    }
}
