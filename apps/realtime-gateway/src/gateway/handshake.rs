//! `authenticate` handling: verify the bearer credential and bind the connection.

use feedback_common::Room;

use crate::error::{HandlerError, ServiceError};
use crate::services::UserProfile;
use crate::AppState;

use super::connection::Connection;
use super::events::{
    AuthenticatePayload, AuthenticatedPayload, EventName, MessagePayload, ServerMessage,
};

/// Process an `authenticate` event.
///
/// Every external lookup happens before any local state changes, so the
/// client observes either `authenticated` with all rooms already joined or
/// `authentication_error` with nothing changed. A failed attempt leaves the
/// connection open for a retry.
pub async fn authenticate(
    state: &AppState,
    conn: &mut Connection,
    payload: AuthenticatePayload,
) -> Result<(), HandlerError> {
    if conn.is_authenticated() {
        reject(state, conn, "Already authenticated");
        return Ok(());
    }

    let (profile, groups) = match resolve(state, &payload.token).await {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::debug!(connection_id = %conn.id(), %err, "authentication failed");
            reject(state, conn, &err.message);
            return Ok(());
        }
    };

    state
        .preferences
        .hydrate(state.services.settings.as_ref(), &profile.id)
        .await;

    if conn.bind(profile).is_err() {
        reject(state, conn, "Already authenticated");
        return Ok(());
    }
    let Some(user) = conn.user() else {
        return Ok(());
    };

    let registry = &state.registry;
    registry.join(conn.id(), Room::user(user.id.as_str()));
    for group_id in &groups {
        registry.join(conn.id(), Room::group(group_id.as_str()));
    }

    tracing::info!(
        connection_id = %conn.id(),
        user_id = %user.id,
        groups = groups.len(),
        "connection authenticated"
    );

    registry.emit(
        conn.id(),
        ServerMessage::new(EventName::AUTHENTICATED, &AuthenticatedPayload { user }),
    );
    Ok(())
}

/// Verify the credential and load the profile and group list it maps to.
async fn resolve(
    state: &AppState,
    token: &str,
) -> Result<(UserProfile, Vec<String>), ServiceError> {
    let services = &state.services;
    let user_id = services.identity.verify(token).await?;

    let profile = services
        .users
        .get_by_id(&user_id)
        .await?
        .ok_or_else(|| ServiceError::not_found("User not found"))?;

    let groups = services.groups.list_groups_for_user(&profile.id).await?;
    Ok((profile, groups))
}

fn reject(state: &AppState, conn: &Connection, message: &str) {
    state.registry.emit(
        conn.id(),
        ServerMessage::new(
            EventName::AUTHENTICATION_ERROR,
            &MessagePayload {
                message: message.to_string(),
            },
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::Harness;
    use crate::services::GroupRole;

    fn token(t: &str) -> AuthenticatePayload {
        AuthenticatePayload {
            token: t.to_string(),
        }
    }

    #[tokio::test]
    async fn joins_user_and_group_rooms() {
        let h = Harness::new();
        h.user("x", &[("g1", GroupRole::Member), ("g2", GroupRole::Admin)]);
        let mut client = h.connect();

        authenticate(&h.state, &mut client.conn, token("tok_x")).await.unwrap();

        let rooms = h.state.registry.rooms_of(client.conn.id());
        assert_eq!(
            rooms,
            vec![Room::user("x"), Room::group("g1"), Room::group("g2")]
        );

        let frames = client.drain();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, EventName::AUTHENTICATED);
        assert_eq!(frames[0].data["user"]["id"], "x");
        assert_eq!(frames[0].data["user"]["username"], "x_name");
        assert_eq!(frames[0].data["user"]["fullName"], "x Full");
    }

    #[tokio::test]
    async fn hydrates_preferences() {
        let h = Harness::new();
        h.user("x", &[]);
        h.backend.set_allow_messaging("x", false);
        let mut client = h.connect();

        assert!(h.state.preferences.is_messaging_allowed("x"));
        authenticate(&h.state, &mut client.conn, token("tok_x")).await.unwrap();
        assert!(!h.state.preferences.is_messaging_allowed("x"));
    }

    #[tokio::test]
    async fn bad_token_leaves_connection_unauthenticated() {
        let h = Harness::new();
        h.user("x", &[("g1", GroupRole::Member)]);
        let mut client = h.connect();

        authenticate(&h.state, &mut client.conn, token("bogus")).await.unwrap();

        assert!(!client.conn.is_authenticated());
        assert!(h.state.registry.rooms_of(client.conn.id()).is_empty());
        assert_eq!(client.events(), vec![EventName::AUTHENTICATION_ERROR]);

        // Retry on the same connection succeeds.
        authenticate(&h.state, &mut client.conn, token("tok_x")).await.unwrap();
        assert!(client.conn.is_authenticated());
        assert_eq!(client.events(), vec![EventName::AUTHENTICATED]);
    }

    #[tokio::test]
    async fn deleted_user_is_an_authentication_failure() {
        let h = Harness::new();
        h.user("x", &[]);
        h.backend.remove_user("x");
        let mut client = h.connect();

        authenticate(&h.state, &mut client.conn, token("tok_x")).await.unwrap();

        assert!(!client.conn.is_authenticated());
        let frames = client.drain();
        assert_eq!(frames[0].event, EventName::AUTHENTICATION_ERROR);
        assert_eq!(frames[0].data["message"], "User not found");
        assert!(h.state.preferences.get("x").is_none());
    }

    #[tokio::test]
    async fn cannot_switch_identity() {
        let h = Harness::new();
        h.user("x", &[]);
        h.user("y", &[]);
        let mut client = h.login("x").await;

        authenticate(&h.state, &mut client.conn, token("tok_y")).await.unwrap();

        assert_eq!(client.conn.user_id(), Some("x"));
        assert_eq!(client.events(), vec![EventName::AUTHENTICATION_ERROR]);
        assert_eq!(h.state.registry.member_count(&Room::user("y")), 0);
    }
}
