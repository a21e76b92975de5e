//! Per-connection state owned by the connection task.

use feedback_common::ConnectionId;

use crate::services::UserProfile;

/// Identity of a connection. The only transition is
/// `Unauthenticated -> Authenticated`; there is no way back and no way to
/// swap one identity for another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated(UserProfile),
}

/// Returned when `authenticate` arrives on a connection that already has an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyAuthenticated;

/// State for a single socket connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    auth: AuthState,
}

impl Connection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            auth: AuthState::Unauthenticated,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Profile snapshot captured at authentication, if any.
    pub fn user(&self) -> Option<&UserProfile> {
        match &self.auth {
            AuthState::Authenticated(profile) => Some(profile),
            AuthState::Unauthenticated => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user().map(|u| u.id.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.auth, AuthState::Authenticated(_))
    }

    /// Bind an identity to this connection.
    pub fn bind(&mut self, profile: UserProfile) -> Result<(), AlreadyAuthenticated> {
        if self.is_authenticated() {
            return Err(AlreadyAuthenticated);
        }
        self.auth = AuthState::Authenticated(profile);
        Ok(())
    }
}
