//! Interfaces to the collaborators the gateway depends on but does not own.
//!
//! Everything behind these traits (identity provider, REST backend, settings
//! and message persistence) is the source of truth; the gateway only caches
//! messaging preferences and never caches an authorization decision.

pub mod http;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Public profile of a user, captured once at authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub full_name: String,
}

/// A user's role within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Admin,
    Member,
}

impl GroupRole {
    /// Parse a backend role string. Unknown roles are treated as plain members.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("admin") {
            GroupRole::Admin
        } else {
            GroupRole::Member
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, GroupRole::Admin)
    }
}

/// Verifies a bearer credential and yields the user id it was issued to.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, user_id: &str) -> Result<Option<UserProfile>, ServiceError>;
}

#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn get_role(&self, user_id: &str, group_id: &str)
        -> Result<Option<GroupRole>, ServiceError>;

    async fn list_groups_for_user(&self, user_id: &str) -> Result<Vec<String>, ServiceError>;

    async fn is_member(&self, user_id: &str, group_id: &str) -> Result<bool, ServiceError> {
        Ok(self.get_role(user_id, group_id).await?.is_some())
    }
}

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Owning group of a feedback session, or `None` if the session does not exist.
    async fn get_session_group(&self, session_id: &str) -> Result<Option<String>, ServiceError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stored `allowMessaging` flag, or `None` if the user never saved one.
    async fn get_allow_messaging(&self, user_id: &str) -> Result<Option<bool>, ServiceError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<(), ServiceError>;
}

/// Bundle of every external collaborator, shared by all connections.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityVerifier>,
    pub users: Arc<dyn UserDirectory>,
    pub groups: Arc<dyn GroupDirectory>,
    pub sessions: Arc<dyn SessionDirectory>,
    pub settings: Arc<dyn SettingsStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl Services {
    /// Use one backend for everything except identity verification.
    pub fn from_backend<B>(identity: Arc<dyn IdentityVerifier>, backend: Arc<B>) -> Self
    where
        B: UserDirectory
            + GroupDirectory
            + SessionDirectory
            + SettingsStore
            + MessageStore
            + 'static,
    {
        Self {
            identity,
            users: backend.clone(),
            groups: backend.clone(),
            sessions: backend.clone(),
            settings: backend.clone(),
            messages: backend,
        }
    }
}
