use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ServiceError;

use super::{
    GroupDirectory, GroupRole, IdentityVerifier, MessageStore, SessionDirectory, SettingsStore,
    UserDirectory, UserProfile,
};

// ---------------------------------------------------------------------------
// In-memory implementation (for dev mode / tests)
// ---------------------------------------------------------------------------

/// A direct message as handed to the message store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedMessage {
    pub from_user_id: String,
    pub to_user_id: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Default)]
struct Data {
    tokens: HashMap<String, String>,
    users: HashMap<String, UserProfile>,
    memberships: HashMap<(String, String), GroupRole>,
    sessions: HashMap<String, String>,
    allow_messaging: HashMap<String, bool>,
    saved: Vec<SavedMessage>,
}

/// Backend that keeps users, groups, sessions and settings in process memory.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<Data>,
    fail_saves: AtomicBool,
    fail_settings: AtomicBool,
    fail_directory: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: &str, username: &str, full_name: &str) {
        self.data.lock().users.insert(
            id.to_string(),
            UserProfile {
                id: id.to_string(),
                username: username.to_string(),
                full_name: full_name.to_string(),
            },
        );
    }

    pub fn remove_user(&self, id: &str) {
        self.data.lock().users.remove(id);
    }

    /// Accept `token` as an opaque credential for `user_id`.
    pub fn issue_token(&self, token: &str, user_id: &str) {
        self.data
            .lock()
            .tokens
            .insert(token.to_string(), user_id.to_string());
    }

    pub fn add_member(&self, user_id: &str, group_id: &str, role: GroupRole) {
        self.data
            .lock()
            .memberships
            .insert((user_id.to_string(), group_id.to_string()), role);
    }

    pub fn remove_member(&self, user_id: &str, group_id: &str) {
        self.data
            .lock()
            .memberships
            .remove(&(user_id.to_string(), group_id.to_string()));
    }

    pub fn add_session(&self, session_id: &str, group_id: &str) {
        self.data
            .lock()
            .sessions
            .insert(session_id.to_string(), group_id.to_string());
    }

    pub fn set_allow_messaging(&self, user_id: &str, allow: bool) {
        self.data
            .lock()
            .allow_messaging
            .insert(user_id.to_string(), allow);
    }

    /// Make every subsequent `save` fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent settings read fail.
    pub fn fail_settings(&self, fail: bool) {
        self.fail_settings.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent user, group and session lookup fail.
    pub fn fail_directory(&self, fail: bool) {
        self.fail_directory.store(fail, Ordering::Relaxed);
    }

    fn check_directory(&self) -> Result<(), ServiceError> {
        if self.fail_directory.load(Ordering::Relaxed) {
            return Err(ServiceError::upstream("directory unavailable"));
        }
        Ok(())
    }

    pub fn saved_messages(&self) -> Vec<SavedMessage> {
        self.data.lock().saved.clone()
    }
}

#[async_trait]
impl IdentityVerifier for MemoryBackend {
    async fn verify(&self, credential: &str) -> Result<String, ServiceError> {
        self.data
            .lock()
            .tokens
            .get(credential)
            .cloned()
            .ok_or_else(|| ServiceError::unauthorized("Invalid or expired token"))
    }
}

#[async_trait]
impl UserDirectory for MemoryBackend {
    async fn get_by_id(&self, user_id: &str) -> Result<Option<UserProfile>, ServiceError> {
        self.check_directory()?;
        Ok(self.data.lock().users.get(user_id).cloned())
    }
}

#[async_trait]
impl GroupDirectory for MemoryBackend {
    async fn get_role(
        &self,
        user_id: &str,
        group_id: &str,
    ) -> Result<Option<GroupRole>, ServiceError> {
        self.check_directory()?;
        Ok(self
            .data
            .lock()
            .memberships
            .get(&(user_id.to_string(), group_id.to_string()))
            .copied())
    }

    async fn list_groups_for_user(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        self.check_directory()?;
        let data = self.data.lock();
        let mut groups: Vec<String> = data
            .memberships
            .keys()
            .filter(|(uid, _)| uid == user_id)
            .map(|(_, gid)| gid.clone())
            .collect();
        groups.sort();
        Ok(groups)
    }
}

#[async_trait]
impl SessionDirectory for MemoryBackend {
    async fn get_session_group(&self, session_id: &str) -> Result<Option<String>, ServiceError> {
        self.check_directory()?;
        Ok(self.data.lock().sessions.get(session_id).cloned())
    }
}

#[async_trait]
impl SettingsStore for MemoryBackend {
    async fn get_allow_messaging(&self, user_id: &str) -> Result<Option<bool>, ServiceError> {
        if self.fail_settings.load(Ordering::Relaxed) {
            return Err(ServiceError::upstream("settings store unavailable"));
        }
        Ok(self.data.lock().allow_messaging.get(user_id).copied())
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn save(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<(), ServiceError> {
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(ServiceError::upstream("message store unavailable"));
        }
        self.data.lock().saved.push(SavedMessage {
            from_user_id: from_user_id.to_string(),
            to_user_id: to_user_id.to_string(),
            content: content.to_string(),
            timestamp: timestamp.to_string(),
        });
        Ok(())
    }
}
