//! In-memory snapshot of the privacy preferences consulted on every direct message.
//!
//! The cache is process-wide and only valid for a single gateway process.
//! An entry is written when its user authenticates and whenever one of that
//! user's own connections emits `settings_updated`; nothing else invalidates
//! it and it is never re-read from the store on the send path. Unknown users
//! are allowed to receive messages.

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::services::SettingsStore;

/// Settings key carrying the messaging preference.
pub const ALLOW_MESSAGING: &str = "allowMessaging";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceEntry {
    pub allow_messaging: bool,
}

impl Default for PreferenceEntry {
    fn default() -> Self {
        Self {
            allow_messaging: true,
        }
    }
}

#[derive(Default)]
pub struct PreferenceCache {
    entries: DashMap<String, PreferenceEntry>,
}

impl PreferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the user's preferences from the store and overwrite the cached entry.
    /// A missing value or a failed read yields the permissive default.
    pub async fn hydrate(&self, store: &dyn SettingsStore, user_id: &str) -> PreferenceEntry {
        let allow_messaging = match store.get_allow_messaging(user_id).await {
            Ok(value) => value.unwrap_or(true),
            Err(err) => {
                tracing::warn!(%user_id, %err, "settings read failed, defaulting to allow messaging");
                true
            }
        };
        let entry = PreferenceEntry { allow_messaging };
        self.entries.insert(user_id.to_string(), entry);
        entry
    }

    /// Apply a partial settings object. Only a boolean `allowMessaging`
    /// is taken; other keys leave the entry untouched.
    /// Returns the new value when it was applied.
    pub fn update(&self, user_id: &str, settings: &Map<String, Value>) -> Option<bool> {
        let value = settings.get(ALLOW_MESSAGING)?;
        let Some(allow) = value.as_bool() else {
            tracing::debug!(%user_id, ?value, "ignoring non-boolean allowMessaging");
            return None;
        };
        self.entries
            .entry(user_id.to_string())
            .or_default()
            .allow_messaging = allow;
        Some(allow)
    }

    pub fn is_messaging_allowed(&self, user_id: &str) -> bool {
        self.entries
            .get(user_id)
            .map(|e| e.allow_messaging)
            .unwrap_or(true)
    }

    pub fn get(&self, user_id: &str) -> Option<PreferenceEntry> {
        self.entries.get(user_id).map(|e| *e)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
