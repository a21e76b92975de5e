//! REST client for the platform backend's internal endpoints.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

use super::{
    GroupDirectory, GroupRole, MessageStore, SessionDirectory, SettingsStore, UserDirectory,
    UserProfile,
};

#[derive(Clone)]
pub struct BackendClient {
    base_url: Url,
    service_token: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupListResponse {
    group_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsResponse {
    #[serde(default)]
    allow_messaging: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveMessageRequest<'a> {
    from_user_id: &'a str,
    to_user_id: &'a str,
    content: &'a str,
    timestamp: &'a str,
}

impl BackendClient {
    pub fn new(base_url: &str, service_token: Option<String>) -> Result<Self, ServiceError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ServiceError::internal(format!("Invalid backend URL: {base_url}")))?;
        Ok(Self {
            base_url,
            service_token,
            http: reqwest::Client::new(),
        })
    }

    /// `{base}/internal/<segments...>`. Each segment is percent-encoded on its
    /// own, so ids containing `/`, `?` or `#` cannot reach another resource.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("internal")
                .extend(segments.iter().copied());
        }
        url
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.service_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// GET a JSON resource; a 404 maps to `Ok(None)`.
    async fn get_optional<T>(&self, segments: &[&str]) -> Result<Option<T>, ServiceError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = self.url(segments);
        let resp = self.authorized(self.http.get(url.clone())).send().await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            tracing::error!(%url, status = %resp.status(), "backend returned error status");
            return Err(ServiceError::upstream("Backend returned an error"));
        }

        let body = resp.json::<T>().await.map_err(|e| {
            tracing::error!(?e, %url, "backend response parse failed");
            ServiceError::upstream("Failed to parse backend response")
        })?;
        Ok(Some(body))
    }
}

#[async_trait]
impl UserDirectory for BackendClient {
    async fn get_by_id(&self, user_id: &str) -> Result<Option<UserProfile>, ServiceError> {
        self.get_optional(&["users", user_id]).await
    }
}

#[async_trait]
impl GroupDirectory for BackendClient {
    async fn get_role(
        &self,
        user_id: &str,
        group_id: &str,
    ) -> Result<Option<GroupRole>, ServiceError> {
        let membership: Option<MembershipResponse> = self
            .get_optional(&["groups", group_id, "members", user_id])
            .await?;
        Ok(membership.map(|m| GroupRole::parse(&m.role)))
    }

    async fn list_groups_for_user(&self, user_id: &str) -> Result<Vec<String>, ServiceError> {
        let list: Option<GroupListResponse> =
            self.get_optional(&["users", user_id, "groups"]).await?;
        Ok(list.map(|l| l.group_ids).unwrap_or_default())
    }
}

#[async_trait]
impl SessionDirectory for BackendClient {
    async fn get_session_group(&self, session_id: &str) -> Result<Option<String>, ServiceError> {
        let session: Option<SessionResponse> =
            self.get_optional(&["sessions", session_id]).await?;
        Ok(session.map(|s| s.group_id))
    }
}

#[async_trait]
impl SettingsStore for BackendClient {
    async fn get_allow_messaging(&self, user_id: &str) -> Result<Option<bool>, ServiceError> {
        let settings: Option<SettingsResponse> =
            self.get_optional(&["users", user_id, "settings"]).await?;
        Ok(settings.and_then(|s| s.allow_messaging))
    }
}

#[async_trait]
impl MessageStore for BackendClient {
    async fn save(
        &self,
        from_user_id: &str,
        to_user_id: &str,
        content: &str,
        timestamp: &str,
    ) -> Result<(), ServiceError> {
        let url = self.url(&["messages"]);
        let body = SaveMessageRequest {
            from_user_id,
            to_user_id,
            content,
            timestamp,
        };
        let resp = self
            .authorized(self.http.post(url.clone()))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            tracing::error!(%url, status = %resp.status(), "message save rejected");
            return Err(ServiceError::upstream("Failed to save message"));
        }
        Ok(())
    }
}
