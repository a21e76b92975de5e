//! Event names and wire-format messages.
//!
//! Every frame in both directions is `{ "event": <name>, "data": <object> }`.
//! Payload keys are camelCase and must not change: existing clients match on them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServiceError;
use crate::services::UserProfile;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Event names accepted from clients.
pub struct Inbound;

impl Inbound {
    pub const AUTHENTICATE: &'static str = "authenticate";
    pub const JOIN_GROUP: &'static str = "join_group";
    pub const LEAVE_GROUP: &'static str = "leave_group";
    pub const JOIN_SESSION: &'static str = "join_session";
    pub const FEEDBACK_SUBMITTED: &'static str = "feedback_submitted";
    pub const SESSION_STATUS_CHANGE: &'static str = "session_status_change";
    pub const SETTINGS_UPDATED: &'static str = "settings_updated";
    pub const DIRECT_MESSAGE: &'static str = "direct_message";
    pub const TYPING: &'static str = "typing";
}

/// Event names emitted to clients.
pub struct EventName;

impl EventName {
    pub const AUTHENTICATED: &'static str = "authenticated";
    pub const AUTHENTICATION_ERROR: &'static str = "authentication_error";
    pub const JOINED_GROUP: &'static str = "joined_group";
    pub const USER_JOINED_GROUP: &'static str = "user_joined_group";
    pub const LEFT_GROUP: &'static str = "left_group";
    pub const USER_LEFT_GROUP: &'static str = "user_left_group";
    pub const JOINED_SESSION: &'static str = "joined_session";
    pub const ERROR: &'static str = "error";
    pub const NEW_FEEDBACK: &'static str = "new_feedback";
    pub const SESSION_UPDATE: &'static str = "session_update";
    pub const SESSION_STATUS_CHANGED: &'static str = "session_status_changed";
    pub const SETTINGS_CHANGED: &'static str = "settings_changed";
    pub const DIRECT_MESSAGE: &'static str = "direct_message";
    pub const DIRECT_MESSAGE_ACK: &'static str = "direct_message_ack";
    pub const DIRECT_MESSAGE_ERROR: &'static str = "direct_message_error";
    pub const USER_DISCONNECTED: &'static str = "user_disconnected";
    pub const USER_TYPING: &'static str = "user_typing";
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A frame received from the client.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct AuthenticatePayload {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    pub group_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmittedPayload {
    pub session_id: String,
    pub target_user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusChangePayload {
    pub session_id: String,
    pub status: String,
}

/// Partial settings object; only `allowMessaging` is interpreted, the rest is
/// relayed to the user's other devices untouched.
#[derive(Debug, Deserialize)]
pub struct SettingsUpdatedPayload {
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub version: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessagePayload {
    pub to_user_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub group_id: String,
    #[serde(default = "default_true")]
    pub is_typing: bool,
}

fn default_true() -> bool {
    true
}

/// A fully decoded inbound event.
#[derive(Debug)]
pub enum ClientEvent {
    Authenticate(AuthenticatePayload),
    JoinGroup(GroupPayload),
    LeaveGroup(GroupPayload),
    JoinSession(SessionPayload),
    FeedbackSubmitted(FeedbackSubmittedPayload),
    SessionStatusChange(SessionStatusChangePayload),
    SettingsUpdated(SettingsUpdatedPayload),
    DirectMessage(DirectMessagePayload),
    Typing(TypingPayload),
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    InvalidJson,
    UnknownEvent(String),
    InvalidPayload(&'static str),
}

impl DecodeError {
    pub fn message(&self) -> String {
        match self {
            DecodeError::InvalidJson => "Invalid JSON".to_string(),
            DecodeError::UnknownEvent(name) => format!("Unknown event: {name}"),
            DecodeError::InvalidPayload(event) => format!("Invalid payload for {event}"),
        }
    }
}

impl ClientEvent {
    /// Decode a raw text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let msg: ClientMessage =
            serde_json::from_str(text).map_err(|_| DecodeError::InvalidJson)?;
        Self::from_message(msg)
    }

    pub fn from_message(msg: ClientMessage) -> Result<Self, DecodeError> {
        fn payload<T: for<'de> Deserialize<'de>>(
            event: &'static str,
            data: Value,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(data).map_err(|_| DecodeError::InvalidPayload(event))
        }

        let data = msg.data;
        let event = match msg.event.as_str() {
            Inbound::AUTHENTICATE => {
                ClientEvent::Authenticate(payload(Inbound::AUTHENTICATE, data)?)
            }
            Inbound::JOIN_GROUP => ClientEvent::JoinGroup(payload(Inbound::JOIN_GROUP, data)?),
            Inbound::LEAVE_GROUP => ClientEvent::LeaveGroup(payload(Inbound::LEAVE_GROUP, data)?),
            Inbound::JOIN_SESSION => {
                ClientEvent::JoinSession(payload(Inbound::JOIN_SESSION, data)?)
            }
            Inbound::FEEDBACK_SUBMITTED => {
                ClientEvent::FeedbackSubmitted(payload(Inbound::FEEDBACK_SUBMITTED, data)?)
            }
            Inbound::SESSION_STATUS_CHANGE => {
                ClientEvent::SessionStatusChange(payload(Inbound::SESSION_STATUS_CHANGE, data)?)
            }
            Inbound::SETTINGS_UPDATED => {
                ClientEvent::SettingsUpdated(payload(Inbound::SETTINGS_UPDATED, data)?)
            }
            Inbound::DIRECT_MESSAGE => {
                ClientEvent::DirectMessage(payload(Inbound::DIRECT_MESSAGE, data)?)
            }
            Inbound::TYPING => ClientEvent::Typing(payload(Inbound::TYPING, data)?),
            other => return Err(DecodeError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate(_) => Inbound::AUTHENTICATE,
            ClientEvent::JoinGroup(_) => Inbound::JOIN_GROUP,
            ClientEvent::LeaveGroup(_) => Inbound::LEAVE_GROUP,
            ClientEvent::JoinSession(_) => Inbound::JOIN_SESSION,
            ClientEvent::FeedbackSubmitted(_) => Inbound::FEEDBACK_SUBMITTED,
            ClientEvent::SessionStatusChange(_) => Inbound::SESSION_STATUS_CHANGE,
            ClientEvent::SettingsUpdated(_) => Inbound::SETTINGS_UPDATED,
            ClientEvent::DirectMessage(_) => Inbound::DIRECT_MESSAGE,
            ClientEvent::Typing(_) => Inbound::TYPING,
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerMessage {
    pub event: &'static str,
    pub data: Value,
}

impl ServerMessage {
    /// Build a frame, falling back to `null` data if the payload cannot be
    /// encoded.
    pub fn new<T: Serialize>(event: &'static str, payload: &T) -> Self {
        Self::encode(event, payload).unwrap_or(Self {
            event,
            data: Value::Null,
        })
    }

    /// Build a frame, reporting a payload that cannot be encoded.
    pub fn encode<T: Serialize>(event: &'static str, payload: &T) -> Result<Self, ServiceError> {
        match serde_json::to_value(payload) {
            Ok(data) => Ok(Self { event, data }),
            Err(e) => {
                tracing::error!(?e, %event, "failed to encode outbound payload");
                Err(ServiceError::internal(format!("Failed to encode {event}")))
            }
        }
    }

    /// `error {message}`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            EventName::ERROR,
            &MessagePayload {
                message: message.into(),
            },
        )
    }

    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(?e, event = %self.event, "failed to serialize frame");
                None
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessagePayload {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AuthenticatedPayload<'a> {
    pub user: &'a UserProfile,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAck<'a> {
    pub group_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAck<'a> {
    pub session_id: &'a str,
}

/// `user_joined_group` / `user_left_group`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberEvent<'a> {
    pub group_id: &'a str,
    pub user_id: &'a str,
    pub username: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFeedbackPayload<'a> {
    pub session_id: &'a str,
    pub from_user_id: &'a str,
    pub from_username: &'a str,
    pub timestamp: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdatePayload<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub session_id: &'a str,
    pub timestamp: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusChangedPayload<'a> {
    pub session_id: &'a str,
    pub status: &'a str,
    pub changed_by: &'a str,
    pub timestamp: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsChangedPayload<'a> {
    pub user_id: &'a str,
    pub settings: &'a Map<String, Value>,
    pub version: &'a Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageOut<'a> {
    pub from_user_id: &'a str,
    pub content: &'a str,
    pub timestamp: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageAck<'a> {
    pub to_user_id: &'a str,
    pub content: &'a str,
    pub timestamp: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DirectMessageError<'a> {
    pub code: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDisconnectedPayload<'a> {
    pub user_id: &'a str,
    pub username: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload<'a> {
    pub group_id: &'a str,
    pub user_id: &'a str,
    pub username: &'a str,
    pub is_typing: bool,
}

/// Server-assigned ISO-8601 timestamp with millisecond precision.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
