use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    AlertStatus, ChatSession, ChatStatus, Department, Message, Role, SenderRole, User,
};

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `{ "user": ... }` wrapper returned by the auth endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: User,
}

// -- Alerts --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateAlertRequest {
    pub department: Department,
    #[serde(default)]
    pub situation_data: BTreeMap<String, String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub location_description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateAlertRequest {
    pub status: AlertStatus,
    #[serde(default)]
    pub response_notes: Option<String>,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChatSessionRequest {
    pub department: Department,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateChatSessionRequest {
    pub status: ChatStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub session_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub attachment_url: Option<String>,
}

/// Chat session as seen by one participant. The owner's real id is only
/// present when the viewer may know it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionResponse {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub anonymous_id: String,
    pub department: Department,
    pub status: ChatStatus,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ChatSessionResponse {
    pub fn new(session: ChatSession, reveal_owner: bool) -> Self {
        Self {
            id: session.id,
            user_id: reveal_owner.then_some(session.user_id),
            anonymous_id: session.anonymous_id,
            department: session.department,
            status: session.status,
            last_message_at: session.last_message_at,
            created_at: session.created_at,
        }
    }
}

/// Message as seen by one participant. Student senders are anonymous to
/// staff, so `sender_id` is dropped for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Uuid>,
    pub sender_role: SenderRole,
    pub content: String,
    pub attachment_url: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageResponse {
    pub fn new(message: Message, reveal_sender: bool) -> Self {
        Self {
            id: message.id,
            session_id: message.session_id,
            sender_id: reveal_sender.then_some(message.sender_id),
            sender_role: message.sender_role,
            content: message.content,
            attachment_url: message.attachment_url,
            is_read: message.is_read,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

// -- Admin --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub department: Option<Department>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub department: Option<Department>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total: u64,
    pub active: u64,
    pub students: u64,
    pub staff: u64,
    pub admins: u64,
}

/// Totals keyed by the enum's wire name. Every known key is present, zero
/// included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedCounts {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    pub by_department: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStats {
    pub users: UserStats,
    pub alerts: GroupedCounts,
    pub chats: GroupedCounts,
    pub messages: u64,
    pub connected_users: usize,
}
