//! Insert/update inputs and the mapping from SQLite rows to the shared
//! models in safecampus-types.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use safecampus_types::models::{
    Alert, AuditLog, ChatSession, Department, Location, Message, Role, SenderRole, User,
};

pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub role: Role,
    pub department: Option<Department>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Default)]
pub struct UserUpdate {
    pub is_active: Option<bool>,
    pub role: Option<Role>,
    pub department: Option<Department>,
}

pub struct NewAlert {
    pub user_id: Uuid,
    pub department: Department,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub location_description: Option<String>,
    pub situation_data: BTreeMap<String, String>,
}

pub struct NewMessage {
    pub session_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: SenderRole,
    pub content: String,
    pub attachment_url: Option<String>,
}

// -- Column lists, kept next to the mappers that depend on their order --

pub(crate) const USER_COLUMNS: &str = "id, email, full_name, phone_number, role, department, \
     is_active, created_at, updated_at, last_login_at";

pub(crate) const ALERT_COLUMNS: &str = "id, user_id, department, status, latitude, longitude, \
     accuracy, location_description, situation_data, response_notes, acknowledged_by, \
     acknowledged_at, dispatched_at, resolved_at, created_at, updated_at";

pub(crate) const CHAT_SESSION_COLUMNS: &str =
    "id, user_id, anonymous_id, department, status, last_message_at, created_at";

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, session_id, sender_id, sender_role, content, attachment_url, is_read, created_at";

/// Parse a TEXT column through `FromStr`, reporting failures as conversion
/// errors on that column.
fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parsed_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

fn json_map(row: &Row<'_>, idx: usize) -> rusqlite::Result<BTreeMap<String, String>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parsed(row, 0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        phone_number: row.get(3)?,
        role: parsed(row, 4)?,
        department: parsed_opt(row, 5)?,
        is_active: row.get(6)?,
        created_at: parsed::<DateTime<Utc>>(row, 7)?,
        updated_at: parsed::<DateTime<Utc>>(row, 8)?,
        last_login_at: parsed_opt(row, 9)?,
    })
}

pub(crate) fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        department: parsed(row, 2)?,
        status: parsed(row, 3)?,
        latitude: row.get(4)?,
        longitude: row.get(5)?,
        accuracy: row.get(6)?,
        location_description: row.get(7)?,
        situation_data: json_map(row, 8)?,
        response_notes: row.get(9)?,
        acknowledged_by: parsed_opt(row, 10)?,
        acknowledged_at: parsed_opt(row, 11)?,
        dispatched_at: parsed_opt(row, 12)?,
        resolved_at: parsed_opt(row, 13)?,
        created_at: parsed(row, 14)?,
        updated_at: parsed(row, 15)?,
    })
}

pub(crate) fn chat_session_from_row(row: &Row<'_>) -> rusqlite::Result<ChatSession> {
    Ok(ChatSession {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        anonymous_id: row.get(2)?,
        department: parsed(row, 3)?,
        status: parsed(row, 4)?,
        last_message_at: parsed(row, 5)?,
        created_at: parsed(row, 6)?,
    })
}

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parsed(row, 0)?,
        session_id: parsed(row, 1)?,
        sender_id: parsed(row, 2)?,
        sender_role: parsed(row, 3)?,
        content: row.get(4)?,
        attachment_url: row.get(5)?,
        is_read: row.get(6)?,
        created_at: parsed(row, 7)?,
    })
}

pub(crate) fn location_from_row(row: &Row<'_>) -> rusqlite::Result<Location> {
    Ok(Location {
        id: parsed(row, 0)?,
        name: row.get(1)?,
        code: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        description: row.get(5)?,
    })
}

pub(crate) fn audit_log_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLog> {
    let details: String = row.get(4)?;
    Ok(AuditLog {
        id: parsed(row, 0)?,
        actor_id: parsed(row, 1)?,
        action: parsed(row, 2)?,
        target_id: parsed_opt(row, 3)?,
        details: serde_json::from_str(&details)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        created_at: parsed(row, 5)?,
    })
}
