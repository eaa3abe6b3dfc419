use anyhow::Result;
use uuid::Uuid;

use safecampus_types::models::{ChatSession, ChatStatus, Department, Message, SenderRole};

use crate::models::{CHAT_SESSION_COLUMNS, MESSAGE_COLUMNS, NewMessage, chat_session_from_row, message_from_row};
use crate::queries::OptionalExt;
use crate::{Database, now, to_sql_time};

impl Database {
    // -- Sessions --

    /// Insert an active session under `anonymous_id`. The handle is not
    /// pre-checked; a collision comes back as a unique violation.
    pub fn create_chat_session(
        &self,
        user_id: Uuid,
        anonymous_id: &str,
        department: Department,
    ) -> Result<ChatSession> {
        let created = now();
        let session = ChatSession {
            id: Uuid::new_v4(),
            user_id,
            anonymous_id: anonymous_id.to_string(),
            department,
            status: ChatStatus::Active,
            last_message_at: created,
            created_at: created,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_sessions (id, user_id, anonymous_id, department, status, last_message_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                rusqlite::params![
                    session.id.to_string(),
                    session.user_id.to_string(),
                    session.anonymous_id,
                    session.department.as_str(),
                    session.status.as_str(),
                    to_sql_time(created),
                ],
            )?;
            Ok(())
        })?;

        Ok(session)
    }

    pub fn get_chat_session(&self, id: Uuid) -> Result<Option<ChatSession>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1"))?;
            let session = stmt.query_row([id.to_string()], chat_session_from_row).optional()?;
            Ok(session)
        })
    }

    /// Most recent activity first.
    pub fn list_chat_sessions_for_user(&self, user_id: Uuid) -> Result<Vec<ChatSession>> {
        self.query_chat_sessions("WHERE user_id = ?1", Some(user_id.to_string()))
    }

    pub fn list_chat_sessions_for_department(&self, department: Department) -> Result<Vec<ChatSession>> {
        self.query_chat_sessions("WHERE department = ?1", Some(department.as_str().to_string()))
    }

    pub fn list_all_chat_sessions(&self) -> Result<Vec<ChatSession>> {
        self.query_chat_sessions("", None)
    }

    fn query_chat_sessions(&self, filter: &str, param: Option<String>) -> Result<Vec<ChatSession>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions {filter}
                 ORDER BY last_message_at DESC, rowid DESC"
            ))?;
            let rows = match param {
                Some(p) => stmt
                    .query_map([p], chat_session_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt
                    .query_map([], chat_session_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }

    pub fn set_chat_status(&self, id: Uuid, status: ChatStatus) -> Result<Option<ChatSession>> {
        let id = id.to_string();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE chat_sessions SET status = ?2 WHERE id = ?1",
                rusqlite::params![id, status.as_str()],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let mut stmt =
                conn.prepare(&format!("SELECT {CHAT_SESSION_COLUMNS} FROM chat_sessions WHERE id = ?1"))?;
            let session = stmt.query_row([&id], chat_session_from_row).optional()?;
            Ok(session)
        })
    }

    // -- Messages --

    /// Append a message and bump the parent session's `last_message_at` in
    /// one transaction. An inactive session becomes active again. Returns
    /// `None` without writing when the session is gone or closed.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Option<Message>> {
        let message = Message {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            sender_id: new.sender_id,
            sender_role: new.sender_role,
            content: new.content.clone(),
            attachment_url: new.attachment_url.clone(),
            is_read: false,
            created_at: now(),
        };
        let created = to_sql_time(message.created_at);

        let stored = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            // Status is read under the same lock as the insert, so a close
            // that commits first is always seen
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM chat_sessions WHERE id = ?1",
                    [message.session_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match status.as_deref() {
                None => return Ok(false),
                Some(s) if s == ChatStatus::Closed.as_str() => return Ok(false),
                Some(_) => {}
            }

            tx.execute(
                "INSERT INTO messages (id, session_id, sender_id, sender_role, content, attachment_url, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![
                    message.id.to_string(),
                    message.session_id.to_string(),
                    message.sender_id.to_string(),
                    message.sender_role.as_str(),
                    message.content,
                    message.attachment_url,
                    created,
                ],
            )?;
            // MAX keeps the column monotonic if a later message committed first
            tx.execute(
                "UPDATE chat_sessions
                 SET last_message_at = MAX(last_message_at, ?2),
                     status = CASE WHEN status = 'inactive' THEN 'active' ELSE status END
                 WHERE id = ?1",
                rusqlite::params![message.session_id.to_string(), created],
            )?;
            tx.commit()?;
            Ok(true)
        })?;

        Ok(stored.then_some(message))
    }

    /// Oldest first, insertion order breaking timestamp ties.
    pub fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE session_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([session_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark everything the other side sent as read. Returns the number of
    /// messages that changed.
    pub fn mark_messages_read(&self, session_id: Uuid, reader: SenderRole) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE session_id = ?1 AND sender_role != ?2 AND is_read = 0",
                rusqlite::params![session_id.to_string(), reader.as_str()],
            )?;
            Ok(updated)
        })
    }
}
