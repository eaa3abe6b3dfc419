use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use safecampus_types::models::{AuditAction, AuditLog, Department, Location, Role, User};

use crate::models::{NewUser, USER_COLUMNS, UserUpdate, audit_log_from_row, location_from_row, user_from_row};
use crate::{Database, now, to_sql_time};

impl Database {
    // -- Users --

    /// Insert a user. Emails are stored lowercase; a duplicate surfaces as a
    /// unique violation (see `is_unique_violation`).
    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let created = now();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email.trim().to_lowercase(),
            full_name: new.full_name.clone(),
            phone_number: new.phone_number.clone(),
            role: new.role,
            department: new.department,
            is_active: true,
            created_at: created,
            updated_at: created,
            last_login_at: None,
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, full_name, phone_number, role, department, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9)",
                rusqlite::params![
                    user.id.to_string(),
                    user.email,
                    new.password_hash,
                    user.full_name,
                    user.phone_number,
                    user.role.as_str(),
                    user.department.map(Department::as_str),
                    to_sql_time(user.created_at),
                    to_sql_time(user.updated_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(user)
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| query_user(conn, "email", &email.trim().to_lowercase()))
    }

    /// User plus stored password hash, for login.
    pub fn get_credentials(&self, email: &str) -> Result<Option<(User, String)>> {
        let email = email.trim().to_lowercase();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS}, password FROM users WHERE email = ?1"
            ))?;
            let row = stmt
                .query_row([&email], |row| Ok((user_from_row(row)?, row.get::<_, String>(10)?)))
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns the updated user, or `None` if the id is unknown.
    pub fn update_user(&self, id: Uuid, update: &UserUpdate) -> Result<Option<User>> {
        let id = id.to_string();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET
                    is_active = COALESCE(?2, is_active),
                    role = COALESCE(?3, role),
                    department = COALESCE(?4, department),
                    updated_at = ?5
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    update.is_active,
                    update.role.map(Role::as_str),
                    update.department.map(Department::as_str),
                    to_sql_time(now()),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user(conn, "id", &id)
        })
    }

    /// Deletes the user and, through cascades, their sessions, alerts and chats.
    pub fn delete_user(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id.to_string()])?;
            Ok(deleted > 0)
        })
    }

    pub fn record_login(&self, id: Uuid) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login_at = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), to_sql_time(now())],
            )?;
            Ok(())
        })
    }

    /// Ids of active staff assigned to `department`: the recipients of
    /// department-wide pushes.
    pub fn active_staff_ids(&self, department: Department) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM users WHERE role = 'staff' AND department = ?1 AND is_active = 1",
            )?;
            let ids = stmt
                .query_map([department.as_str()], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids.iter().filter_map(|id| id.parse().ok()).collect())
        })
    }

    // -- Auth sessions --

    pub fn create_auth_session(&self, id: &str, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO auth_sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, user_id.to_string(), to_sql_time(now()), to_sql_time(expires_at)],
            )?;
            Ok(())
        })
    }

    /// Resolve an unexpired session to its user. Expired or unknown ids yield
    /// `None`; the caller still has to check `is_active`.
    pub fn get_session_user(&self, session_id: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM auth_sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.id = ?1 AND s.expires_at > ?2",
                prefixed_user_columns("u")
            ))?;
            let user = stmt
                .query_row(rusqlite::params![session_id, to_sql_time(now())], user_from_row)
                .optional()?;
            Ok(user)
        })
    }

    pub fn delete_auth_session(&self, session_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM auth_sessions WHERE id = ?1", [session_id])?;
            Ok(())
        })
    }

    pub fn delete_expired_sessions(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM auth_sessions WHERE expires_at <= ?1",
                [to_sql_time(now())],
            )?;
            Ok(removed)
        })
    }

    // -- Reference data --

    pub fn list_locations(&self) -> Result<Vec<Location>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, code, latitude, longitude, description FROM locations ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], location_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Audit log --

    pub fn insert_audit_log(
        &self,
        actor_id: Uuid,
        action: AuditAction,
        target_id: Option<Uuid>,
        details: serde_json::Value,
    ) -> Result<AuditLog> {
        let entry = AuditLog {
            id: Uuid::new_v4(),
            actor_id,
            action,
            target_id,
            details,
            created_at: now(),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_logs (id, actor_id, action, target_id, details, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    entry.id.to_string(),
                    entry.actor_id.to_string(),
                    entry.action.as_str(),
                    entry.target_id.map(|t| t.to_string()),
                    entry.details.to_string(),
                    to_sql_time(entry.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(entry)
    }

    /// Newest first.
    pub fn list_audit_logs(&self, limit: u32) -> Result<Vec<AuditLog>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, actor_id, action, target_id, details, created_at FROM audit_logs
                 ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map([limit], audit_log_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;
    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

pub(crate) fn prefixed_user_columns(alias: &str) -> String {
    USER_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
