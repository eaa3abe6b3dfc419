use std::collections::BTreeMap;

use anyhow::Result;
use rusqlite::Connection;

use safecampus_types::api::{AdminStats, GroupedCounts, UserStats};
use safecampus_types::models::{AlertStatus, ChatStatus, Department};

use crate::Database;

impl Database {
    /// Summary counts for the admin dashboard. Recomputed on every call;
    /// `connected_users` is left at zero for the caller to fill in.
    pub fn admin_stats(&self) -> Result<AdminStats> {
        self.with_conn(|conn| {
            let users = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(is_active), 0),
                        COALESCE(SUM(role = 'student'), 0),
                        COALESCE(SUM(role = 'staff'), 0),
                        COALESCE(SUM(role = 'admin'), 0)
                 FROM users",
                [],
                |row| {
                    Ok(UserStats {
                        total: row.get(0)?,
                        active: row.get(1)?,
                        students: row.get(2)?,
                        staff: row.get(3)?,
                        admins: row.get(4)?,
                    })
                },
            )?;

            let alert_statuses: Vec<&str> = AlertStatus::ALL.iter().map(|s| s.as_str()).collect();
            let alert_departments: Vec<&str> = Department::ALL
                .iter()
                .filter(|d| d.accepts_alerts())
                .map(|d| d.as_str())
                .collect();
            let chat_statuses: Vec<&str> = ChatStatus::ALL.iter().map(|s| s.as_str()).collect();
            let chat_departments: Vec<&str> = Department::ALL.iter().map(|d| d.as_str()).collect();

            let alerts = grouped_counts(conn, "alerts", &alert_statuses, &alert_departments)?;
            let chats = grouped_counts(conn, "chat_sessions", &chat_statuses, &chat_departments)?;
            let messages = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;

            Ok(AdminStats {
                users,
                alerts,
                chats,
                messages,
                connected_users: 0,
            })
        })
    }
}

fn grouped_counts(
    conn: &Connection,
    table: &str,
    statuses: &[&str],
    departments: &[&str],
) -> Result<GroupedCounts> {
    let total = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(GroupedCounts {
        total,
        by_status: count_by(conn, table, "status", statuses)?,
        by_department: count_by(conn, table, "department", departments)?,
    })
}

/// Counts grouped on `column`, seeded with zero for every expected key.
fn count_by(conn: &Connection, table: &str, column: &str, keys: &[&str]) -> Result<BTreeMap<String, u64>> {
    let mut counts: BTreeMap<String, u64> = keys.iter().map(|k| (k.to_string(), 0)).collect();

    let mut stmt = conn.prepare(&format!("SELECT {column}, COUNT(*) FROM {table} GROUP BY {column}"))?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?;
    for row in rows {
        let (key, count) = row?;
        counts.insert(key, count);
    }

    Ok(counts)
}
