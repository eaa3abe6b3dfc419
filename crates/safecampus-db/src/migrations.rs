use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                full_name       TEXT NOT NULL,
                phone_number    TEXT,
                role            TEXT NOT NULL,
                department      TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                last_login_at   TEXT
            );

            CREATE TABLE auth_sessions (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                expires_at  TEXT NOT NULL
            );

            CREATE INDEX idx_auth_sessions_expiry ON auth_sessions(expires_at);

            CREATE TABLE alerts (
                id                      TEXT PRIMARY KEY,
                user_id                 TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                department              TEXT NOT NULL,
                status                  TEXT NOT NULL DEFAULT 'pending',
                latitude                REAL,
                longitude               REAL,
                accuracy                REAL,
                location_description    TEXT,
                situation_data          TEXT NOT NULL DEFAULT '{}',
                response_notes          TEXT,
                acknowledged_by         TEXT REFERENCES users(id) ON DELETE SET NULL,
                acknowledged_at         TEXT,
                dispatched_at           TEXT,
                resolved_at             TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX idx_alerts_user ON alerts(user_id, created_at);
            CREATE INDEX idx_alerts_department ON alerts(department, created_at);

            CREATE TABLE chat_sessions (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                anonymous_id        TEXT NOT NULL UNIQUE,
                department          TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'active',
                last_message_at     TEXT NOT NULL,
                created_at          TEXT NOT NULL
            );

            CREATE INDEX idx_chat_sessions_department ON chat_sessions(department, last_message_at);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                session_id      TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                sender_id       TEXT NOT NULL,
                sender_role     TEXT NOT NULL,
                content         TEXT NOT NULL,
                attachment_url  TEXT,
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_messages_session ON messages(session_id, created_at);

            CREATE TABLE locations (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                code        TEXT NOT NULL UNIQUE,
                latitude    REAL NOT NULL,
                longitude   REAL NOT NULL,
                description TEXT
            );

            CREATE TABLE audit_logs (
                id          TEXT PRIMARY KEY,
                actor_id    TEXT NOT NULL,
                action      TEXT NOT NULL,
                target_id   TEXT,
                details     TEXT NOT NULL DEFAULT '{}',
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_audit_logs_created ON audit_logs(created_at);

            -- Seed campus reference buildings
            INSERT OR IGNORE INTO locations (id, name, code, latitude, longitude, description) VALUES
                ('00000000-0000-0000-0000-000000000101', 'Main Library', 'LIB', 40.7295, -73.9965, 'Central library and study halls'),
                ('00000000-0000-0000-0000-000000000102', 'Student Health Center', 'SHC', 40.7301, -73.9951, 'Clinic and counseling offices'),
                ('00000000-0000-0000-0000-000000000103', 'Campus Security Office', 'SEC', 40.7288, -73.9972, 'Open 24 hours'),
                ('00000000-0000-0000-0000-000000000104', 'Science Building', 'SCI', 40.7310, -73.9940, NULL),
                ('00000000-0000-0000-0000-000000000105', 'North Residence Hall', 'NRH', 40.7322, -73.9958, NULL);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        let locations: i64 = conn
            .query_row("SELECT COUNT(*) FROM locations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
        assert_eq!(locations, 5);
    }
}
