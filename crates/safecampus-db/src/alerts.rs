use anyhow::Result;
use uuid::Uuid;

use safecampus_types::models::{Alert, AlertStatus, Department};

use crate::models::{ALERT_COLUMNS, NewAlert, alert_from_row};
use crate::queries::OptionalExt;
use crate::{Database, now, to_sql_time};

impl Database {
    pub fn create_alert(&self, new: &NewAlert) -> Result<Alert> {
        let created = now();
        let alert = Alert {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            department: new.department,
            status: AlertStatus::Pending,
            latitude: new.latitude,
            longitude: new.longitude,
            accuracy: new.accuracy,
            location_description: new.location_description.clone(),
            situation_data: new.situation_data.clone(),
            response_notes: None,
            acknowledged_by: None,
            acknowledged_at: None,
            dispatched_at: None,
            resolved_at: None,
            created_at: created,
            updated_at: created,
        };

        let situation = serde_json::to_string(&alert.situation_data)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO alerts (id, user_id, department, status, latitude, longitude, accuracy,
                                     location_description, situation_data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                rusqlite::params![
                    alert.id.to_string(),
                    alert.user_id.to_string(),
                    alert.department.as_str(),
                    alert.status.as_str(),
                    alert.latitude,
                    alert.longitude,
                    alert.accuracy,
                    alert.location_description,
                    situation,
                    to_sql_time(created),
                ],
            )?;
            Ok(())
        })?;

        Ok(alert)
    }

    pub fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"))?;
            let alert = stmt.query_row([id.to_string()], alert_from_row).optional()?;
            Ok(alert)
        })
    }

    pub fn list_alerts_for_user(&self, user_id: Uuid) -> Result<Vec<Alert>> {
        self.query_alerts("WHERE user_id = ?1", Some(user_id.to_string()))
    }

    pub fn list_alerts_for_department(&self, department: Department) -> Result<Vec<Alert>> {
        self.query_alerts("WHERE department = ?1", Some(department.as_str().to_string()))
    }

    pub fn list_all_alerts(&self) -> Result<Vec<Alert>> {
        self.query_alerts("", None)
    }

    fn query_alerts(&self, filter: &str, param: Option<String>) -> Result<Vec<Alert>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM alerts {filter} ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = match param {
                Some(p) => stmt.query_map([p], alert_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?,
                None => stmt.query_map([], alert_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?,
            };
            Ok(rows)
        })
    }

    /// Move an alert from `from` to `to`, stamping the timestamp (and actor,
    /// for acknowledgement) that belongs to the new status. `notes` replaces
    /// the stored response notes when given.
    ///
    /// The update only applies while the row is still in `from`; `None` means
    /// the alert is gone or another responder moved it first. Validating the
    /// transition itself is the caller's job.
    pub fn transition_alert(
        &self,
        id: Uuid,
        from: AlertStatus,
        to: AlertStatus,
        actor_id: Uuid,
        notes: Option<&str>,
    ) -> Result<Option<Alert>> {
        let stamp = match to {
            AlertStatus::Acknowledged => ", acknowledged_at = ?1, acknowledged_by = ?2",
            AlertStatus::Dispatched => ", dispatched_at = ?1",
            AlertStatus::Resolved => ", resolved_at = ?1",
            AlertStatus::Pending => "",
        };
        let sql = format!(
            "UPDATE alerts SET status = ?3, updated_at = ?1,
                response_notes = COALESCE(?4, response_notes){stamp}
             WHERE id = ?5 AND status = ?6"
        );
        let id = id.to_string();

        self.with_conn(|conn| {
            let changed = conn.execute(
                &sql,
                rusqlite::params![
                    to_sql_time(now()),
                    actor_id.to_string(),
                    to.as_str(),
                    notes,
                    id,
                    from.as_str(),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let mut stmt = conn.prepare(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"))?;
            let alert = stmt.query_row([&id], alert_from_row).optional()?;
            Ok(alert)
        })
    }
}
