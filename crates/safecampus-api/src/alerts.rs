use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{info, warn};
use uuid::Uuid;

use safecampus_db::NewAlert;
use safecampus_types::api::{CreateAlertRequest, UpdateAlertRequest};
use safecampus_types::events::GatewayEvent;
use safecampus_types::models::{Alert, Department, User};

use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath};
use crate::policy::{self, Action, Resource};
use crate::state::AppState;

const MAX_SITUATION_ANSWERS: usize = 50;
const MAX_TEXT_LEN: usize = 2000;

fn validate_new_alert(req: &CreateAlertRequest) -> Result<(), AppError> {
    if !req.department.accepts_alerts() {
        return Err(AppError::validation(format!(
            "Alerts can only be sent to medical or security, not {}",
            req.department
        )));
    }
    if req.latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
        return Err(AppError::validation("Latitude must be between -90 and 90"));
    }
    if req.longitude.is_some_and(|lon| !(-180.0..=180.0).contains(&lon)) {
        return Err(AppError::validation("Longitude must be between -180 and 180"));
    }
    if req.accuracy.is_some_and(|acc| !acc.is_finite() || acc < 0.0) {
        return Err(AppError::validation("Accuracy must be a non-negative number"));
    }
    if req.situation_data.len() > MAX_SITUATION_ANSWERS {
        return Err(AppError::validation("Too many situation answers"));
    }
    let too_long = req
        .situation_data
        .iter()
        .any(|(k, v)| k.len() > MAX_TEXT_LEN || v.len() > MAX_TEXT_LEN)
        || req.location_description.as_ref().is_some_and(|d| d.len() > MAX_TEXT_LEN);
    if too_long {
        return Err(AppError::validation("Alert text is too long"));
    }
    Ok(())
}

/// POST /api/alerts — students only (enforced by the route layer).
pub async fn create_alert(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiJson(req): ApiJson<CreateAlertRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_new_alert(&req)?;

    let new = NewAlert {
        user_id: actor.id,
        department: req.department,
        latitude: req.latitude,
        longitude: req.longitude,
        accuracy: req.accuracy,
        location_description: req.location_description,
        situation_data: req.situation_data,
    };
    let alert = state.run_db(move |db| db.create_alert(&new)).await?;
    info!("Alert {} raised by {} for {}", alert.id, actor.id, alert.department);

    notify_department(&state, &alert).await;

    Ok((StatusCode::CREATED, Json(alert)))
}

/// Push `new_alert` to every active staff member of the alert's department.
/// Failures are logged; the alert is already stored.
async fn notify_department(state: &AppState, alert: &Alert) {
    let department = alert.department;
    let staff = match state.run_db(move |db| db.active_staff_ids(department)).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!("Could not look up {} staff for alert {}: {}", department, alert.id, e);
            return;
        }
    };

    let event = GatewayEvent::NewAlert {
        alert_id: alert.id,
        department,
        alert: alert.clone(),
    };
    let delivered = state.dispatcher.push_to_users(staff, &event).await;
    info!("new_alert {} delivered to {} connections", alert.id, delivered);
}

pub async fn list_my_alerts(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
) -> Result<Json<Vec<Alert>>, AppError> {
    let alerts = state.run_db(move |db| db.list_alerts_for_user(actor.id)).await?;
    Ok(Json(alerts))
}

pub async fn list_department_alerts(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiPath(department): ApiPath<Department>,
) -> Result<Json<Vec<Alert>>, AppError> {
    policy::authorize(&actor, Action::View, Resource::DepartmentQueue(department)).ensure()?;
    if !department.accepts_alerts() {
        return Err(AppError::validation(format!("{} does not receive alerts", department)));
    }

    let alerts = state
        .run_db(move |db| db.list_alerts_for_department(department))
        .await?;
    Ok(Json(alerts))
}

pub async fn get_alert(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiPath(alert_id): ApiPath<Uuid>,
) -> Result<Json<Alert>, AppError> {
    let alert = state
        .run_db(move |db| db.get_alert(alert_id))
        .await?
        .ok_or(AppError::NotFound("Alert"))?;
    policy::authorize(&actor, Action::View, Resource::Alert(&alert)).ensure()?;
    Ok(Json(alert))
}

/// PATCH /api/alerts/{id} — staff of the alert's department, or admin.
pub async fn update_alert_status(
    State(state): State<AppState>,
    Extension(actor): Extension<User>,
    ApiPath(alert_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateAlertRequest>,
) -> Result<Json<Alert>, AppError> {
    let current = state
        .run_db(move |db| db.get_alert(alert_id))
        .await?
        .ok_or(AppError::NotFound("Alert"))?;

    policy::authorize(&actor, Action::Respond, Resource::Alert(&current)).ensure()?;

    let target = req.status;
    if !current.status.can_transition_to(target) {
        return Err(AppError::InvalidTransition {
            from: current.status,
            to: target,
        });
    }

    let notes = req.response_notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    if notes.as_ref().is_some_and(|n| n.len() > MAX_TEXT_LEN) {
        return Err(AppError::validation("Response notes are too long"));
    }

    let from = current.status;
    let actor_id = actor.id;
    let updated = state
        .run_db(move |db| {
            let updated = db.transition_alert(alert_id, from, target, actor_id, notes.as_deref())?;
            match updated {
                Some(alert) => Ok(Ok(alert)),
                // Someone else moved it between our read and write
                None => Ok(Err(db.get_alert(alert_id)?)),
            }
        })
        .await?;

    let alert = match updated {
        Ok(alert) => alert,
        Err(Some(latest)) => {
            return Err(AppError::InvalidTransition {
                from: latest.status,
                to: target,
            });
        }
        Err(None) => return Err(AppError::NotFound("Alert")),
    };

    info!("Alert {} {} -> {} by {}", alert.id, from, alert.status, actor.id);

    let event = GatewayEvent::AlertUpdated {
        alert_id: alert.id,
        status: alert.status,
    };
    state.dispatcher.push_to_user(alert.user_id, &event).await;

    Ok(Json(alert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(department: Department) -> CreateAlertRequest {
        CreateAlertRequest {
            department,
            situation_data: BTreeMap::new(),
            latitude: Some(40.0),
            longitude: Some(-73.0),
            accuracy: Some(5.0),
            location_description: None,
        }
    }

    #[test]
    fn guidance_cannot_receive_alerts() {
        assert!(validate_new_alert(&request(Department::Medical)).is_ok());
        assert!(validate_new_alert(&request(Department::Security)).is_ok());
        assert!(matches!(
            validate_new_alert(&request(Department::Guidance)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn coordinates_are_range_checked() {
        let mut req = request(Department::Medical);
        req.latitude = Some(91.0);
        assert!(validate_new_alert(&req).is_err());

        let mut req = request(Department::Medical);
        req.longitude = Some(-180.5);
        assert!(validate_new_alert(&req).is_err());

        let mut req = request(Department::Medical);
        req.accuracy = Some(-1.0);
        assert!(validate_new_alert(&req).is_err());
    }

    #[test]
    fn oversized_situation_data_is_rejected() {
        let mut req = request(Department::Security);
        req.situation_data = (0..=MAX_SITUATION_ANSWERS).map(|i| (format!("q{i}"), "a".to_string())).collect();
        assert!(validate_new_alert(&req).is_err());
    }
}
