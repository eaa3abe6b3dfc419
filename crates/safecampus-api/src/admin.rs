//! `/api/admin/*`. Every route here sits behind `require_admin`.

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;
use uuid::Uuid;

use safecampus_db::{NewUser, UserUpdate, is_unique_violation};
use safecampus_types::api::{AdminStats, CreateUserRequest, UpdateUserRequest};
use safecampus_types::models::{Alert, AuditAction, AuditLog, ChatSession, Role, User};

use crate::auth::{hash_password, validate_email, validate_full_name, validate_password};
use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath};
use crate::state::AppState;

const AUDIT_LOG_LIMIT: u32 = 200;

pub async fn stats(State(state): State<AppState>) -> Result<Json<AdminStats>, AppError> {
    let mut stats = state.run_db(|db| db.admin_stats()).await?;
    stats.connected_users = state.dispatcher.online_user_count().await;
    Ok(Json(stats))
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.run_db(|db| db.list_users()).await?))
}

pub async fn list_alerts(State(state): State<AppState>) -> Result<Json<Vec<Alert>>, AppError> {
    Ok(Json(state.run_db(|db| db.list_all_alerts()).await?))
}

pub async fn list_chats(State(state): State<AppState>) -> Result<Json<Vec<ChatSession>>, AppError> {
    Ok(Json(state.run_db(|db| db.list_all_chat_sessions()).await?))
}

pub async fn list_audit_logs(State(state): State<AppState>) -> Result<Json<Vec<AuditLog>>, AppError> {
    Ok(Json(state.run_db(|db| db.list_audit_logs(AUDIT_LOG_LIMIT)).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    // Admin-created accounts are not bound to the self-registration domain
    let email = validate_email(&req.email, None)?;
    validate_password(&req.password)?;
    let full_name = validate_full_name(&req.full_name)?;
    if req.role == Role::Staff && req.department.is_none() {
        return Err(AppError::validation("Staff accounts require a department"));
    }

    let password = req.password;
    let phone_number = req.phone_number.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    let role = req.role;
    let department = req.department;
    let admin_id = admin.id;

    let created = state
        .run_db(move |db| {
            let new = NewUser {
                email,
                password_hash: hash_password(&password)?,
                full_name,
                phone_number,
                role,
                department,
            };
            let user = match db.create_user(&new) {
                Ok(user) => user,
                Err(e) if is_unique_violation(&e) => return Ok(None),
                Err(e) => return Err(e),
            };
            db.insert_audit_log(
                admin_id,
                AuditAction::UserCreated,
                Some(user.id),
                serde_json::json!({
                    "email": user.email,
                    "role": user.role,
                    "department": user.department,
                }),
            )?;
            Ok(Some(user))
        })
        .await?;

    let user = created.ok_or_else(|| AppError::Conflict("Email is already registered".into()))?;
    info!("Admin {} created {} {} ({})", admin.id, user.role, user.email, user.id);
    Ok((StatusCode::CREATED, Json(user)))
}

/// Reject updates an admin may not apply to their own account.
fn check_self_update(admin: &User, target: Uuid, req: &UpdateUserRequest) -> Result<(), AppError> {
    if admin.id != target {
        return Ok(());
    }
    if req.is_active == Some(false) {
        return Err(AppError::validation("You cannot deactivate your own account"));
    }
    if req.role.is_some_and(|role| role != Role::Admin) {
        return Err(AppError::validation("You cannot remove your own admin role"));
    }
    Ok(())
}

pub async fn update_user(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateUserRequest>,
) -> Result<Json<User>, AppError> {
    check_self_update(&admin, user_id, &req)?;

    let current = state
        .run_db(move |db| db.get_user_by_id(user_id))
        .await?
        .ok_or(AppError::NotFound("User"))?;

    let role = req.role.unwrap_or(current.role);
    let department = req.department.or(current.department);
    if role == Role::Staff && department.is_none() {
        return Err(AppError::validation("Staff accounts require a department"));
    }

    let details = serde_json::json!({
        "isActive": req.is_active,
        "role": req.role,
        "department": req.department,
    });
    let update = UserUpdate {
        is_active: req.is_active,
        role: req.role,
        department: req.department,
    };
    let admin_id = admin.id;

    let updated = state
        .run_db(move |db| {
            let Some(user) = db.update_user(user_id, &update)? else {
                return Ok(None);
            };
            db.insert_audit_log(admin_id, AuditAction::UserUpdated, Some(user_id), details)?;
            Ok(Some(user))
        })
        .await?
        .ok_or(AppError::NotFound("User"))?;

    info!("Admin {} updated user {}", admin.id, user_id);
    Ok(Json(updated))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(admin): Extension<User>,
    ApiPath(user_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    if admin.id == user_id {
        return Err(AppError::validation("You cannot delete your own account"));
    }

    let admin_id = admin.id;
    let deleted = state
        .run_db(move |db| {
            let Some(user) = db.get_user_by_id(user_id)? else {
                return Ok(false);
            };
            if !db.delete_user(user_id)? {
                return Ok(false);
            }
            db.insert_audit_log(
                admin_id,
                AuditAction::UserDeleted,
                Some(user_id),
                serde_json::json!({ "email": user.email, "role": user.role }),
            )?;
            Ok(true)
        })
        .await?;

    if !deleted {
        return Err(AppError::NotFound("User"));
    }

    info!("Admin {} deleted user {}", admin.id, user_id);
    Ok(Json(serde_json::json!({ "message": "User deleted" })))
}
