use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};

use safecampus_db::{NewUser, is_unique_violation};
use safecampus_types::api::{LoginRequest, RegisterRequest, UserEnvelope};
use safecampus_types::models::{Role, User};

use crate::error::AppError;
use crate::extract::ApiJson;
use crate::session;
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

/// Hash with Argon2id and a fresh salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        warn!("Stored password hash is not in PHC format");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Normalize and check an email address. `domain` restricts the accepted
/// domain (case-insensitive) when given.
pub fn validate_email(email: &str, domain: Option<&str>) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    let (local, host) = email
        .split_once('@')
        .ok_or_else(|| AppError::validation("Invalid email address"))?;

    let well_formed = !local.is_empty()
        && !host.contains('@')
        && host.contains('.')
        && !host.starts_with('.')
        && !host.ends_with('.')
        && !email.chars().any(char::is_whitespace);
    if !well_formed {
        return Err(AppError::validation("Invalid email address"));
    }

    if let Some(required) = domain {
        if host != required.trim().to_lowercase() {
            return Err(AppError::validation(format!("Email must belong to {}", required)));
        }
    }

    Ok(email)
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn validate_full_name(full_name: &str) -> Result<String, AppError> {
    let name = full_name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(AppError::validation("Full name must be 1-100 characters"));
    }
    Ok(name.to_string())
}

/// Self-registration always creates a student and logs them in.
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = validate_email(&req.email, state.settings.email_domain.as_deref())?;
    validate_password(&req.password)?;
    let full_name = validate_full_name(&req.full_name)?;
    let phone_number = req.phone_number.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());

    let password = req.password;
    let created = state
        .run_db(move |db| {
            let new = NewUser {
                email,
                password_hash: hash_password(&password)?,
                full_name,
                phone_number,
                role: Role::Student,
                department: None,
            };
            match db.create_user(&new) {
                Ok(user) => Ok(Some(user)),
                Err(e) if is_unique_violation(&e) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await?;

    // Registration reports a taken email as a plain validation failure
    let user = created.ok_or_else(|| AppError::validation("Email is already registered"))?;
    info!("Registered student {} ({})", user.email, user.id);

    let cookie = session::start_session(&state, user.id).await?;
    Ok((StatusCode::CREATED, jar.add(cookie), Json(UserEnvelope { user })))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = req.email;
    let password = req.password;

    // Hash verification is deliberately slow, keep it off the runtime
    let user = state
        .run_db(move |db| {
            let Some((user, hash)) = db.get_credentials(&email)? else {
                return Ok(None);
            };
            if !verify_password(&password, &hash) {
                return Ok(None);
            }
            if !user.is_active {
                warn!("Login attempt for disabled account {}", user.id);
                return Ok(None);
            }
            db.record_login(user.id)?;
            Ok(Some(user))
        })
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    info!("{} logged in", user.email);
    let cookie = session::start_session(&state, user.id).await?;
    Ok((jar.add(cookie), Json(UserEnvelope { user })))
}

/// Always succeeds; a missing or stale cookie is simply cleared.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(session_id) = session::session_id_from(&state, &jar) {
        state
            .run_db(move |db| db.delete_auth_session(&session_id))
            .await?;
    }

    Ok((
        jar.remove(session::removal_cookie()),
        Json(serde_json::json!({ "message": "Logged out" })),
    ))
}

pub async fn me(Extension(user): Extension<User>) -> Json<UserEnvelope> {
    Json(UserEnvelope { user })
}
