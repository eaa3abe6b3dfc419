//! Server-side sessions referenced by an HMAC-signed cookie.
//!
//! The cookie value is `<session id>.<signature>`. The signature only proves
//! the id was issued by this server; whether the session is still valid is
//! decided by the `auth_sessions` table on every request.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use uuid::Uuid;

use safecampus_types::models::User;

use crate::error::AppError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "sc_session";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CookieSigner {
    mac: HmacSha256,
}

impl CookieSigner {
    pub fn new(secret: &[u8]) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("invalid session secret: {}", e))?;
        Ok(Self { mac })
    }

    pub fn sign(&self, session_id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(session_id.as_bytes());
        let signature = mac.finalize().into_bytes();
        format!("{}.{}", session_id, URL_SAFE_NO_PAD.encode(signature))
    }

    /// Returns the session id if the signature checks out.
    pub fn verify<'a>(&self, value: &'a str) -> Option<&'a str> {
        let (session_id, signature) = value.rsplit_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let mut mac = self.mac.clone();
        mac.update(session_id.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(session_id)
    }
}

/// 256 random bits, URL-safe.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn session_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

/// Persist a new session for `user_id` and return the cookie that refers to it.
pub async fn start_session(state: &AppState, user_id: Uuid) -> Result<Cookie<'static>, AppError> {
    let session_id = new_session_id();
    let expires_at = chrono::Utc::now()
        .checked_add_signed(state.settings.session_ttl)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("session ttl overflows the clock")))?;

    let sid = session_id.clone();
    state
        .run_db(move |db| db.create_auth_session(&sid, user_id, expires_at))
        .await?;

    Ok(session_cookie(
        state.settings.signer.sign(&session_id),
        state.settings.secure_cookies,
    ))
}

/// Verified session id carried by the request, if any.
pub fn session_id_from(state: &AppState, jar: &CookieJar) -> Option<String> {
    let cookie = jar.get(SESSION_COOKIE)?;
    state
        .settings
        .signer
        .verify(cookie.value())
        .map(str::to_owned)
}

/// Resolve the request's cookie to an active user. Shared by the HTTP
/// middleware and the WebSocket upgrade.
pub async fn authenticate(state: &AppState, jar: &CookieJar) -> Result<User, AppError> {
    let session_id = session_id_from(state, jar).ok_or(AppError::Unauthenticated)?;

    let user = state
        .run_db(move |db| db.get_session_user(&session_id))
        .await?
        .ok_or(AppError::Unauthenticated)?;

    if !user.is_active {
        return Err(AppError::Unauthenticated);
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CookieSigner {
        CookieSigner::new(b"0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn signed_value_verifies() {
        let id = new_session_id();
        let signed = signer().sign(&id);
        assert_eq!(signer().verify(&signed), Some(id.as_str()));
    }

    #[test]
    fn tampered_value_is_rejected() {
        let signed = signer().sign("session-a");
        let forged = signed.replacen("session-a", "session-b", 1);
        assert_eq!(signer().verify(&forged), None);
        assert_eq!(signer().verify("session-a"), None);
        assert_eq!(signer().verify("session-a.not base64!"), None);
    }

    #[test]
    fn other_secret_is_rejected() {
        let signed = signer().sign("session-a");
        let other = CookieSigner::new(b"another secret entirely, also long").unwrap();
        assert_eq!(other.verify(&signed), None);
    }

    #[test]
    fn session_ids_are_unique_and_dot_free() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(!a.contains('.'));
    }

    #[test]
    fn cookie_is_http_only() {
        let cookie = session_cookie("v".into(), true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
    }
}
