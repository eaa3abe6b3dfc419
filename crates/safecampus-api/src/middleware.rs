use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use safecampus_types::models::{Role, User};

use crate::error::AppError;
use crate::session;
use crate::state::AppState;

/// Resolve the session cookie to an active user and attach it to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let jar = CookieJar::from_headers(req.headers());
    let user = session::authenticate(&state, &jar).await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

pub async fn require_student(req: Request, next: Next) -> Result<Response, AppError> {
    require_role(&[Role::Student], req, next).await
}

/// Staff or admin.
pub async fn require_responder(req: Request, next: Next) -> Result<Response, AppError> {
    require_role(&[Role::Staff, Role::Admin], req, next).await
}

pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    require_role(&[Role::Admin], req, next).await
}

/// Must run inside `require_auth`.
async fn require_role(allowed: &[Role], req: Request, next: Next) -> Result<Response, AppError> {
    let user = req.extensions().get::<User>().ok_or(AppError::Unauthenticated)?;
    if !allowed.contains(&user.role) {
        return Err(AppError::Forbidden("insufficient role"));
    }
    Ok(next.run(req).await)
}
