pub mod admin;
pub mod alerts;
pub mod auth;
pub mod chats;
pub mod error;
pub mod extract;
pub mod locations;
pub mod middleware;
pub mod policy;
pub mod realtime;
pub mod session;
pub mod state;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
};

use crate::middleware::{require_admin, require_auth, require_responder, require_student};
use crate::state::AppState;

/// All HTTP and WebSocket routes. Cross-cutting layers (CORS, tracing) are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/ws", get(realtime::ws_upgrade))
        .route("/health", get(locations::health));

    let student = Router::new()
        .route("/api/alerts", post(alerts::create_alert))
        .route("/api/chats/sessions", post(chats::create_session))
        .route_layer(from_fn(require_student));

    let responder = Router::new()
        .route("/api/alerts/department/{department}", get(alerts::list_department_alerts))
        .route("/api/chats/department/{department}", get(chats::list_department_sessions))
        .route_layer(from_fn(require_responder));

    let admin = Router::new()
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/users", get(admin::list_users).post(admin::create_user))
        .route("/api/admin/users/{id}", patch(admin::update_user).delete(admin::delete_user))
        .route("/api/admin/alerts", get(admin::list_alerts))
        .route("/api/admin/chats", get(admin::list_chats))
        .route("/api/admin/audit-logs", get(admin::list_audit_logs))
        .route_layer(from_fn(require_admin));

    // Any signed-in user; ownership and department checks happen in the handlers
    let member = Router::new()
        .route("/api/auth/me", get(auth::me))
        .route("/api/alerts/my-alerts", get(alerts::list_my_alerts))
        .route(
            "/api/alerts/{id}",
            get(alerts::get_alert)
                .merge(patch(alerts::update_alert_status).route_layer(from_fn(require_responder))),
        )
        .route("/api/chats/my-sessions", get(chats::list_my_sessions))
        .route(
            "/api/chats/sessions/{id}",
            get(chats::get_session).patch(chats::update_session_status),
        )
        .route("/api/chats/sessions/{id}/read", post(chats::mark_read))
        .route("/api/chats/messages", post(chats::post_message))
        .route("/api/chats/messages/{session_id}", get(chats::list_messages))
        .route("/api/locations", get(locations::list_locations));

    let protected = Router::new()
        .merge(student)
        .merge(responder)
        .merge(admin)
        .merge(member)
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}
