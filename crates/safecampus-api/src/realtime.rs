use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::rejection::WebSocketUpgradeRejection,
    },
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use safecampus_gateway::connection;

use crate::error::AppError;
use crate::session;
use crate::state::AppState;

/// GET /ws. The cookie is checked before the upgrade; anonymous clients get
/// a plain 401 and never reach the gateway.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<impl IntoResponse, AppError> {
    let user = session::authenticate(&state, &jar).await?;
    let ws = ws.map_err(|e| AppError::validation(e.body_text()))?;

    debug!("Upgrading gateway connection for {}", user.id);
    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, user.id)))
}
