use axum::{Json, extract::State};

use safecampus_types::models::Location;

use crate::error::AppError;
use crate::state::AppState;

/// Seeded campus buildings, by name.
pub async fn list_locations(State(state): State<AppState>) -> Result<Json<Vec<Location>>, AppError> {
    Ok(Json(state.run_db(|db| db.list_locations()).await?))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
