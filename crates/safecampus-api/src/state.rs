use std::sync::Arc;

use tracing::error;

use safecampus_db::Database;
use safecampus_gateway::dispatcher::Dispatcher;

use crate::error::AppError;
use crate::session::CookieSigner;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub settings: Settings,
}

/// Runtime knobs the handlers need. Loaded by the server binary.
pub struct Settings {
    pub signer: CookieSigner,
    pub session_ttl: chrono::Duration,
    /// When set, self-registration is limited to this email domain.
    pub email_domain: Option<String>,
    pub secure_cookies: bool,
}

impl AppStateInner {
    pub fn new(db: Database, dispatcher: Dispatcher, settings: Settings) -> AppState {
        Arc::new(Self {
            db,
            dispatcher,
            settings,
        })
    }

    /// Run a blocking database call off the async runtime.
    pub async fn run_db<F, T>(self: &Arc<Self>, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&state.db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                AppError::Internal(anyhow::anyhow!("database task failed"))
            })?
            .map_err(AppError::from)
    }
}
