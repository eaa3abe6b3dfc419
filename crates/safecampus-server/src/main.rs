mod cleanup;
mod config;

use axum::http::{Method, header::CONTENT_TYPE};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use safecampus_api::auth::{hash_password, validate_email, validate_password};
use safecampus_api::session::CookieSigner;
use safecampus_api::state::{AppState, AppStateInner, Settings};
use safecampus_db::{Database, NewUser};
use safecampus_gateway::dispatcher::Dispatcher;
use safecampus_types::models::Role;

use crate::config::Config;

const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safecampus=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: {:#}", e);
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Database::open(&config.db_path)?;

    let settings = Settings {
        signer: CookieSigner::new(config.session_secret.as_bytes())?,
        session_ttl: chrono::Duration::hours(config.session_ttl_hours),
        email_domain: config.email_domain.clone(),
        secure_cookies: config.secure_cookies,
    };
    let state = AppStateInner::new(db, Dispatcher::new(), settings);

    if let Some((email, password)) = &config.bootstrap_admin {
        bootstrap_admin(&state, email, password).await?;
    }

    tokio::spawn(cleanup::run_cleanup_loop(state.clone(), SESSION_CLEANUP_INTERVAL_SECS));

    // Browser clients send the session cookie, so origins are mirrored with credentials
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true);

    let app = safecampus_api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!("SafeCampus server listening on {}", config.addr);
    if let Some(domain) = &config.email_domain {
        info!("Registration limited to @{}", domain);
    }

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Create the configured admin account unless the email is already taken.
async fn bootstrap_admin(state: &AppState, email: &str, password: &str) -> anyhow::Result<()> {
    let email = validate_email(email, None).map_err(|e| anyhow::anyhow!("SAFECAMPUS_ADMIN_EMAIL: {}", e))?;
    validate_password(password).map_err(|e| anyhow::anyhow!("SAFECAMPUS_ADMIN_PASSWORD: {}", e))?;

    let password = password.to_string();
    let created = state
        .run_db(move |db| {
            if db.get_user_by_email(&email)?.is_some() {
                return Ok(None);
            }
            let user = db.create_user(&NewUser {
                email,
                password_hash: hash_password(&password)?,
                full_name: "Administrator".into(),
                phone_number: None,
                role: Role::Admin,
                department: None,
            })?;
            Ok(Some(user))
        })
        .await
        .map_err(|e| anyhow::anyhow!("bootstrap admin: {}", e))?;

    match created {
        Some(user) => info!("Bootstrap admin {} created ({})", user.email, user.id),
        None => info!("Bootstrap admin already exists"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
