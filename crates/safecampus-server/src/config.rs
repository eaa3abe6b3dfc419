use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Secrets shipped in sample env files. Refused at startup.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "safecampus-secret-change-me-in-production",
];

const MIN_SECRET_LEN: usize = 32;

/// One year. Session expiry is computed as `now + ttl` on every login.
const MAX_SESSION_TTL_HOURS: i64 = 8760;

pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub session_secret: String,
    pub session_ttl_hours: i64,
    pub email_domain: Option<String>,
    pub secure_cookies: bool,
    pub bootstrap_admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let session_secret = var("SAFECAMPUS_SESSION_SECRET").unwrap_or_default();
        if session_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&session_secret.as_str()) {
            bail!("SAFECAMPUS_SESSION_SECRET is unset or still a placeholder");
        }
        if session_secret.len() < MIN_SECRET_LEN {
            bail!("SAFECAMPUS_SESSION_SECRET must be at least {} characters", MIN_SECRET_LEN);
        }

        let host = var("SAFECAMPUS_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("SAFECAMPUS_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("SAFECAMPUS_PORT is not a valid port")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let session_ttl_hours: i64 = match var("SAFECAMPUS_SESSION_TTL_HOURS") {
            Some(v) => v.parse().context("SAFECAMPUS_SESSION_TTL_HOURS is not a number")?,
            None => 168, // 7 days
        };
        if session_ttl_hours <= 0 || session_ttl_hours > MAX_SESSION_TTL_HOURS {
            bail!(
                "SAFECAMPUS_SESSION_TTL_HOURS must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            );
        }

        let secure_cookies = match var("SAFECAMPUS_SECURE_COOKIES").as_deref() {
            None | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => bail!("SAFECAMPUS_SECURE_COOKIES must be true or false, got {other:?}"),
        };

        let bootstrap_admin = match (var("SAFECAMPUS_ADMIN_EMAIL"), var("SAFECAMPUS_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some((email, password)),
            (None, None) => None,
            _ => bail!("SAFECAMPUS_ADMIN_EMAIL and SAFECAMPUS_ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            addr,
            db_path: var("SAFECAMPUS_DB_PATH").unwrap_or_else(|| "safecampus.db".into()).into(),
            session_secret,
            session_ttl_hours,
            email_domain: var("SAFECAMPUS_EMAIL_DOMAIN"),
            secure_cookies,
            bootstrap_admin,
        })
    }
}
