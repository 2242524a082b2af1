// Chat server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own sizing variables in
// `db::pool`.

use std::{net::SocketAddr, time::Duration};

const DEV_JWT_SECRET: &str = "chitchat_local_development_jwt_secret_must_be_32_chars";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for access tokens.
    pub jwt_secret: String,
    /// Access token lifetime.
    pub token_ttl_minutes: i64,
    /// PostgreSQL connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `chitchat_server=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Upper bound for a single store call before the request fails.
    pub store_timeout: Duration,
    /// REST body limit; profile uploads are the largest bodies.
    pub max_body_bytes: usize,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CHITCHAT_HOST` | `0.0.0.0` |
    /// | `CHITCHAT_PORT` | `8000` |
    /// | `CHITCHAT_JWT_SECRET` | dev-only placeholder |
    /// | `CHITCHAT_TOKEN_TTL_MINUTES` | `60` |
    /// | `CHITCHAT_DATABASE_URL` | *(none: in-memory store)* |
    /// | `CHITCHAT_CORS_ORIGINS` | *(none: cors.rs uses dev defaults)* |
    /// | `CHITCHAT_LOG_FILTER` | `info` |
    /// | `CHITCHAT_LOG_FORMAT` | `text` |
    /// | `CHITCHAT_STORE_TIMEOUT_MS` | `5000` |
    /// | `CHITCHAT_MAX_BODY_BYTES` | `5242880` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub(crate) fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("CHITCHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("CHITCHAT_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("CHITCHAT_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let token_ttl_minutes = env("CHITCHAT_TOKEN_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|minutes: &i64| *minutes > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_MINUTES);

        let database_url = env("CHITCHAT_DATABASE_URL").ok().filter(|url| !url.trim().is_empty());
        let cors_origins = env("CHITCHAT_CORS_ORIGINS").ok();

        let log_filter = env("CHITCHAT_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("CHITCHAT_LOG_FORMAT").ok().as_deref() {
            Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let store_timeout_ms = env("CHITCHAT_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|ms: &u64| *ms > 0)
            .unwrap_or(DEFAULT_STORE_TIMEOUT_MS);
        let max_body_bytes = env("CHITCHAT_MAX_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Self {
            listen_addr,
            jwt_secret,
            token_ttl_minutes,
            database_url,
            cors_origins,
            log_filter,
            log_format,
            store_timeout: Duration::from_millis(store_timeout_ms),
            max_body_bytes,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}
