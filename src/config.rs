use std::time::Duration;

use serde::Deserialize;

/// Longest token or identity-cache lifetime accepted: one year.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Client credentials for one OAuth provider.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string of the credential store. `None` runs the
    /// service in degraded, token-only mode.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub jwt: JwtConfig,
    pub google: Option<OAuthClientConfig>,
    pub github: Option<OAuthClientConfig>,
    pub backend_url: String,
    pub frontend_url: String,
    pub identity_cache_ttl_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env_opt("DATABASE_URL").or_else(|| env_opt("SUPABASE_DB_URL"));
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET must be set"))?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "freelancehub".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "freelancehub-users".into()),
            ttl_minutes: env_minutes("JWT_TTL_MINUTES", 60 * 24 * 7)?,
        };

        Ok(Self {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10),
            run_migrations: std::env::var("RUN_MIGRATIONS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            jwt,
            google: oauth_client("GOOGLE"),
            github: oauth_client("GITHUB"),
            backend_url: trim_url(
                std::env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:8080".into()),
            ),
            frontend_url: trim_url(
                std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            ),
            identity_cache_ttl_minutes: env_minutes("IDENTITY_CACHE_TTL_MINUTES", 60)?,
        })
    }

    /// Redirect URI registered with the provider for `provider` (`google`, `github`).
    pub fn callback_url(&self, provider: &str) -> String {
        format!("{}/auth/{}/callback", self.backend_url, provider)
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

fn env_minutes(key: &str, default: i64) -> anyhow::Result<i64> {
    match env_parse::<i64>(key) {
        None => Ok(default),
        Some(v) if (0..=MAX_TTL_MINUTES).contains(&v) => Ok(v),
        Some(v) => anyhow::bail!("{key} must be between 0 and {MAX_TTL_MINUTES} minutes, got {v}"),
    }
}

/// Minute count as a [`Duration`], clamped to `0..=MAX_TTL_MINUTES`.
pub fn minutes(value: i64) -> Duration {
    Duration::from_secs(value.clamp(0, MAX_TTL_MINUTES).unsigned_abs() * 60)
}

// A provider is enabled only when both halves of its credentials are present.
fn oauth_client(prefix: &str) -> Option<OAuthClientConfig> {
    let client_id = env_opt(&format!("{prefix}_CLIENT_ID"))?;
    let client_secret = env_opt(&format!("{prefix}_CLIENT_SECRET"))?;
    Some(OAuthClientConfig {
        client_id,
        client_secret,
    })
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
