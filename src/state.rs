use crate::accounts::{AccountStore, PgAccountStore};
use crate::auth::{cache::IdentityCache, jwt::JwtKeys, oauth::ProviderRegistry};
use crate::config::{minutes, AppConfig};
use crate::error::ApiError;
use anyhow::Context;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// `None` when no database is configured; handlers answer 503.
    pub db: Option<PgPool>,
    pub accounts: Option<Arc<dyn AccountStore>>,
    pub jwt: JwtKeys,
    pub providers: ProviderRegistry,
    pub identity_cache: Arc<IdentityCache>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = match &config.database_url {
            Some(url) => Some(
                sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.db_max_connections)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect_lazy(url)
                    .context("parse database url")?,
            ),
            None => {
                tracing::warn!("no DATABASE_URL configured; running with token-only identities");
                None
            }
        };

        let providers =
            ProviderRegistry::from_config(&config).context("build oauth http client")?;

        Ok(Self::from_parts(config, db, providers))
    }

    pub fn from_parts(config: Arc<AppConfig>, db: Option<PgPool>, providers: ProviderRegistry) -> Self {
        let accounts = db
            .clone()
            .map(|pool| Arc::new(PgAccountStore::new(pool)) as Arc<dyn AccountStore>);
        let jwt = JwtKeys::new(&config.jwt);
        let identity_cache = Arc::new(IdentityCache::new(minutes(config.identity_cache_ttl_minutes)));
        Self {
            config,
            db,
            accounts,
            jwt,
            providers,
            identity_cache,
        }
    }

    pub fn accounts(&self) -> Result<&dyn AccountStore, ApiError> {
        self.accounts.as_deref().ok_or(ApiError::StoreUnavailable)
    }

    pub fn db(&self) -> Result<&PgPool, ApiError> {
        self.db.as_ref().ok_or(ApiError::StoreUnavailable)
    }
}

#[cfg(test)]
impl AppState {
    pub fn test_config() -> AppConfig {
        AppConfig {
            database_url: None,
            db_max_connections: 1,
            run_migrations: false,
            jwt: crate::config::JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 60 * 24 * 7,
            },
            google: None,
            github: None,
            backend_url: "http://api.test".into(),
            frontend_url: "http://app.test".into(),
            identity_cache_ttl_minutes: 60,
        }
    }

    /// State backed by an in-memory account store and no database or providers.
    pub fn fake() -> Self {
        let mut state = Self::from_parts(
            Arc::new(Self::test_config()),
            None,
            ProviderRegistry::default(),
        );
        state.accounts = Some(Arc::new(crate::accounts::memory::MemoryAccountStore::new()));
        state
    }

    pub fn without_store(mut self) -> Self {
        self.accounts = None;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn crate::auth::oauth::IdentityProvider>) -> Self {
        self.providers = self.providers.with(provider);
        self
    }
}
