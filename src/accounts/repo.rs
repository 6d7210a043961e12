use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::model::{Account, AccountType, DirectoryFilter, LoginRefresh, NewAccount, ProfileUpdate};

/// Failure reported by the credential store, independent of the backing database.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store is not configured or unreachable")]
    Unavailable,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("record not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

// Postgres reports a duplicate key as 23505. Supabase triggers that guard the
// email column raise P0001 instead.
const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_RAISE_EXCEPTION: &str = "P0001";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable
            }
            sqlx::Error::Database(db) => {
                let duplicate = db.is_unique_violation()
                    || matches!(
                        db.code().as_deref(),
                        Some(PG_UNIQUE_VIOLATION) | Some(PG_RAISE_EXCEPTION)
                    );
                if duplicate {
                    StoreError::UniqueViolation(
                        db.constraint().unwrap_or("unique constraint").to_string(),
                    )
                } else {
                    StoreError::Database(sqlx::Error::Database(db))
                }
            }
            other => StoreError::Database(other),
        }
    }
}

/// Read/write contract of the `user_profiles` table.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Case-insensitive lookup on the unique email column.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when the email is taken.
    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn refresh_login(
        &self,
        user_id: Uuid,
        refresh: LoginRefresh,
    ) -> Result<Account, StoreError>;

    /// Applies the update and marks the profile completed.
    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Account, StoreError>;

    async fn list_by_type(
        &self,
        account_type: AccountType,
        filter: &DirectoryFilter,
    ) -> Result<Vec<Account>, StoreError>;
}

const ACCOUNT_COLUMNS: &str = "user_id, email, account_type, provider, full_name, avatar_url, \
     github_username, github_meta, bio, skills, hourly_rate, location, company_name, website, \
     profile_completed, created_at, updated_at";

/// [`AccountStore`] backed by the Postgres `user_profiles` table.
#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM user_profiles WHERE user_id = $1");
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM user_profiles WHERE lower(email) = lower($1) LIMIT 1"
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(account)
    }

    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO user_profiles
                (user_id, email, account_type, provider, full_name, avatar_url,
                 github_username, github_meta)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, Account>(&sql)
            .bind(account.user_id)
            .bind(&account.email)
            .bind(account.account_type.as_str())
            .bind(account.provider.as_str())
            .bind(&account.full_name)
            .bind(&account.avatar_url)
            .bind(&account.github_username)
            .bind(account.github_meta.map(Json))
            .fetch_one(&self.db)
            .await?;
        debug!(user_id = %row.user_id, "account row inserted");
        Ok(row)
    }

    async fn refresh_login(
        &self,
        user_id: Uuid,
        refresh: LoginRefresh,
    ) -> Result<Account, StoreError> {
        let sql = format!(
            r#"
            UPDATE user_profiles
               SET avatar_url      = COALESCE($2, avatar_url),
                   github_username = COALESCE($3, github_username),
                   github_meta     = COALESCE($4, github_meta),
                   updated_at      = now()
             WHERE user_id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(user_id)
            .bind(refresh.avatar_url)
            .bind(refresh.github_username)
            .bind(refresh.github_meta.map(Json))
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Account, StoreError> {
        let sql = format!(
            r#"
            UPDATE user_profiles
               SET full_name         = COALESCE($2, full_name),
                   bio               = COALESCE($3, bio),
                   skills            = COALESCE($4, skills),
                   hourly_rate       = COALESCE($5, hourly_rate),
                   location          = COALESCE($6, location),
                   company_name      = COALESCE($7, company_name),
                   website           = COALESCE($8, website),
                   avatar_url        = COALESCE($9, avatar_url),
                   profile_completed = TRUE,
                   updated_at        = now()
             WHERE user_id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Account>(&sql)
            .bind(user_id)
            .bind(update.full_name)
            .bind(update.bio)
            .bind(update.skills)
            .bind(update.hourly_rate)
            .bind(update.location)
            .bind(update.company_name)
            .bind(update.website)
            .bind(update.avatar_url)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn list_by_type(
        &self,
        account_type: AccountType,
        filter: &DirectoryFilter,
    ) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
              FROM user_profiles
             WHERE account_type = $1
               AND ($2::text IS NULL
                    OR full_name ILIKE '%' || $2 || '%'
                    OR bio ILIKE '%' || $2 || '%'
                    OR github_username ILIKE '%' || $2 || '%'
                    OR company_name ILIKE '%' || $2 || '%')
               AND ($3::text IS NULL OR $3 = ANY(skills))
             ORDER BY profile_completed DESC, created_at DESC
             LIMIT $4 OFFSET $5
            "#
        );
        let rows = sqlx::query_as::<_, Account>(&sql)
            .bind(account_type.as_str())
            .bind(&filter.search)
            .bind(&filter.skill)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.db)
            .await?;
        Ok(rows)
    }
}
