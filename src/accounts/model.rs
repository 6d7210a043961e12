use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::provider::{GitHubMeta, Provider};

/// Role an account plays in the marketplace. Fixed when the account is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Client,
    Freelancer,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Client => "client",
            AccountType::Freelancer => "freelancer",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown account type: {0}")]
pub struct UnknownAccountType(pub String);

impl FromStr for AccountType {
    type Err = UnknownAccountType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(AccountType::Client),
            "freelancer" => Ok(AccountType::Freelancer),
            other => Err(UnknownAccountType(other.to_string())),
        }
    }
}

impl TryFrom<String> for AccountType {
    type Error = UnknownAccountType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Row of `user_profiles`.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Account {
    pub user_id: Uuid,
    pub email: Option<String>,
    #[sqlx(try_from = "String")]
    pub account_type: AccountType,
    #[sqlx(try_from = "String")]
    pub provider: Provider,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub github_username: Option<String>,
    pub github_meta: Option<Json<GitHubMeta>>,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub hourly_rate: Option<f64>,
    pub location: Option<String>,
    pub company_name: Option<String>,
    pub website: Option<String>,
    pub profile_completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Values for a first-time insert, produced by the reconciler.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_id: Uuid,
    pub email: String,
    pub account_type: AccountType,
    pub provider: Provider,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub github_username: Option<String>,
    pub github_meta: Option<GitHubMeta>,
}

impl NewAccount {
    /// Materialize the row the store would return, used by stores that build rows in memory.
    pub fn into_account(self, now: OffsetDateTime) -> Account {
        Account {
            user_id: self.user_id,
            email: Some(self.email),
            account_type: self.account_type,
            provider: self.provider,
            full_name: self.full_name,
            avatar_url: self.avatar_url,
            github_username: self.github_username,
            github_meta: self.github_meta.map(Json),
            bio: None,
            skills: Vec::new(),
            hourly_rate: None,
            location: None,
            company_name: None,
            website: None,
            profile_completed: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Display fields refreshed on a repeat login. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct LoginRefresh {
    pub avatar_url: Option<String>,
    pub github_username: Option<String>,
    pub github_meta: Option<GitHubMeta>,
}

/// Editable profile fields. `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub skills: Option<Vec<String>>,
    pub hourly_rate: Option<f64>,
    pub location: Option<String>,
    pub company_name: Option<String>,
    pub website: Option<String>,
    pub avatar_url: Option<String>,
}

/// Paging and search for the public directories.
#[derive(Debug, Clone)]
pub struct DirectoryFilter {
    pub search: Option<String>,
    pub skill: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for DirectoryFilter {
    fn default() -> Self {
        Self {
            search: None,
            skill: None,
            limit: 20,
            offset: 0,
        }
    }
}
