//! Normalization of provider-specific OAuth profiles into one identity shape.

use std::{fmt, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::accounts::AccountType;

/// External OAuth provider an identity came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Provider {
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "github")]
    GitHub,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::GitHub => "github",
        }
    }

    /// Account type assigned when this provider creates an account.
    pub fn account_type(&self) -> AccountType {
        match self {
            Provider::Google => AccountType::Client,
            Provider::GitHub => AccountType::Freelancer,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "github" => Ok(Provider::GitHub),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

impl TryFrom<String> for Provider {
    type Error = UnknownProvider;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Google `userinfo` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// GitHub `/user` payload; `email` is only set when the user made it public.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubProfile {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub blog: Option<String>,
    #[serde(default)]
    pub public_repos: u32,
    #[serde(default)]
    pub followers: u32,
    #[serde(default)]
    pub following: u32,
}

/// GitHub details kept on the account for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitHubMeta {
    pub public_repos: u32,
    pub followers: u32,
    pub following: u32,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub blog: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProviderProfile {
    Google(GoogleProfile),
    GitHub(GitHubProfile),
}

/// Provider-neutral identity handed to the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalIdentity {
    pub provider: Provider,
    pub provider_id: String,
    /// Normalized (trimmed, lowercased) email, if the provider supplied a valid one.
    pub email: Option<String>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub username: Option<String>,
    pub provider_meta: Option<GitHubMeta>,
}

impl ExternalIdentity {
    pub fn account_type(&self) -> AccountType {
        self.provider.account_type()
    }

    /// Email used as the de-duplication key: the real one, or a deterministic placeholder.
    pub fn effective_email(&self) -> String {
        self.email
            .clone()
            .unwrap_or_else(|| placeholder_email(self.provider, &self.provider_id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{0} profile did not include a usable email")]
    MissingEmail(Provider),

    #[error("{0} profile did not include an id")]
    MissingId(Provider),
}

pub fn placeholder_email(provider: Provider, provider_id: &str) -> String {
    format!("{}_{}@noemail.local", provider.as_str(), provider_id)
}

/// Trim and lowercase `raw`; `None` when it does not look like an address.
pub fn normalize_email(raw: &str) -> Option<String> {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    let email = raw.trim().to_lowercase();
    EMAIL_RE.is_match(&email).then_some(email)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn normalize(profile: ProviderProfile) -> Result<ExternalIdentity, AdapterError> {
    match profile {
        ProviderProfile::Google(p) => {
            if p.id.trim().is_empty() {
                return Err(AdapterError::MissingId(Provider::Google));
            }
            let email = p
                .email
                .as_deref()
                .and_then(normalize_email)
                .ok_or(AdapterError::MissingEmail(Provider::Google))?;
            let display_name = non_empty(p.name).unwrap_or_else(|| {
                email.split('@').next().unwrap_or("Google user").to_string()
            });
            Ok(ExternalIdentity {
                provider: Provider::Google,
                provider_id: p.id,
                email: Some(email),
                display_name,
                avatar_url: non_empty(p.picture),
                username: None,
                provider_meta: None,
            })
        }
        ProviderProfile::GitHub(p) => {
            let email = p.email.as_deref().and_then(normalize_email);
            let display_name = non_empty(p.name).unwrap_or_else(|| p.login.clone());
            Ok(ExternalIdentity {
                provider: Provider::GitHub,
                provider_id: p.id.to_string(),
                email,
                display_name,
                avatar_url: non_empty(p.avatar_url),
                username: Some(p.login),
                provider_meta: Some(GitHubMeta {
                    public_repos: p.public_repos,
                    followers: p.followers,
                    following: p.following,
                    bio: non_empty(p.bio),
                    location: non_empty(p.location),
                    blog: non_empty(p.blog),
                }),
            })
        }
    }
}
