//! Authorization-code flow against Google and GitHub.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::provider::{GitHubProfile, GoogleProfile, Provider, ProviderProfile};
use crate::config::{AppConfig, OAuthClientConfig};

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("invalid provider url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("profile request failed: {0}")]
    Profile(String),
}

/// One OAuth provider: where to send the browser and how to turn a code into a profile.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn authorize_url(&self, state: &str) -> Result<String, OAuthError>;

    async fn fetch_profile(&self, code: &str) -> Result<ProviderProfile, OAuthError>;
}

struct Endpoints {
    auth_url: &'static str,
    token_url: &'static str,
    scopes: &'static [&'static str],
}

const GOOGLE: Endpoints = Endpoints {
    auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    scopes: &["profile", "email"],
};
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

const GITHUB: Endpoints = Endpoints {
    auth_url: "https://github.com/login/oauth/authorize",
    token_url: "https://github.com/login/oauth/access_token",
    scopes: &["user:email"],
};
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Client id, secret and callback shared by both provider implementations.
struct OAuthApp {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl OAuthApp {
    fn authorize_url(&self, endpoints: &Endpoints, state: &str) -> Result<String, OAuthError> {
        let mut url = Url::parse(endpoints.auth_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &endpoints.scopes.join(" "))
            .append_pair("state", state);
        Ok(url.to_string())
    }

    async fn exchange_code(&self, endpoints: &Endpoints, code: &str) -> Result<String, OAuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(endpoints.token_url)
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::TokenExchange(format!("status {status}: {body}")));
        }

        let token: TokenResponse = response.json().await?;
        match token {
            TokenResponse {
                access_token: Some(t),
                ..
            } => Ok(t),
            TokenResponse {
                error,
                error_description,
                ..
            } => Err(OAuthError::TokenExchange(
                error_description
                    .or(error)
                    .unwrap_or_else(|| "no access_token in response".into()),
            )),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, OAuthError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Profile(format!("{url} returned {status}: {body}")));
        }
        Ok(response.json().await?)
    }
}

pub struct GoogleOAuth(OAuthApp);

#[async_trait]
impl IdentityProvider for GoogleOAuth {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        self.0.authorize_url(&GOOGLE, state)
    }

    async fn fetch_profile(&self, code: &str) -> Result<ProviderProfile, OAuthError> {
        let token = self.0.exchange_code(&GOOGLE, code).await?;
        let profile: GoogleProfile = self.0.get_json(GOOGLE_USERINFO_URL, &token).await?;
        debug!(provider_id = %profile.id, "google profile fetched");
        Ok(ProviderProfile::Google(profile))
    }
}

pub struct GitHubOAuth(OAuthApp);

#[async_trait]
impl IdentityProvider for GitHubOAuth {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn authorize_url(&self, state: &str) -> Result<String, OAuthError> {
        self.0.authorize_url(&GITHUB, state)
    }

    async fn fetch_profile(&self, code: &str) -> Result<ProviderProfile, OAuthError> {
        let token = self.0.exchange_code(&GITHUB, code).await?;
        let mut profile: GitHubProfile = self.0.get_json(GITHUB_USER_URL, &token).await?;

        // A private email is only reachable through /user/emails.
        if profile.email.is_none() {
            match self.0.get_json::<Vec<GitHubEmail>>(GITHUB_EMAILS_URL, &token).await {
                Ok(emails) => profile.email = primary_verified_email(emails),
                Err(e) => debug!(error = %e, "github email list unavailable"),
            }
        }
        debug!(provider_id = profile.id, login = %profile.login, "github profile fetched");
        Ok(ProviderProfile::GitHub(profile))
    }
}

fn primary_verified_email(emails: Vec<GitHubEmail>) -> Option<String> {
    emails
        .into_iter()
        .find(|e| e.primary && e.verified)
        .map(|e| e.email)
}

/// Providers enabled by configuration.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    google: Option<Arc<dyn IdentityProvider>>,
    github: Option<Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("freelancehub/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let app = |c: &OAuthClientConfig, provider: Provider| OAuthApp {
            http: http.clone(),
            client_id: c.client_id.clone(),
            client_secret: c.client_secret.clone(),
            redirect_uri: cfg.callback_url(provider.as_str()),
        };

        Ok(Self {
            google: cfg.google.as_ref().map(|c| {
                Arc::new(GoogleOAuth(app(c, Provider::Google))) as Arc<dyn IdentityProvider>
            }),
            github: cfg.github.as_ref().map(|c| {
                Arc::new(GitHubOAuth(app(c, Provider::GitHub))) as Arc<dyn IdentityProvider>
            }),
        })
    }

    #[cfg(test)]
    pub fn with(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        match provider.provider() {
            Provider::Google => self.google = Some(provider),
            Provider::GitHub => self.github = Some(provider),
        }
        self
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn IdentityProvider>> {
        match provider {
            Provider::Google => self.google.clone(),
            Provider::GitHub => self.github.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> OAuthApp {
        OAuthApp {
            http: Client::new(),
            client_id: "test_client".into(),
            client_secret: "test_secret".into(),
            redirect_uri: "http://localhost:8080/auth/github/callback".into(),
        }
    }

    #[test]
    fn authorize_url_carries_client_state_and_scope() {
        let url = GitHubOAuth(app()).authorize_url("abc123").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert_eq!(pairs["client_id"], "test_client");
        assert_eq!(pairs["state"], "abc123");
        assert_eq!(pairs["scope"], "user:email");
        assert_eq!(pairs["redirect_uri"], "http://localhost:8080/auth/github/callback");
        assert!(!url.contains("test_secret"));
    }

    #[test]
    fn google_asks_for_profile_and_email() {
        let url = GoogleOAuth(app()).authorize_url("s").unwrap();
        assert!(url.contains("scope=profile+email"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn picks_primary_verified_github_email() {
        let emails = vec![
            GitHubEmail {
                email: "old@x.com".into(),
                primary: false,
                verified: true,
            },
            GitHubEmail {
                email: "main@x.com".into(),
                primary: true,
                verified: true,
            },
        ];
        assert_eq!(primary_verified_email(emails), Some("main@x.com".into()));

        let unverified = vec![GitHubEmail {
            email: "main@x.com".into(),
            primary: true,
            verified: false,
        }];
        assert_eq!(primary_verified_email(unverified), None);
    }

    #[test]
    fn registry_only_enables_configured_providers() {
        let registry = ProviderRegistry::default().with(Arc::new(GitHubOAuth(app())));
        assert!(registry.get(Provider::GitHub).is_some());
        assert!(registry.get(Provider::Google).is_none());
    }
}
