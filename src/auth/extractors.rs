use std::convert::Infallible;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{cache::CachedIdentity, claims::Claims, jwt::TokenError, provider::Provider};
use crate::{
    accounts::{Account, AccountType},
    error::ApiError,
    state::AppState,
};

/// Where the identity attached to a request was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    Store,
    Cache,
    Token,
}

/// Authenticated principal of a request.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub account_type: AccountType,
    pub provider: Provider,
    pub source: IdentitySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Account>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<CachedIdentity>,
}

impl Identity {
    fn bare(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email.clone(),
            account_type: claims.account_type,
            provider: claims.provider,
            source: IdentitySource::Token,
            profile: None,
            cached: None,
        }
    }

    fn from_store(claims: &Claims, account: Account) -> Self {
        Self {
            user_id: account.user_id,
            email: account.email.clone().unwrap_or_else(|| claims.email.clone()),
            account_type: account.account_type,
            provider: claims.provider,
            source: IdentitySource::Store,
            profile: Some(account),
            cached: None,
        }
    }

    fn from_cache(claims: &Claims, cached: CachedIdentity) -> Self {
        Self {
            account_type: cached.account_type,
            source: IdentitySource::Cache,
            cached: Some(cached),
            ..Self::bare(claims)
        }
    }
}

/// Bearer token of the request, if the Authorization header carries one.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Verify `token` and enrich the identity. Only verification can fail.
pub async fn authenticate(state: &AppState, token: &str) -> Result<Identity, TokenError> {
    let claims = state.jwt.verify(token)?;
    Ok(enrich(state, &claims).await)
}

// user_id is the canonical key; email covers rows created before ids were stable.
async fn enrich(state: &AppState, claims: &Claims) -> Identity {
    if let Some(store) = state.accounts.as_deref() {
        match store.find_by_id(claims.sub).await {
            Ok(Some(account)) => return Identity::from_store(claims, account),
            Ok(None) => match store.find_by_email(&claims.email).await {
                Ok(Some(account)) => {
                    debug!(user_id = %claims.sub, found = %account.user_id, "profile matched by email");
                    return Identity::from_store(claims, account);
                }
                Ok(None) => debug!(user_id = %claims.sub, "no stored profile for token"),
                Err(e) => warn!(error = %e, "profile lookup by email failed"),
            },
            Err(e) => warn!(error = %e, "profile lookup failed"),
        }
    }

    match state.identity_cache.get(&claims.sub) {
        Some(cached) => Identity::from_cache(claims, cached),
        None => Identity::bare(claims),
    }
}

/// Requires a valid session token: 401 without one, 403 when it does not verify.
pub struct AuthUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("access token required".into()))?;

        match authenticate(state, token).await {
            Ok(identity) => Ok(AuthUser(identity)),
            Err(e) => {
                warn!(error = %e, "rejected session token");
                Err(ApiError::Forbidden(format!("invalid or expired token: {e}")))
            }
        }
    }
}

/// Identity when a valid token is present, `None` otherwise. Never rejects.
pub struct MaybeAuthUser(pub Option<Identity>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Ok(MaybeAuthUser(None));
        };
        match authenticate(state, token).await {
            Ok(identity) => Ok(MaybeAuthUser(Some(identity))),
            Err(e) => {
                debug!(error = %e, "ignoring invalid token on optional route");
                Ok(MaybeAuthUser(None))
            }
        }
    }
}

fn require_type(identity: Identity, required: AccountType) -> Result<Identity, ApiError> {
    if identity.account_type == required {
        Ok(identity)
    } else {
        Err(ApiError::Forbidden(format!("{required} account required")))
    }
}

/// Authenticated identity of a client account.
pub struct ClientUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for ClientUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        require_type(identity, AccountType::Client).map(ClientUser)
    }
}

/// Authenticated identity of a freelancer account.
pub struct FreelancerUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for FreelancerUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;
        require_type(identity, AccountType::Freelancer).map(FreelancerUser)
    }
}
