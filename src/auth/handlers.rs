use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use rand::{distributions::Alphanumeric, Rng};
use tower_cookies::{
    cookie::{time::Duration as CookieDuration, SameSite},
    Cookie, Cookies,
};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{
        cache::CachedIdentity,
        claims::SessionSubject,
        dto::{CallbackQuery, LogoutResponse, MeResponse, VerifyResponse, VerifyTokenRequest},
        extractors::{authenticate, bearer_token, AuthUser},
        provider::{normalize, Provider},
        reconcile::{reconcile, ReconcileError},
    },
    config::AppConfig,
    state::AppState,
};

const STATE_COOKIE: &str = "oauth_state";
const STATE_COOKIE_PATH: &str = "/auth";
const STATE_COOKIE_TTL_MINUTES: i64 = 10;

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/google", get(google_login))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/github", get(github_login))
        .route("/auth/github/callback", get(github_callback))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/verify-token", post(verify_token))
        .route("/auth/verify", get(verify_bearer))
        .route("/api/verify", get(verify_bearer))
        .route("/auth/me", get(get_me))
        .route("/auth/logout", get(logout).post(logout))
}

async fn google_login(State(state): State<AppState>, cookies: Cookies) -> Response {
    begin_login(&state, &cookies, Provider::Google)
}

async fn github_login(State(state): State<AppState>, cookies: Cookies) -> Response {
    begin_login(&state, &cookies, Provider::GitHub)
}

async fn google_callback(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<CallbackQuery>,
) -> Response {
    complete_login(&state, &cookies, Provider::Google, query).await
}

async fn github_callback(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<CallbackQuery>,
) -> Response {
    complete_login(&state, &cookies, Provider::GitHub, query).await
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

fn state_cookie(cfg: &AppConfig, value: String) -> Cookie<'static> {
    Cookie::build((STATE_COOKIE, value))
        .http_only(true)
        .secure(cfg.backend_url.starts_with("https://"))
        .same_site(SameSite::Lax)
        .path(STATE_COOKIE_PATH)
        .max_age(CookieDuration::minutes(STATE_COOKIE_TTL_MINUTES))
        .build()
}

fn clear_state_cookie(cookies: &Cookies) {
    cookies.remove(Cookie::build((STATE_COOKIE, "")).path(STATE_COOKIE_PATH).build());
}

fn frontend_url(cfg: &AppConfig, path: &str, params: &[(&str, &str)]) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{}{}?{}", cfg.frontend_url, path, query)
}

fn login_failure(cfg: &AppConfig, params: &[(&str, &str)]) -> Response {
    Redirect::to(&frontend_url(cfg, "/login", params)).into_response()
}

fn auth_failed(cfg: &AppConfig, provider: Provider) -> Response {
    login_failure(cfg, &[("error", &format!("{provider}_auth_failed"))])
}

/// Redirect target for a reconciliation failure.
fn reconcile_failure(cfg: &AppConfig, provider: Provider, err: &ReconcileError) -> Response {
    match err {
        ReconcileError::ConcurrentConflict { .. } => login_failure(
            cfg,
            &[("error", "concurrent_access"), ("provider", provider.as_str())],
        ),
        ReconcileError::StoreUnavailable => login_failure(cfg, &[("error", "service_unavailable")]),
        ReconcileError::Store(_) => auth_failed(cfg, provider),
    }
}

#[instrument(skip(state, cookies))]
fn begin_login(state: &AppState, cookies: &Cookies, provider: Provider) -> Response {
    let cfg = &state.config;
    let Some(client) = state.providers.get(provider) else {
        warn!("oauth provider not configured");
        return login_failure(cfg, &[("error", &format!("{provider}_not_configured"))]);
    };

    let nonce = random_state();
    let url = match client.authorize_url(&nonce) {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, "building authorization url failed");
            return auth_failed(cfg, provider);
        }
    };

    cookies.add(state_cookie(cfg, format!("{provider}.{nonce}")));
    Redirect::to(&url).into_response()
}

#[instrument(skip_all, fields(%provider))]
async fn complete_login(
    state: &AppState,
    cookies: &Cookies,
    provider: Provider,
    query: CallbackQuery,
) -> Response {
    let cfg = &state.config;

    // The state value is single use whatever the outcome.
    let stored = cookies.get(STATE_COOKIE).map(|c| c.value().to_string());
    clear_state_cookie(cookies);

    if let Some(reason) = query.error {
        warn!(%reason, "provider returned an error");
        return auth_failed(cfg, provider);
    }

    let expected = query.state.map(|s| format!("{provider}.{s}"));
    if expected.is_none() || stored != expected {
        warn!("oauth state missing or mismatched");
        return auth_failed(cfg, provider);
    }

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        warn!("callback without authorization code");
        return auth_failed(cfg, provider);
    };

    let Some(client) = state.providers.get(provider) else {
        return login_failure(cfg, &[("error", &format!("{provider}_not_configured"))]);
    };

    let identity = match client.fetch_profile(&code).await.map(normalize) {
        Ok(Ok(identity)) => identity,
        Ok(Err(e)) => {
            warn!(error = %e, "provider profile rejected");
            return auth_failed(cfg, provider);
        }
        Err(e) => {
            warn!(error = %e, "provider authentication failed");
            return auth_failed(cfg, provider);
        }
    };

    let store = match state.accounts() {
        Ok(store) => store,
        Err(_) => {
            error!("login attempted without a credential store");
            return login_failure(cfg, &[("error", "service_unavailable")]);
        }
    };

    let reconciled = match reconcile(store, &identity).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "account reconciliation failed");
            return reconcile_failure(cfg, provider, &e);
        }
    };

    let account = &reconciled.account;
    let purged = state.identity_cache.purge_expired();
    if purged > 0 {
        debug!(purged, remaining = state.identity_cache.len(), "expired identity cache entries dropped");
    }
    state.identity_cache.put(CachedIdentity::from(account));

    let subject = SessionSubject::for_account(account, provider, &reconciled.effective_email);
    let token = match state.jwt.issue(&subject) {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "session token signing failed");
            return auth_failed(cfg, provider);
        }
    };

    info!(
        user_id = %account.user_id,
        account_type = %account.account_type,
        action = reconciled.action.as_str(),
        "oauth login completed"
    );

    let target = frontend_url(
        cfg,
        "/auth/success",
        &[("token", &token), ("userType", account.account_type.as_str())],
    );
    Redirect::to(&target).into_response()
}

#[instrument(skip(state, payload))]
pub async fn verify_token(
    State(state): State<AppState>,
    payload: Result<Json<VerifyTokenRequest>, JsonRejection>,
) -> (StatusCode, Json<VerifyResponse>) {
    let payload = match payload {
        Ok(Json(p)) => p,
        Err(rejection) => {
            debug!(error = %rejection, "verify-token body rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(VerifyResponse::invalid(rejection.body_text())),
            );
        }
    };
    let Some(token) = payload.token.filter(|t| !t.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(VerifyResponse::invalid("token is required")),
        );
    };
    check_token(&state, token.trim()).await
}

#[instrument(skip(state, headers))]
pub async fn verify_bearer(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> (StatusCode, Json<VerifyResponse>) {
    let Some(token) = bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(VerifyResponse::invalid("access token required")),
        );
    };
    check_token(&state, token).await
}

async fn check_token(state: &AppState, token: &str) -> (StatusCode, Json<VerifyResponse>) {
    match authenticate(state, token).await {
        Ok(identity) => (StatusCode::OK, Json(VerifyResponse::valid(identity))),
        Err(e) => {
            debug!(error = %e, "token check failed");
            (
                StatusCode::UNAUTHORIZED,
                Json(VerifyResponse::invalid(e.to_string())),
            )
        }
    }
}

#[instrument(skip_all, fields(user_id = %identity.user_id))]
pub async fn get_me(AuthUser(identity): AuthUser) -> Json<MeResponse> {
    Json(MeResponse { user: identity })
}

// Tokens are stateless; the client has to drop its copy.
#[instrument(skip(cookies))]
pub async fn logout(cookies: Cookies) -> Json<LogoutResponse> {
    clear_state_cookie(&cookies);
    Json(LogoutResponse {
        success: true,
        message: "Logged out. Discard the stored access token.",
    })
}
