use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{validate_profile_update, DirectoryQuery, DirectoryResponse, ProfileResponse};
use super::model::{AccountType, DirectoryFilter, ProfileUpdate};
use super::repo::StoreError;
use crate::{
    auth::{cache::CachedIdentity, extractors::AuthUser},
    error::ApiError,
    state::AppState,
};

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/api/profile", get(get_profile).post(update_profile))
}

pub fn directory_routes() -> Router<AppState> {
    Router::new()
        .route("/api/freelancers", get(list_freelancers))
        .route("/api/clients", get(list_clients))
}

#[instrument(skip_all, fields(user_id = %identity.user_id))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    if let Some(profile) = identity.profile {
        return Ok(Json(ProfileResponse { profile }));
    }
    let profile = state
        .accounts()?
        .find_by_id(identity.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("profile not found".into()))?;
    Ok(Json(ProfileResponse { profile }))
}

#[instrument(skip_all, fields(user_id = %identity.user_id))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(payload): Json<ProfileUpdate>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let update = validate_profile_update(payload)?;
    let profile = match state
        .accounts()?
        .update_profile(identity.user_id, update)
        .await
    {
        Ok(profile) => profile,
        Err(StoreError::NotFound) => {
            state.identity_cache.invalidate(&identity.user_id);
            return Err(ApiError::NotFound("profile not found".into()));
        }
        Err(e) => return Err(e.into()),
    };

    state.identity_cache.put(CachedIdentity::from(&profile));
    info!("profile updated");
    Ok(Json(ProfileResponse { profile }))
}

async fn list_directory(
    state: &AppState,
    account_type: AccountType,
    query: DirectoryQuery,
) -> Result<Json<DirectoryResponse>, ApiError> {
    let filter = DirectoryFilter::from(query);
    let items = state.accounts()?.list_by_type(account_type, &filter).await?;
    Ok(Json(DirectoryResponse {
        items,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

#[instrument(skip(state))]
pub async fn list_freelancers(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<Json<DirectoryResponse>, ApiError> {
    list_directory(&state, AccountType::Freelancer, query).await
}

#[instrument(skip(state))]
pub async fn list_clients(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<Json<DirectoryResponse>, ApiError> {
    list_directory(&state, AccountType::Client, query).await
}
