use crate::state::AppState;
use axum::Router;

pub mod cache;
pub mod claims;
mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod oauth;
pub mod provider;
pub mod reconcile;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::oauth_routes())
        .merge(handlers::session_routes())
}
