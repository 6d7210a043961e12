mod dto;
pub mod handlers;
pub mod model;
pub mod repo;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::project_routes())
        .merge(handlers::application_routes())
        .merge(handlers::message_routes())
        .merge(handlers::stats_routes())
}
