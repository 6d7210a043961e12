use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod repo;

pub use model::{Account, AccountType};
pub use repo::{AccountStore, PgAccountStore, StoreError};

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::profile_routes())
        .merge(handlers::directory_routes())
}
