mod accounts;
mod app;
mod auth;
mod config;
mod error;
mod marketplace;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "freelancehub=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = AppState::init().await?;

    match (&app_state.db, app_state.config.run_migrations) {
        (Some(db), true) => {
            sqlx::migrate!("./migrations").run(db).await?;
            tracing::info!("migrations applied");
        }
        (None, true) => tracing::warn!("RUN_MIGRATIONS set without a database; skipping"),
        _ => {}
    }

    app::serve(app::build_app(app_state)).await
}
