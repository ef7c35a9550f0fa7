pub mod analytics;
pub mod auth;
pub mod backoffice;
pub mod permissions;
pub mod profile;
pub mod quiz;
pub mod regulations;
pub mod reports;
pub mod session;
pub mod shell;

use crate::state::SharedState;
use axum::{routing::get, Router};

async fn health() -> &'static str {
    "OK"
}

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::router(state.clone()))
        .nest("/shell", shell::router(state.clone()))
        .nest("/reports", reports::router(state.clone()))
        .nest("/quiz", quiz::router(state.clone()))
        .nest("/regulations", regulations::router(state.clone()))
        .nest("/profile", profile::router(state.clone()))
        .nest("/analytics", analytics::router(state.clone()))
        .nest("/backoffice", backoffice::router(state.clone()))
        .nest("/permissions", permissions::router(state))
}
