pub mod endpoints;
pub mod health;
pub mod hooks;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(endpoints::router())
        .merge(hooks::router())
        .with_state(state)
}
