//! Liveness check, also reporting which push transport is active.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = &state.config;
    let has_token = config.fcm_access_token.is_some() || config.fcm_access_token_file.is_some();
    let push = if config.fcm_project_id.is_some() && has_token {
        "fcm"
    } else {
        "log_only"
    };

    Json(json!({
        "status": "ok",
        "service": "courier-api",
        "push_transport": push,
        "version": env!("CARGO_PKG_VERSION")
    }))
}
