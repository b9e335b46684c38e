//! Endpoint registration routes for signed-in users.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use courier_common::error::AppError;
use courier_common::types::EndpointRecord;

use crate::middleware::auth::AuthUser;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/endpoints", post(register_endpoint))
        .route("/api/endpoints", get(list_endpoints))
}

#[derive(Debug, Deserialize)]
pub struct RegisterEndpointRequest {
    pub endpoint_token: String,
}

/// POST /api/endpoints — Register (or re-register) this device's endpoint.
async fn register_endpoint(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<RegisterEndpointRequest>,
) -> Result<Json<EndpointRecord>, AppError> {
    let token = req.endpoint_token.trim();
    if token.is_empty() {
        return Err(AppError::Validation(
            "endpoint_token must not be empty".to_string(),
        ));
    }

    let record = state
        .registry
        .upsert(token, &auth.identity.uid, auth.identity.email.as_deref())
        .await?;
    Ok(Json(record))
}

/// GET /api/endpoints — Endpoints registered by the authenticated user.
async fn list_endpoints(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<EndpointRecord>>, AppError> {
    let records = state.registry.list_by_owner(&auth.identity.uid).await?;
    Ok(Json(records))
}
