//! Business-event hook.
//!
//! The record-keeping side calls this after a delivery is written. The hook
//! answers as soon as the event is accepted; fan-out happens in the
//! background so the caller never waits on push delivery.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

use courier_common::error::AppError;
use courier_common::types::DeliveryCreated;
use courier_engine::trigger::SkipReason;

use crate::state::AppState;

const HOOK_SECRET_HEADER: &str = "x-hook-secret";

pub fn router() -> Router<AppState> {
    Router::new().route("/api/hooks/delivery-created", post(delivery_created))
}

/// Acknowledgement returned to the hook caller.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HookAck {
    /// Fan-out was handed to a background task.
    Queued,
    Skipped { reason: SkipReason },
}

/// POST /api/hooks/delivery-created — React to a newly created delivery.
async fn delivery_created(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(delivery): Json<DeliveryCreated>,
) -> Result<(StatusCode, Json<HookAck>), AppError> {
    if let Some(expected) = state.config.hook_secret.as_deref() {
        let provided = headers
            .get(HOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return Err(AppError::Auth("Invalid hook secret".to_string()));
        }
    }

    if state.trigger.build_event(&delivery).is_none() {
        tracing::info!(
            delivery_id = ?delivery.id,
            "Delivery hook without creator uid, nothing to notify"
        );
        return Ok((
            StatusCode::ACCEPTED,
            Json(HookAck::Skipped {
                reason: SkipReason::MissingCreator,
            }),
        ));
    }

    let trigger = state.trigger.clone();
    tokio::spawn(async move {
        let outcome = trigger.on_delivery_created(&delivery).await;
        tracing::debug!(?outcome, "Delivery hook processed");
    });

    Ok((StatusCode::ACCEPTED, Json(HookAck::Queued)))
}
