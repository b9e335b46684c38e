use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::PushError;

/// Title used for every "new delivery" notification.
pub const NEW_DELIVERY_TITLE: &str = "New Delivery Added";

/// A registered device/browser notification endpoint.
///
/// Keyed by `endpoint_token`: one record per token, any number per owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EndpointRecord {
    pub endpoint_token: String,
    pub owner_id: String,
    pub owner_email: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// An authenticated user as seen by the notification subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub uid: String,
    pub email: Option<String>,
}

/// Minimal projection of a newly created delivery record.
///
/// Mirrors the wire shape written by the record-keeping UI, hence camelCase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCreated {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    pub product_name: String,
    pub customer_name: String,
    #[serde(default)]
    pub created_by_uid: Option<String>,
}

impl DeliveryCreated {
    /// Short human-readable summary used as the notification body.
    pub fn summary(&self) -> String {
        match self.invoice_number.as_deref().map(str::trim) {
            Some(invoice) if !invoice.is_empty() => format!(
                "Invoice #{}: {} for {}.",
                invoice, self.product_name, self.customer_name
            ),
            _ => format!("{} for {}.", self.product_name, self.customer_name),
        }
    }
}

/// An event to broadcast. Built at trigger time, discarded after dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Business record that produced the event, when known.
    pub source_id: Option<String>,
    /// Actor whose action produced the event; never notified.
    pub source_owner_id: String,
    pub title: String,
    pub body: String,
    pub click_target: String,
}

/// Payload handed to the push transport for every target endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub click_target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl PushPayload {
    pub fn from_event(event: &NotificationEvent, icon: Option<&str>) -> Self {
        Self {
            title: event.title.clone(),
            body: event.body.clone(),
            click_target: event.click_target.clone(),
            icon: icon.map(str::to_string),
        }
    }
}

/// Why a send to one endpoint did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The provider reports the endpoint as permanently gone.
    InvalidEndpoint,
    /// Anything that might succeed on a later event.
    Transient,
    /// The send never reported back (e.g. the task panicked).
    Unknown,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::InvalidEndpoint => write!(f, "invalid-endpoint"),
            FailureReason::Transient => write!(f, "transient"),
            FailureReason::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&PushError> for FailureReason {
    fn from(err: &PushError) -> Self {
        if err.is_permanent() {
            FailureReason::InvalidEndpoint
        } else {
            FailureReason::Transient
        }
    }
}

/// Result of sending one event to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub endpoint_token: String,
    pub success: bool,
    pub failure_reason: Option<FailureReason>,
}

impl DispatchOutcome {
    pub fn delivered(endpoint_token: impl Into<String>) -> Self {
        Self {
            endpoint_token: endpoint_token.into(),
            success: true,
            failure_reason: None,
        }
    }

    pub fn failed(endpoint_token: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            endpoint_token: endpoint_token.into(),
            success: false,
            failure_reason: Some(reason),
        }
    }

    /// Classify a transport result for one endpoint.
    pub fn from_result(endpoint_token: impl Into<String>, result: &Result<(), PushError>) -> Self {
        match result {
            Ok(()) => Self::delivered(endpoint_token),
            Err(e) => Self::failed(endpoint_token, FailureReason::from(e)),
        }
    }

    pub fn is_invalid_endpoint(&self) -> bool {
        self.failure_reason == Some(FailureReason::InvalidEndpoint)
    }
}
