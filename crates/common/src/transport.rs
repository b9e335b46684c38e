//! Server-side push transport seam.
//!
//! The dispatcher only knows this trait; the FCM implementation lives in
//! `courier-notifier` and tests substitute scripted fakes.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PushPayload;

/// Failure reported by a push transport for a single endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// The provider no longer knows this endpoint (uninstalled, revoked, expired).
    #[error("endpoint is no longer registered with the push provider")]
    Unregistered,

    /// The provider answered but refused the message.
    #[error("push provider rejected the message ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// The request never got a usable answer.
    #[error("push transport error: {0}")]
    Transport(String),
}

impl PushError {
    /// Whether retrying this endpoint can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, PushError::Unregistered)
    }
}

/// A push provider capable of delivering a payload to endpoint tokens.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Human-readable name for logs (e.g., "fcm").
    fn name(&self) -> &'static str;

    /// Largest number of tokens one `send_batch` call accepts.
    ///
    /// `1` means the provider has no batch API and every endpoint is sent
    /// independently.
    fn max_batch_size(&self) -> usize {
        1
    }

    /// Deliver `payload` to a single endpoint.
    async fn send(&self, endpoint_token: &str, payload: &PushPayload) -> Result<(), PushError>;

    /// Deliver `payload` to every token, returning one result per token in
    /// the same order.
    async fn send_batch(
        &self,
        endpoint_tokens: &[String],
        payload: &PushPayload,
    ) -> Vec<Result<(), PushError>> {
        futures::future::join_all(
            endpoint_tokens
                .iter()
                .map(|token| self.send(token, payload)),
        )
        .await
    }
}
