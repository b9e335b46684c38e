//! Endpoint registry seam.
//!
//! Server code talks to Postgres (`courier-engine`), clients talk to the API
//! (`courier-agent`); both sides share this contract.

use async_trait::async_trait;

use crate::error::AppError;
use crate::types::EndpointRecord;

/// Durable mapping from a notification endpoint token to the user that owns it.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Insert or overwrite the record for `endpoint_token`.
    ///
    /// Repeating the call with the same token and owner leaves exactly one
    /// record and keeps its original `registered_at`.
    async fn upsert(
        &self,
        endpoint_token: &str,
        owner_id: &str,
        owner_email: Option<&str>,
    ) -> Result<EndpointRecord, AppError>;

    /// Delete the record for `endpoint_token`. Missing tokens are not an error.
    async fn remove(&self, endpoint_token: &str) -> Result<(), AppError>;

    /// Every registered endpoint, in no particular order.
    async fn list_all(&self) -> Result<Vec<EndpointRecord>, AppError>;

    /// Endpoints owned by one user.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<EndpointRecord>, AppError>;
}
