//! Endpoint registry backed by the courier API.
//!
//! Clients may only register their own endpoints and read them back; the
//! API derives the owner from the bearer token, so removal and global
//! listing are refused locally.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use courier_common::error::AppError;
use courier_common::registry::EndpointRegistry;
use courier_common::types::EndpointRecord;

use crate::config::AgentConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Supplies the identity provider's bearer token for API calls.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, AppError>;
}

/// A fixed token, e.g. one handed over by the host after sign-in.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, AppError> {
        Ok(self.0.clone())
    }
}

#[derive(Serialize)]
struct RegisterEndpointBody<'a> {
    endpoint_token: &'a str,
}

pub struct HttpEndpointRegistry {
    client: Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl HttpEndpointRegistry {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn AccessTokenSource>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build reqwest client: {}", e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn from_config(
        config: &AgentConfig,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> anyhow::Result<Self> {
        Self::new(config.api_url.clone(), tokens)
    }

    fn endpoints_url(&self) -> String {
        format!("{}/api/endpoints", self.base_url)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| AppError::Upstream(format!("Invalid registry response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            400 => AppError::Validation(body),
            401 | 403 => AppError::Auth(body),
            _ => AppError::Upstream(format!("Registry returned {}: {}", status, body)),
        })
    }
}

#[async_trait]
impl EndpointRegistry for HttpEndpointRegistry {
    async fn upsert(
        &self,
        endpoint_token: &str,
        owner_id: &str,
        _owner_email: Option<&str>,
    ) -> Result<EndpointRecord, AppError> {
        let bearer = self.tokens.access_token().await?;
        let response = self
            .client
            .post(self.endpoints_url())
            .bearer_auth(bearer)
            .json(&RegisterEndpointBody { endpoint_token })
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Registry request failed: {}", e)))?;

        let record: EndpointRecord = Self::read_json(response).await?;
        if record.owner_id != owner_id {
            tracing::warn!(
                expected = %owner_id,
                actual = %record.owner_id,
                "Registry assigned the endpoint to a different owner than requested"
            );
        }
        Ok(record)
    }

    async fn remove(&self, _endpoint_token: &str) -> Result<(), AppError> {
        Err(AppError::Validation(
            "Endpoint removal is not available to clients".to_string(),
        ))
    }

    async fn list_all(&self) -> Result<Vec<EndpointRecord>, AppError> {
        Err(AppError::Validation(
            "Listing all endpoints is not available to clients".to_string(),
        ))
    }

    async fn list_by_owner(&self, _owner_id: &str) -> Result<Vec<EndpointRecord>, AppError> {
        let bearer = self.tokens.access_token().await?;
        let response = self
            .client
            .get(self.endpoints_url())
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Registry request failed: {}", e)))?;

        Self::read_json(response).await
    }
}
