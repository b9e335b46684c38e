//! Endpoint registry storage.
//!
//! `PgEndpointRegistry` is the system of record; every write is a single-row
//! statement, so per-record atomicity comes from Postgres and no cross-row
//! transaction is needed. `InMemoryEndpointRegistry` backs tests and
//! single-process setups.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::RwLock;

use courier_common::error::AppError;
use courier_common::registry::EndpointRegistry;
use courier_common::types::EndpointRecord;

/// Rows fetched per round-trip by `list_all`.
const REGISTRY_PAGE_SIZE: i64 = 500;

/// Postgres-backed endpoint registry (`endpoints` table).
#[derive(Clone)]
pub struct PgEndpointRegistry {
    pool: PgPool,
}

impl PgEndpointRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EndpointRegistry for PgEndpointRegistry {
    async fn upsert(
        &self,
        endpoint_token: &str,
        owner_id: &str,
        owner_email: Option<&str>,
    ) -> Result<EndpointRecord, AppError> {
        if endpoint_token.trim().is_empty() {
            return Err(AppError::Validation(
                "endpoint_token must not be empty".to_string(),
            ));
        }

        // Same owner keeps the original registered_at; a new owner starts fresh.
        let record: EndpointRecord = sqlx::query_as(
            r#"
            INSERT INTO endpoints (endpoint_token, owner_id, owner_email, registered_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (endpoint_token) DO UPDATE
            SET owner_id = EXCLUDED.owner_id,
                owner_email = EXCLUDED.owner_email,
                registered_at = CASE
                    WHEN endpoints.owner_id = EXCLUDED.owner_id THEN endpoints.registered_at
                    ELSE EXCLUDED.registered_at
                END
            RETURNING endpoint_token, owner_id, owner_email, registered_at
            "#,
        )
        .bind(endpoint_token)
        .bind(owner_id)
        .bind(owner_email)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            endpoint = %record.endpoint_token,
            owner_id = %record.owner_id,
            "Endpoint registered"
        );

        Ok(record)
    }

    async fn remove(&self, endpoint_token: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM endpoints WHERE endpoint_token = $1")
            .bind(endpoint_token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            tracing::info!(endpoint = %endpoint_token, "Endpoint removed");
        } else {
            tracing::debug!(endpoint = %endpoint_token, "Endpoint already absent");
        }

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EndpointRecord>, AppError> {
        let mut records = Vec::new();
        let mut after: Option<String> = None;

        // Keyset pagination on the primary key.
        loop {
            let page: Vec<EndpointRecord> = sqlx::query_as(
                r#"
                SELECT endpoint_token, owner_id, owner_email, registered_at
                FROM endpoints
                WHERE ($1::text IS NULL OR endpoint_token > $1)
                ORDER BY endpoint_token
                LIMIT $2
                "#,
            )
            .bind(after.as_deref())
            .bind(REGISTRY_PAGE_SIZE)
            .fetch_all(&self.pool)
            .await?;

            let last_page = (page.len() as i64) < REGISTRY_PAGE_SIZE;
            after = page.last().map(|r| r.endpoint_token.clone());
            records.extend(page);

            if last_page {
                break;
            }
        }

        Ok(records)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<EndpointRecord>, AppError> {
        let records: Vec<EndpointRecord> = sqlx::query_as(
            r#"
            SELECT endpoint_token, owner_id, owner_email, registered_at
            FROM endpoints
            WHERE owner_id = $1
            ORDER BY registered_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

/// Process-local endpoint registry.
#[derive(Default)]
pub struct InMemoryEndpointRegistry {
    records: RwLock<HashMap<String, EndpointRecord>>,
}

impl InMemoryEndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered endpoints.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Sorted list of registered tokens.
    pub async fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.records.read().await.keys().cloned().collect();
        tokens.sort();
        tokens
    }
}

#[async_trait]
impl EndpointRegistry for InMemoryEndpointRegistry {
    async fn upsert(
        &self,
        endpoint_token: &str,
        owner_id: &str,
        owner_email: Option<&str>,
    ) -> Result<EndpointRecord, AppError> {
        if endpoint_token.trim().is_empty() {
            return Err(AppError::Validation(
                "endpoint_token must not be empty".to_string(),
            ));
        }

        let mut records = self.records.write().await;
        let registered_at = match records.get(endpoint_token) {
            Some(existing) if existing.owner_id == owner_id => existing.registered_at,
            _ => Utc::now(),
        };

        let record = EndpointRecord {
            endpoint_token: endpoint_token.to_string(),
            owner_id: owner_id.to_string(),
            owner_email: owner_email.map(str::to_string),
            registered_at,
        };
        records.insert(endpoint_token.to_string(), record.clone());

        Ok(record)
    }

    async fn remove(&self, endpoint_token: &str) -> Result<(), AppError> {
        self.records.write().await.remove(endpoint_token);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<EndpointRecord>, AppError> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<EndpointRecord>, AppError> {
        let mut records: Vec<EndpointRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        Ok(records)
    }
}
