//! Redelivery guard for the event trigger.
//!
//! The change feed (and the HTTP hook's callers) may deliver the same
//! creation event more than once. The guard remembers which business records
//! already triggered a fan-out for a TTL window.
//!
//! The Redis guard uses `SET NX EX` for an atomic check-and-set with
//! automatic expiry, so several trigger processes can share it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;

use courier_common::error::AppError;

/// Remembers which source records have already been notified.
#[async_trait]
pub trait TriggerGuard: Send + Sync {
    /// Returns `true` the first time `source_id` is seen within the window,
    /// `false` for a redelivery.
    async fn first_delivery(&self, source_id: &str) -> Result<bool, AppError>;
}

/// Redis-backed guard shared by every trigger process.
pub struct RedisTriggerGuard {
    redis: ConnectionManager,
    ttl: Duration,
}

impl RedisTriggerGuard {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    fn key(source_id: &str) -> String {
        format!("courier:trigger:{}", source_id)
    }
}

#[async_trait]
impl TriggerGuard for RedisTriggerGuard {
    async fn first_delivery(&self, source_id: &str) -> Result<bool, AppError> {
        let mut redis = self.redis.clone();

        // SET key "1" NX EX ttl
        // Some("OK") → key was set (first delivery); None → already seen
        let result: Option<String> = redis::cmd("SET")
            .arg(Self::key(source_id))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async(&mut redis)
            .await?;

        Ok(result.is_some())
    }
}

/// Process-local guard.
pub struct LocalTriggerGuard {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl LocalTriggerGuard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of source ids currently remembered.
    pub async fn tracked_count(&self) -> usize {
        self.seen.lock().await.len()
    }
}

#[async_trait]
impl TriggerGuard for LocalTriggerGuard {
    async fn first_delivery(&self, source_id: &str) -> Result<bool, AppError> {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        seen.retain(|_, expires_at| *expires_at > now);

        if seen.contains_key(source_id) {
            return Ok(false);
        }
        seen.insert(source_id.to_string(), now + self.ttl);
        Ok(true)
    }
}
