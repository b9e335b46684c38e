use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgListener;

use courier_common::types::DeliveryCreated;
use courier_engine::trigger::EventTrigger;

/// Postgres channel the `deliveries` insert trigger publishes on.
pub const DELIVERY_CHANNEL: &str = "courier_delivery_created";

/// Pause before resuming after the listener connection drops.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Decode one change-feed payload. Malformed payloads are logged and dropped.
pub fn parse_payload(payload: &str) -> Option<DeliveryCreated> {
    match serde_json::from_str::<DeliveryCreated>(payload) {
        Ok(delivery) => Some(delivery),
        Err(e) => {
            tracing::warn!(error = %e, payload, "Ignoring malformed delivery notification");
            None
        }
    }
}

/// Listens for delivery creations and hands each one to the trigger.
pub struct DeliveryFeed {
    pool: PgPool,
    trigger: Arc<EventTrigger>,
}

impl DeliveryFeed {
    pub fn new(pool: PgPool, trigger: Arc<EventTrigger>) -> Self {
        Self { pool, trigger }
    }

    /// Start listening. Runs indefinitely until the task is cancelled.
    ///
    /// Each event is handled on its own task so a slow fan-out never holds
    /// up the feed.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(DELIVERY_CHANNEL).await?;

        tracing::info!(channel = DELIVERY_CHANNEL, "Listening for delivery creations");

        loop {
            let notification = match listener.recv().await {
                Ok(notification) => notification,
                Err(e) => {
                    // The listener re-establishes the connection on the next recv.
                    // Creations published while disconnected are not replayed.
                    tracing::warn!(error = %e, "Change feed connection lost, reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            let Some(delivery) = parse_payload(notification.payload()) else {
                continue;
            };

            tracing::debug!(delivery_id = ?delivery.id, "Delivery creation received");

            let trigger = Arc::clone(&self.trigger);
            tokio::spawn(async move {
                let outcome = trigger.on_delivery_created(&delivery).await;
                tracing::debug!(delivery_id = ?delivery.id, ?outcome, "Delivery processed");
            });
        }
    }
}
