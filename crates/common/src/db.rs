//! Connections to the backing stores: Postgres for the endpoint registry and
//! delivery feed, Redis for the trigger's redelivery guard.

use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Apply the endpoint registry and delivery feed migrations.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Open a reconnecting Redis handle and make sure the server answers.
pub async fn create_redis_manager(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)?;
    let mut manager = ConnectionManager::new(client).await?;

    let pong: String = redis::cmd("PING").query_async(&mut manager).await?;
    tracing::info!(reply = %pong, "Connected to Redis");
    Ok(manager)
}
