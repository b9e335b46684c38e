use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_common::db::{self, create_redis_manager};
use courier_common::registry::EndpointRegistry;
use courier_engine::build_trigger;
use courier_engine::registry::PgEndpointRegistry;
use courier_watcher::feed::DeliveryFeed;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier_watcher=info,courier_engine=info,courier_notifier=debug".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Courier watcher starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let redis = create_redis_manager(&config.redis_url).await?;

    let registry: Arc<dyn EndpointRegistry> = Arc::new(PgEndpointRegistry::new(pool.clone()));
    let transport = courier_notifier::transport_from_config(&config)?;
    let trigger = Arc::new(build_trigger(&config, registry, transport, redis));

    let feed = DeliveryFeed::new(pool, trigger);

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = feed.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Delivery feed exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Courier watcher stopped.");
    Ok(())
}
