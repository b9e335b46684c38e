//! Courier API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_common::db::{create_pool, create_redis_manager, run_migrations};
use courier_common::registry::EndpointRegistry;
use courier_engine::build_trigger;
use courier_engine::registry::PgEndpointRegistry;

use courier_api::routes::create_router;
use courier_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "courier_api=debug,courier_engine=debug,courier_notifier=debug,tower_http=debug",
            )
        }))
        .init();

    tracing::info!("Starting Courier API server...");

    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    run_migrations(&pool).await?;

    let redis = create_redis_manager(&config.redis_url).await?;

    let registry: Arc<dyn EndpointRegistry> = Arc::new(PgEndpointRegistry::new(pool));
    let transport = courier_notifier::transport_from_config(&config)?;
    let trigger = build_trigger(&config, Arc::clone(&registry), transport, redis);

    let port = config.api_port;
    let state = AppState::new(registry, trigger, config);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
