//! Shared application state for the Axum API server.

use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_common::registry::EndpointRegistry;
use courier_engine::trigger::EventTrigger;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn EndpointRegistry>,
    pub trigger: Arc<EventTrigger>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(
        registry: Arc<dyn EndpointRegistry>,
        trigger: EventTrigger,
        config: AppConfig,
    ) -> Self {
        Self {
            registry,
            trigger: Arc::new(trigger),
            config,
        }
    }
}
