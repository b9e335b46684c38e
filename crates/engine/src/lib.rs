//! Server-side half of the notification subsystem: registry storage,
//! fan-out, stale-endpoint cleanup and the delivery trigger.

pub mod dispatcher;
pub mod guard;
pub mod reconciler;
pub mod registry;
pub mod trigger;

use std::sync::Arc;

use redis::aio::ConnectionManager;

use courier_common::config::AppConfig;
use courier_common::registry::EndpointRegistry;
use courier_common::transport::PushTransport;

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::guard::RedisTriggerGuard;
use crate::reconciler::Reconciler;
use crate::trigger::EventTrigger;

/// Assemble the production trigger: dispatcher with late-outcome
/// reconciliation, Redis redelivery guard and configured click target.
pub fn build_trigger(
    config: &AppConfig,
    registry: Arc<dyn EndpointRegistry>,
    transport: Arc<dyn PushTransport>,
    redis: ConnectionManager,
) -> EventTrigger {
    let reconciler = Reconciler::new(Arc::clone(&registry));
    let dispatcher = Dispatcher::new(
        registry,
        transport,
        DispatcherConfig::from_app_config(config),
    )
    .with_straggler_reconciler(reconciler.clone());

    EventTrigger::new(dispatcher, reconciler)
        .with_guard(Arc::new(RedisTriggerGuard::new(
            redis,
            config.trigger_dedupe_ttl(),
        )))
        .with_click_target(config.notification_click_target.clone())
}
