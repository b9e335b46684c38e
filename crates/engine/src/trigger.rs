//! Delivery-created trigger.
//!
//! Turns a newly created delivery record into a notification event, fans it
//! out and reconciles the results. Whatever happens here stays here: the
//! business write that produced the record has already succeeded and the
//! trigger never reports an error back to it.

use std::sync::Arc;

use serde::Serialize;

use courier_common::types::{DeliveryCreated, NEW_DELIVERY_TITLE, NotificationEvent};

use crate::dispatcher::Dispatcher;
use crate::guard::TriggerGuard;
use crate::reconciler::Reconciler;

/// Default navigation target for activated notifications.
const DEFAULT_CLICK_TARGET: &str = "/";

/// Why the trigger did not fan out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The record does not say who created it.
    MissingCreator,
    /// The record was already notified (redelivered creation event).
    Duplicate,
}

/// What the trigger did with one creation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Skipped {
        reason: SkipReason,
    },
    Dispatched {
        /// Endpoints addressed, originator excluded.
        targets: usize,
        delivered: usize,
        /// Sends still running when the dispatch deadline passed.
        pending: usize,
        removed: usize,
    },
}

/// Reacts to delivery creation by notifying everyone but the creator.
#[derive(Clone)]
pub struct EventTrigger {
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    guard: Option<Arc<dyn TriggerGuard>>,
    click_target: String,
}

impl EventTrigger {
    pub fn new(dispatcher: Dispatcher, reconciler: Reconciler) -> Self {
        Self {
            dispatcher,
            reconciler,
            guard: None,
            click_target: DEFAULT_CLICK_TARGET.to_string(),
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn TriggerGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_click_target(mut self, click_target: impl Into<String>) -> Self {
        self.click_target = click_target.into();
        self
    }

    /// Build the notification for a delivery, or `None` when the creator is
    /// unknown (broadcasting to everyone would include the creator).
    pub fn build_event(&self, delivery: &DeliveryCreated) -> Option<NotificationEvent> {
        let creator = delivery
            .created_by_uid
            .as_deref()
            .map(str::trim)
            .filter(|uid| !uid.is_empty())?;

        Some(NotificationEvent {
            source_id: delivery.id.clone(),
            source_owner_id: creator.to_string(),
            title: NEW_DELIVERY_TITLE.to_string(),
            body: delivery.summary(),
            click_target: self.click_target.clone(),
        })
    }

    /// Handle one delivery-created event end to end.
    pub async fn on_delivery_created(&self, delivery: &DeliveryCreated) -> TriggerOutcome {
        let Some(event) = self.build_event(delivery) else {
            tracing::info!(
                delivery_id = ?delivery.id,
                "Delivery has no creator uid, skipping notification"
            );
            return TriggerOutcome::Skipped {
                reason: SkipReason::MissingCreator,
            };
        };

        if let (Some(guard), Some(source_id)) = (&self.guard, event.source_id.as_deref()) {
            match guard.first_delivery(source_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(
                        delivery_id = %source_id,
                        "Delivery already notified, ignoring redelivered event"
                    );
                    return TriggerOutcome::Skipped {
                        reason: SkipReason::Duplicate,
                    };
                }
                Err(e) => {
                    // Prefer a possible duplicate over a lost notification.
                    tracing::warn!(
                        delivery_id = %source_id,
                        error = %e,
                        "Trigger guard unavailable, dispatching anyway"
                    );
                }
            }
        }

        tracing::info!(
            delivery_id = ?event.source_id,
            created_by = %event.source_owner_id,
            "New delivery created, notifying other users"
        );

        let report = self.dispatcher.dispatch_report(&event).await;
        let removed = self.reconciler.reconcile(&report.outcomes).await;

        TriggerOutcome::Dispatched {
            targets: report.targets,
            delivered: report.delivered(),
            pending: report.pending(),
            removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use courier_common::error::AppError;
    use courier_common::registry::EndpointRegistry;
    use courier_common::transport::{PushError, PushTransport};
    use courier_common::types::PushPayload;

    use crate::dispatcher::DispatcherConfig;
    use crate::guard::LocalTriggerGuard;
    use crate::registry::InMemoryEndpointRegistry;

    #[derive(Default)]
    struct RecordingTransport {
        payloads: Mutex<Vec<(String, PushPayload)>>,
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, token: &str, payload: &PushPayload) -> Result<(), PushError> {
            self.payloads
                .lock()
                .unwrap()
                .push((token.to_string(), payload.clone()));
            Ok(())
        }
    }

    struct BrokenGuard;

    #[async_trait]
    impl TriggerGuard for BrokenGuard {
        async fn first_delivery(&self, _source_id: &str) -> Result<bool, AppError> {
            Err(AppError::Internal("redis down".to_string()))
        }
    }

    async fn trigger_with(
        entries: &[(&str, &str)],
    ) -> (EventTrigger, Arc<RecordingTransport>) {
        let registry = Arc::new(InMemoryEndpointRegistry::new());
        for (token, owner) in entries {
            registry.upsert(token, owner, None).await.unwrap();
        }
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Dispatcher::new(
            registry.clone(),
            transport.clone(),
            DispatcherConfig::default(),
        );
        let trigger = EventTrigger::new(dispatcher, Reconciler::new(registry));
        (trigger, transport)
    }

    fn delivery(id: &str, creator: Option<&str>) -> DeliveryCreated {
        DeliveryCreated {
            id: Some(id.to_string()),
            invoice_number: Some("1042".to_string()),
            product_name: "TV".to_string(),
            customer_name: "J. Doe".to_string(),
            created_by_uid: creator.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_missing_creator_has_no_side_effect() {
        let (trigger, transport) = trigger_with(&[("e1", "A"), ("e2", "B")]).await;

        let outcome = trigger.on_delivery_created(&delivery("d1", None)).await;
        assert_eq!(
            outcome,
            TriggerOutcome::Skipped {
                reason: SkipReason::MissingCreator
            }
        );

        let outcome = trigger.on_delivery_created(&delivery("d2", Some("  "))).await;
        assert!(matches!(outcome, TriggerOutcome::Skipped { .. }));
        assert!(transport.payloads.lock().unwrap().is_empty());
    }

    /// Delivers to every token except `slow`, which never answers in time.
    struct SlowTransport;

    #[async_trait]
    impl PushTransport for SlowTransport {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn send(&self, token: &str, _payload: &PushPayload) -> Result<(), PushError> {
            if token == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_sends_still_count_as_targets() {
        let registry = Arc::new(InMemoryEndpointRegistry::new());
        for (token, owner) in [("e1", "A"), ("fast", "B"), ("slow", "C")] {
            registry.upsert(token, owner, None).await.unwrap();
        }
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Arc::new(SlowTransport),
            DispatcherConfig {
                timeout: Duration::from_secs(1),
                ..DispatcherConfig::default()
            },
        );
        let trigger = EventTrigger::new(dispatcher, Reconciler::new(registry));

        let outcome = trigger.on_delivery_created(&delivery("d1", Some("A"))).await;

        assert_eq!(
            outcome,
            TriggerOutcome::Dispatched {
                targets: 2,
                delivered: 1,
                pending: 1,
                removed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_event_built_from_delivery() {
        let (trigger, _) = trigger_with(&[]).await;
        let trigger = trigger.with_click_target("/deliveries");

        let event = trigger.build_event(&delivery("d1", Some("A"))).unwrap();
        assert_eq!(event.title, "New Delivery Added");
        assert_eq!(event.body, "Invoice #1042: TV for J. Doe.");
        assert_eq!(event.source_owner_id, "A");
        assert_eq!(event.source_id.as_deref(), Some("d1"));
        assert_eq!(event.click_target, "/deliveries");
    }

    #[tokio::test]
    async fn test_dispatches_to_other_users() {
        let (trigger, transport) = trigger_with(&[("e1", "A"), ("e2", "B")]).await;

        let outcome = trigger.on_delivery_created(&delivery("d1", Some("A"))).await;
        assert_eq!(
            outcome,
            TriggerOutcome::Dispatched {
                targets: 1,
                delivered: 1,
                pending: 0,
                removed: 0
            }
        );

        let sent = transport.payloads.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "e2");
        assert_eq!(sent[0].1.title, "New Delivery Added");
    }

    #[tokio::test]
    async fn test_guard_suppresses_redelivery() {
        let (trigger, transport) = trigger_with(&[("e2", "B")]).await;
        let trigger = trigger.with_guard(Arc::new(LocalTriggerGuard::new(Duration::from_secs(60))));

        let first = trigger.on_delivery_created(&delivery("d1", Some("A"))).await;
        let second = trigger.on_delivery_created(&delivery("d1", Some("A"))).await;

        assert!(matches!(first, TriggerOutcome::Dispatched { .. }));
        assert_eq!(
            second,
            TriggerOutcome::Skipped {
                reason: SkipReason::Duplicate
            }
        );
        assert_eq!(transport.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_guard_failure_still_dispatches() {
        let (trigger, transport) = trigger_with(&[("e2", "B")]).await;
        let trigger = trigger.with_guard(Arc::new(BrokenGuard));

        let outcome = trigger.on_delivery_created(&delivery("d1", Some("A"))).await;

        assert!(matches!(outcome, TriggerOutcome::Dispatched { delivered: 1, .. }));
        assert_eq!(transport.payloads.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(TriggerOutcome::Skipped {
            reason: SkipReason::MissingCreator,
        })
        .unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "missing_creator");
    }
}
