//! Fan-out dispatcher.
//!
//! For each event:
//! 1. Load every registered endpoint
//! 2. Drop the originator's own endpoints
//! 3. Send the payload to the rest, one task per batch (a batch is a single
//!    endpoint unless the transport has a batch API)
//! 4. Join the tasks until the deadline and classify every result
//!
//! Each task is its own bulkhead: a slow, failing or panicking send only
//! affects the endpoints in its own batch. Tasks still running at the
//! deadline are detached and their outcomes go to the straggler reconciler.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use courier_common::config::AppConfig;
use courier_common::registry::EndpointRegistry;
use courier_common::transport::{PushError, PushTransport};
use courier_common::types::{
    DispatchOutcome, EndpointRecord, FailureReason, NotificationEvent, PushPayload,
};

use crate::reconciler::Reconciler;

/// Default overall time bound for one fan-out.
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of concurrent send tasks.
const DEFAULT_CONCURRENCY: usize = 16;

/// Result of one fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Endpoints the event was addressed to (originator excluded).
    pub targets: usize,
    /// One outcome per endpoint that finished before the deadline.
    pub outcomes: Vec<DispatchOutcome>,
}

impl DispatchReport {
    /// Targets without an outcome yet: detached stragglers or lost tasks.
    pub fn pending(&self) -> usize {
        self.targets.saturating_sub(self.outcomes.len())
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

/// Tunables for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub timeout: Duration,
    pub concurrency: usize,
    /// Icon attached to every payload
    pub icon: Option<String>,
}

impl DispatcherConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            timeout: config.dispatch_timeout(),
            concurrency: config.dispatch_concurrency,
            icon: Some(config.notification_icon.clone()),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DISPATCH_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            icon: None,
        }
    }
}

/// Broadcasts notification events to every registered endpoint except the
/// originator's.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<dyn EndpointRegistry>,
    transport: Arc<dyn PushTransport>,
    config: DispatcherConfig,
    straggler_reconciler: Option<Reconciler>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<dyn EndpointRegistry>,
        transport: Arc<dyn PushTransport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
            straggler_reconciler: None,
        }
    }

    /// Reconcile outcomes of sends that finish after the deadline.
    pub fn with_straggler_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.straggler_reconciler = Some(reconciler);
        self
    }

    /// Endpoint tokens that should receive an event from `source_owner_id`.
    pub fn select_targets(candidates: &[EndpointRecord], source_owner_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        candidates
            .iter()
            .filter(|r| r.owner_id != source_owner_id)
            .filter(|r| seen.insert(r.endpoint_token.as_str()))
            .map(|r| r.endpoint_token.clone())
            .collect()
    }

    /// Send `event` to every target endpoint and report one outcome per
    /// endpoint that completed before the deadline.
    ///
    /// Never fails: a registry read error is logged and yields no outcomes.
    pub async fn dispatch(&self, event: &NotificationEvent) -> Vec<DispatchOutcome> {
        self.dispatch_report(event).await.outcomes
    }

    /// Like `dispatch`, but also reports how many endpoints were targeted.
    pub async fn dispatch_report(&self, event: &NotificationEvent) -> DispatchReport {
        let candidates = match self.registry.list_all().await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load endpoint registry, nothing sent");
                return DispatchReport::default();
            }
        };

        let targets = Self::select_targets(&candidates, &event.source_owner_id);
        if targets.is_empty() {
            tracing::debug!(
                source_owner_id = %event.source_owner_id,
                registered = candidates.len(),
                "No target endpoints for event"
            );
            return DispatchReport::default();
        }

        tracing::info!(
            source_owner_id = %event.source_owner_id,
            targets = targets.len(),
            transport = self.transport.name(),
            "Dispatching notification"
        );

        let payload = Arc::new(PushPayload::from_event(event, self.config.icon.as_deref()));
        let batch_size = self.transport.max_batch_size().max(1);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let mut tasks = JoinSet::new();
        for chunk in targets.chunks(batch_size) {
            let tokens = chunk.to_vec();
            let transport = Arc::clone(&self.transport);
            let payload = Arc::clone(&payload);
            let semaphore = Arc::clone(&semaphore);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let sent = AssertUnwindSafe(transport.send_batch(&tokens, &payload))
                    .catch_unwind()
                    .await;
                match sent {
                    Ok(results) => classify_batch(&tokens, results),
                    Err(_) => {
                        tracing::error!(endpoints = tokens.len(), "Send task panicked");
                        tokens
                            .iter()
                            .map(|t| DispatchOutcome::failed(t.as_str(), FailureReason::Unknown))
                            .collect()
                    }
                }
            });
        }

        let deadline = Instant::now() + self.config.timeout;
        let mut outcomes = Vec::with_capacity(targets.len());

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(batch))) => outcomes.extend(batch),
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Send task did not complete");
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        pending = tasks.len(),
                        timeout_ms = self.config.timeout.as_millis() as u64,
                        "Dispatch deadline reached, detaching straggling sends"
                    );
                    self.detach_stragglers(tasks);
                    break;
                }
            }
        }

        let report = DispatchReport {
            targets: targets.len(),
            outcomes,
        };
        let delivered = report.delivered();
        tracing::info!(
            targets = report.targets,
            delivered,
            invalid = report.outcomes.iter().filter(|o| o.is_invalid_endpoint()).count(),
            failed = report.outcomes.len() - delivered,
            pending = report.pending(),
            "Dispatch finished"
        );

        report
    }

    /// Keep straggling sends alive past the deadline and reconcile whatever
    /// they eventually report.
    fn detach_stragglers(&self, mut tasks: JoinSet<Vec<DispatchOutcome>>) {
        let reconciler = self.straggler_reconciler.clone();

        tokio::spawn(async move {
            let mut late = Vec::new();
            while let Some(result) = tasks.join_next().await {
                if let Ok(batch) = result {
                    late.extend(batch);
                }
            }

            tracing::info!(outcomes = late.len(), "Straggling sends completed");

            if let Some(reconciler) = reconciler {
                reconciler.reconcile(&late).await;
            }
        });
    }
}

/// Pair each token with its transport result. Tokens the transport did not
/// report on are `unknown`.
fn classify_batch(tokens: &[String], results: Vec<Result<(), PushError>>) -> Vec<DispatchOutcome> {
    if results.len() != tokens.len() {
        tracing::warn!(
            expected = tokens.len(),
            received = results.len(),
            "Transport returned a mismatched number of results"
        );
    }

    let mut results = results.into_iter();
    tokens
        .iter()
        .map(|token| match results.next() {
            Some(result) => {
                if let Err(e) = &result {
                    tracing::debug!(endpoint = %token, error = %e, "Send failed");
                }
                DispatchOutcome::from_result(token.as_str(), &result)
            }
            None => DispatchOutcome::failed(token.as_str(), FailureReason::Unknown),
        })
        .collect()
}
