//! Stale-endpoint reconciler.
//!
//! Removes endpoints the push provider reported as permanently invalid.
//! Transient and unknown failures are left alone; the next event simply
//! tries them again.

use std::collections::HashSet;
use std::sync::Arc;

use courier_common::registry::EndpointRegistry;
use courier_common::types::DispatchOutcome;

/// Applies dispatch outcomes to the endpoint registry.
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<dyn EndpointRegistry>,
}

impl Reconciler {
    pub fn new(registry: Arc<dyn EndpointRegistry>) -> Self {
        Self { registry }
    }

    /// Remove every endpoint whose outcome is `invalid-endpoint`.
    ///
    /// Returns how many endpoints were removed. A failed removal is logged
    /// and does not stop the others.
    pub async fn reconcile(&self, outcomes: &[DispatchOutcome]) -> usize {
        let stale: HashSet<&str> = outcomes
            .iter()
            .filter(|o| o.is_invalid_endpoint())
            .map(|o| o.endpoint_token.as_str())
            .collect();

        if stale.is_empty() {
            return 0;
        }

        let mut removed = 0usize;
        for token in stale {
            match self.registry.remove(token).await {
                Ok(()) => {
                    tracing::info!(endpoint = %token, "Removed stale endpoint");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        endpoint = %token,
                        error = %e,
                        "Failed to remove stale endpoint"
                    );
                }
            }
        }

        removed
    }
}
