use async_trait::async_trait;

use courier_common::transport::{PushError, PushTransport};
use courier_common::types::PushPayload;

/// Transport that records every send in the log and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyTransport;

#[async_trait]
impl PushTransport for LogOnlyTransport {
    fn name(&self) -> &'static str {
        "log-only"
    }

    async fn send(&self, endpoint_token: &str, payload: &PushPayload) -> Result<(), PushError> {
        tracing::info!(
            endpoint = %endpoint_token,
            title = %payload.title,
            body = %payload.body,
            click_target = %payload.click_target,
            "Push notification (log only)"
        );
        Ok(())
    }
}
