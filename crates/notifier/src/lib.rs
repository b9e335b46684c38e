//! Push transports.
//!
//! `FcmTransport` talks to the Firebase Cloud Messaging HTTP v1 API.
//! `LogOnlyTransport` is used when no FCM credentials are configured so
//! that the rest of the pipeline still runs (and logs) in development.

pub mod fcm;
pub mod log_only;
pub mod token;

use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_common::transport::PushTransport;

pub use fcm::{FcmConfig, FcmCredentials, FcmTransport};
pub use log_only::LogOnlyTransport;
pub use token::{AccessTokenProvider, FileAccessToken, StaticAccessToken};

/// Pick the transport the server configuration asks for.
pub fn transport_from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn PushTransport>> {
    match FcmConfig::from_app_config(config) {
        Some(fcm) => {
            tracing::info!(project_id = %fcm.project_id, "Using FCM push transport");
            Ok(Arc::new(FcmTransport::new(fcm)?))
        }
        None => {
            tracing::warn!(
                "FCM_PROJECT_ID / FCM_ACCESS_TOKEN(_FILE) not set, notifications will only be logged"
            );
            Ok(Arc::new(LogOnlyTransport))
        }
    }
}
