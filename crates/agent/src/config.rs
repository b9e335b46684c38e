use std::time::Duration;

use crate::platform::RegistrationContext;

/// Client-side configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the courier API (default: http://localhost:3000)
    pub api_url: String,

    /// Public application server key used to mint endpoint tokens
    pub vapid_key: String,

    /// Background push script registered with the platform (default: /push-sw.js)
    pub service_worker_path: String,

    /// How long a foreground banner stays up (default: 5s)
    pub banner_duration: Duration,

    /// Default defer when the user dismisses the permission prompt (default: 24h)
    pub remind_later: Duration,

    /// Icon used when a message carries none
    pub default_icon: String,
}

impl AgentConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let vapid_key = std::env::var("COURIER_VAPID_KEY")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("COURIER_VAPID_KEY environment variable is required"))?;

        let banner_seconds: u64 = std::env::var("COURIER_BANNER_SECONDS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("COURIER_BANNER_SECONDS must be a valid u64"))?;

        let remind_later_hours: u64 = std::env::var("COURIER_REMIND_LATER_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("COURIER_REMIND_LATER_HOURS must be a valid u64"))?;

        Ok(Self {
            api_url: std::env::var("COURIER_API_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            vapid_key,
            service_worker_path: std::env::var("COURIER_SERVICE_WORKER")
                .unwrap_or_else(|_| "/push-sw.js".to_string()),
            banner_duration: Duration::from_secs(banner_seconds),
            remind_later: Duration::from_secs(remind_later_hours * 3600),
            default_icon: std::env::var("NOTIFICATION_ICON")
                .unwrap_or_else(|_| "/icons/notification.png".to_string()),
        })
    }

    /// Defaults for everything but the VAPID key.
    pub fn with_vapid_key(vapid_key: impl Into<String>) -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            vapid_key: vapid_key.into(),
            service_worker_path: "/push-sw.js".to_string(),
            banner_duration: Duration::from_secs(5),
            remind_later: Duration::from_secs(24 * 3600),
            default_icon: "/icons/notification.png".to_string(),
        }
    }

    pub fn registration_context(&self) -> RegistrationContext {
        RegistrationContext {
            vapid_key: self.vapid_key.clone(),
            service_worker_path: self.service_worker_path.clone(),
        }
    }
}
