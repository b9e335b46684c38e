use std::time::Duration;

use serde::Deserialize;

/// Server-side configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Shared secret used to verify identity-provider JWTs
    pub jwt_secret: String,

    /// Port the API server binds to (default: 3000)
    pub api_port: u16,

    /// Shared secret expected in `X-Hook-Secret` on the delivery hook.
    /// When unset the hook accepts any caller.
    pub hook_secret: Option<String>,

    /// Firebase project that owns the messaging sender
    pub fcm_project_id: Option<String>,

    /// OAuth2 bearer token for the FCM HTTP v1 API. Google access tokens
    /// expire after about an hour, so this is only suitable for short runs;
    /// long-lived deployments should use `fcm_access_token_file`.
    pub fcm_access_token: Option<String>,

    /// File holding the current FCM bearer token, re-read on every send so
    /// an external refresher (e.g. a credentials sidecar) can rotate it.
    /// Takes precedence over `fcm_access_token`.
    pub fcm_access_token_file: Option<String>,

    /// Upper bound on a single fan-out before stragglers are detached (default: 10000)
    pub dispatch_timeout_ms: u64,

    /// Maximum number of in-flight sends per fan-out (default: 16)
    pub dispatch_concurrency: usize,

    /// How long a delivery id is remembered by the trigger guard (default: 86400)
    pub trigger_dedupe_ttl_seconds: u64,

    /// Icon shown with system notifications
    pub notification_icon: String,

    /// Where activating a notification navigates to (default: "/")
    pub notification_click_target: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
            hook_secret: non_empty_var("HOOK_SECRET"),
            fcm_project_id: non_empty_var("FCM_PROJECT_ID"),
            fcm_access_token: non_empty_var("FCM_ACCESS_TOKEN"),
            fcm_access_token_file: non_empty_var("FCM_ACCESS_TOKEN_FILE"),
            dispatch_timeout_ms: std::env::var("DISPATCH_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_TIMEOUT_MS must be a valid u64"))?,
            dispatch_concurrency: std::env::var("DISPATCH_CONCURRENCY")
                .unwrap_or_else(|_| "16".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DISPATCH_CONCURRENCY must be a valid usize"))?,
            trigger_dedupe_ttl_seconds: std::env::var("TRIGGER_DEDUPE_TTL_SECONDS")
                .unwrap_or_else(|_| "86400".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("TRIGGER_DEDUPE_TTL_SECONDS must be a valid u64"))?,
            notification_icon: std::env::var("NOTIFICATION_ICON")
                .unwrap_or_else(|_| "/icons/notification.png".to_string()),
            notification_click_target: std::env::var("NOTIFICATION_CLICK_TARGET")
                .unwrap_or_else(|_| "/".to_string()),
        })
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn trigger_dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.trigger_dedupe_ttl_seconds)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
