//! Firebase Cloud Messaging HTTP v1 transport.
//!
//! One `messages:send` request per endpoint token; the v1 API has no batch
//! endpoint, so `max_batch_size` stays at 1 and the dispatcher fans out.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use courier_common::config::AppConfig;
use courier_common::transport::{PushError, PushTransport};
use courier_common::types::PushPayload;

use crate::token::{AccessTokenProvider, FileAccessToken, StaticAccessToken};

const FCM_BASE_URL: &str = "https://fcm.googleapis.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the bearer token for FCM comes from.
#[derive(Clone)]
pub enum FcmCredentials {
    /// Fixed token; stops working once it expires.
    Token(String),
    /// File rewritten by an external refresher.
    TokenFile(PathBuf),
}

impl fmt::Debug for FcmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FcmCredentials::Token(_) => f.write_str("Token(<redacted>)"),
            FcmCredentials::TokenFile(path) => f.debug_tuple("TokenFile").field(path).finish(),
        }
    }
}

impl FcmCredentials {
    fn provider(&self) -> Arc<dyn AccessTokenProvider> {
        match self {
            FcmCredentials::Token(token) => Arc::new(StaticAccessToken::new(token.clone())),
            FcmCredentials::TokenFile(path) => Arc::new(FileAccessToken::new(path.clone())),
        }
    }
}

/// Connection settings for the FCM v1 API.
#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub project_id: String,
    pub credentials: FcmCredentials,
    /// Overridable for tests and emulators.
    pub base_url: String,
}

impl FcmConfig {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::with_credentials(project_id, FcmCredentials::Token(access_token.into()))
    }

    pub fn with_credentials(project_id: impl Into<String>, credentials: FcmCredentials) -> Self {
        Self {
            project_id: project_id.into(),
            credentials,
            base_url: FCM_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `None` unless the project id and a token source are both set. A token
    /// file wins over a fixed token.
    pub fn from_app_config(config: &AppConfig) -> Option<Self> {
        let credentials = match (&config.fcm_access_token_file, &config.fcm_access_token) {
            (Some(path), _) => Some(FcmCredentials::TokenFile(PathBuf::from(path))),
            (None, Some(token)) => {
                tracing::warn!(
                    "Using a fixed FCM_ACCESS_TOKEN; sends will fail once it expires, \
                     set FCM_ACCESS_TOKEN_FILE for a refreshed token"
                );
                Some(FcmCredentials::Token(token.clone()))
            }
            (None, None) => None,
        };

        match (&config.fcm_project_id, credentials) {
            (Some(project_id), Some(credentials)) => {
                Some(Self::with_credentials(project_id.clone(), credentials))
            }
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "FCM_PROJECT_ID and FCM_ACCESS_TOKEN(_FILE) must be set together"
                );
                None
            }
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url.trim_end_matches('/'),
            self.project_id
        )
    }
}

// ── Wire types ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: Message<'a>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    token: &'a str,
    notification: Notification<'a>,
    webpush: WebpushConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Notification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct WebpushConfig<'a> {
    fcm_options: WebpushFcmOptions<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<WebpushNotification<'a>>,
}

#[derive(Debug, Serialize)]
struct WebpushFcmOptions<'a> {
    link: &'a str,
}

#[derive(Debug, Serialize)]
struct WebpushNotification<'a> {
    icon: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

fn build_request<'a>(token: &'a str, payload: &'a PushPayload) -> SendRequest<'a> {
    SendRequest {
        message: Message {
            token,
            notification: Notification {
                title: &payload.title,
                body: &payload.body,
            },
            webpush: WebpushConfig {
                fcm_options: WebpushFcmOptions {
                    link: &payload.click_target,
                },
                notification: payload
                    .icon
                    .as_deref()
                    .map(|icon| WebpushNotification { icon }),
            },
        },
    }
}

/// Map a non-success FCM response to a transport error.
///
/// Only an explicit "this token is gone" answer is permanent: the
/// `UNREGISTERED` error code, or 410. A bare 404 is also what a wrong
/// project id or base path produces, so it stays transient like quota,
/// auth and server errors.
fn classify_error(status: StatusCode, body: &str) -> PushError {
    if status == StatusCode::GONE {
        return PushError::Unregistered;
    }

    let parsed: ErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let unregistered = parsed
        .error
        .details
        .iter()
        .any(|d| d.error_code.as_deref() == Some("UNREGISTERED"));
    if unregistered {
        return PushError::Unregistered;
    }

    let detail = match (parsed.error.status.is_empty(), parsed.error.message.is_empty()) {
        (false, false) => format!("{}: {}", parsed.error.status, parsed.error.message),
        (false, true) => parsed.error.status,
        (true, false) => parsed.error.message,
        (true, true) => body.chars().take(200).collect(),
    };

    PushError::Rejected {
        status: status.as_u16(),
        detail,
    }
}

/// FCM HTTP v1 push transport.
#[derive(Clone)]
pub struct FcmTransport {
    config: FcmConfig,
    client: Client,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl FcmTransport {
    pub fn new(config: FcmConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build reqwest client: {}", e))?;
        let tokens = config.credentials.provider();
        Ok(Self {
            config,
            client,
            tokens,
        })
    }

    /// Replace the token source, e.g. with one backed by a service account.
    pub fn with_token_provider(mut self, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        self.tokens = tokens;
        self
    }
}

#[async_trait]
impl PushTransport for FcmTransport {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn send(&self, endpoint_token: &str, payload: &PushPayload) -> Result<(), PushError> {
        let access_token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(self.config.send_url())
            .bearer_auth(access_token)
            .json(&build_request(endpoint_token, payload))
            .send()
            .await
            .map_err(|e| PushError::Transport(format!("FCM request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(endpoint = %endpoint_token, "FCM accepted message");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let error = classify_error(status, &body);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => tracing::warn!(
                status = status.as_u16(),
                "FCM refused the access token; it may have expired"
            ),
            StatusCode::NOT_FOUND if error != PushError::Unregistered => tracing::warn!(
                project_id = %self.config.project_id,
                "FCM answered 404 without UNREGISTERED; check FCM_PROJECT_ID"
            ),
            _ => {}
        }
        tracing::debug!(
            endpoint = %endpoint_token,
            status = status.as_u16(),
            error = %error,
            "FCM rejected message"
        );
        Err(error)
    }
}
