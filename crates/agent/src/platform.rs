//! Platform capability seams.
//!
//! Hosts implement these for their runtime (browser bridge, desktop shell,
//! test fakes). Callbacks from the platform arrive as channels.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use courier_common::types::UserIdentity;

/// Capacity of the identity event channel.
const IDENTITY_CHANNEL_CAPACITY: usize = 16;

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Never answered, or the prompt was dismissed.
    Default,
    Granted,
    Denied,
}

/// What the platform needs to mint an endpoint token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationContext {
    /// Public application server key (VAPID).
    pub vapid_key: String,
    /// Script that receives background pushes.
    pub service_worker_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("push messaging is not supported on this platform")]
    Unsupported,

    #[error("platform call failed: {0}")]
    Failed(String),
}

/// A push message as delivered to the device. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub title: Option<String>,
    pub body: Option<String>,
    pub icon: Option<String>,
    pub click_target: Option<String>,
}

/// Device-side push messaging.
#[async_trait]
pub trait PushClient: Send + Sync {
    /// Current permission, without prompting.
    async fn permission(&self) -> Result<Permission, PlatformError>;

    /// Show the permission prompt and wait for the answer.
    async fn request_permission(&self) -> Result<Permission, PlatformError>;

    /// Endpoint token for this device. `Ok(None)` when the platform has no
    /// token to give despite permission.
    async fn endpoint_token(
        &self,
        context: &RegistrationContext,
    ) -> Result<Option<String>, PlatformError>;

    /// Messages received while the application is in the foreground.
    fn incoming(&self) -> broadcast::Receiver<IncomingMessage>;
}

/// Sign-in state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(UserIdentity),
    SignedOut,
}

/// The identity provider as seen by the agent.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserIdentity>;
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Asks the platform to show a system-level notification.
#[async_trait]
pub trait SystemNotifier: Send + Sync {
    async fn show(&self, title: &str, body: &str, icon: &str) -> Result<(), PlatformError>;
}

/// Moves the application (or a newly opened window) to a target.
pub trait Navigator: Send + Sync {
    fn navigate(&self, target: &str);
}

/// In-process identity provider. The host publishes sign-in and sign-out.
pub struct IdentityBus {
    sender: broadcast::Sender<AuthEvent>,
    current: std::sync::RwLock<Option<UserIdentity>>,
}

impl IdentityBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(IDENTITY_CHANNEL_CAPACITY);
        Self {
            sender,
            current: std::sync::RwLock::new(None),
        }
    }

    pub fn sign_in(&self, user: UserIdentity) {
        tracing::debug!(uid = %user.uid, "Publishing sign-in");
        if let Ok(mut current) = self.current.write() {
            *current = Some(user.clone());
        }
        let _ = self.sender.send(AuthEvent::SignedIn(user));
    }

    pub fn sign_out(&self) {
        tracing::debug!("Publishing sign-out");
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
        let _ = self.sender.send(AuthEvent::SignedOut);
    }
}

impl Default for IdentityBus {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for IdentityBus {
    fn current_user(&self) -> Option<UserIdentity> {
        self.current.read().ok().and_then(|u| u.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }
}
