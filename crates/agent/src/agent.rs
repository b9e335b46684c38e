//! Endpoint registration agent.
//!
//! ```text
//! Unregistered ─▶ PermissionRequested ─▶ Granted ─▶ Registering ─▶ Registered
//!                         │                 ▲            │
//!                         ▼                 └────────────┘ (token / write failure)
//!                       Denied
//! ```
//!
//! Sign-in (or an explicit `enable`) starts the flow. A denied prompt is
//! remembered in the preference store and suppresses automatic prompts
//! until the user resets it. A platform without push support is treated as
//! a permanent denial for the rest of the process. Failures are returned to
//! the caller and logged by `run`; none of them is fatal to the host.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};

use courier_common::registry::EndpointRegistry;
use courier_common::types::{EndpointRecord, UserIdentity};

use crate::config::AgentConfig;
use crate::platform::{
    AuthEvent, IdentityProvider, Permission, PlatformError, PushClient, RegistrationContext,
};
use crate::preferences::{PreferenceError, PreferenceStore, PromptPreference};

/// Where the agent is in the registration flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unregistered,
    PermissionRequested,
    Granted,
    Denied,
    Registering,
    Registered,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("no user is signed in")]
    NotSignedIn,

    #[error("notification permission denied")]
    PermissionDenied,

    #[error("permission prompt dismissed")]
    PromptDismissed,

    #[error("permission prompt held back by the user's earlier answer")]
    PromptSuppressed,

    #[error("push messaging is not supported on this platform")]
    PlatformUnsupported,

    #[error("platform returned no endpoint token")]
    TokenUnavailable,

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("failed to store endpoint: {0}")]
    RegistrationWriteFailed(String),

    #[error("a registration is already in progress")]
    InFlight,
}

impl From<PlatformError> for RegistrationError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Unsupported => RegistrationError::PlatformUnsupported,
            PlatformError::Failed(msg) => RegistrationError::RegistrationFailed(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptMode {
    /// Triggered by sign-in; honours the stored prompt preference.
    Automatic,
    /// The user asked for notifications.
    Explicit,
}

/// Keeps this device's endpoint registered for the signed-in user.
pub struct RegistrationAgent {
    push: Arc<dyn PushClient>,
    identity: Arc<dyn IdentityProvider>,
    registry: Arc<dyn EndpointRegistry>,
    preferences: Arc<dyn PreferenceStore>,
    context: RegistrationContext,
    default_defer: Duration,
    state: watch::Sender<AgentState>,
    in_flight: Mutex<()>,
    registered_token: std::sync::Mutex<Option<String>>,
    /// Set once the platform reports it cannot do push; survives sign-out.
    unsupported: AtomicBool,
}

impl RegistrationAgent {
    pub fn new(
        push: Arc<dyn PushClient>,
        identity: Arc<dyn IdentityProvider>,
        registry: Arc<dyn EndpointRegistry>,
        preferences: Arc<dyn PreferenceStore>,
        config: &AgentConfig,
    ) -> Self {
        let (state, _) = watch::channel(AgentState::Unregistered);
        Self {
            push,
            identity,
            registry,
            preferences,
            context: config.registration_context(),
            default_defer: config.remind_later,
            state,
            in_flight: Mutex::new(()),
            registered_token: std::sync::Mutex::new(None),
            unsupported: AtomicBool::new(false),
        }
    }

    /// Whether the platform has reported that it cannot do push.
    pub fn platform_unsupported(&self) -> bool {
        self.unsupported.load(Ordering::Acquire)
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Follow state changes (for UI such as the enable-notifications banner).
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Token stored by the last successful registration in this session.
    pub fn registered_token(&self) -> Option<String> {
        self.registered_token
            .lock()
            .ok()
            .and_then(|token| token.clone())
    }

    /// Register after sign-in. Never prompts against a stored decline.
    pub async fn on_signed_in(
        &self,
        user: &UserIdentity,
    ) -> Result<EndpointRecord, RegistrationError> {
        self.register(user, PromptMode::Automatic).await
    }

    /// Explicit opt-in from the UI for the current user.
    pub async fn enable(&self) -> Result<EndpointRecord, RegistrationError> {
        let user = self
            .identity
            .current_user()
            .ok_or(RegistrationError::NotSignedIn)?;
        self.register(&user, PromptMode::Explicit).await
    }

    /// Forget the session. The registry record stays until the provider
    /// reports the token invalid.
    pub fn on_signed_out(&self) {
        if let Ok(mut token) = self.registered_token.lock() {
            *token = None;
        }
        self.set_state(AgentState::Unregistered);
    }

    /// Drop any stored prompt decision so the next sign-in prompts again.
    /// An unsupported platform stays denied.
    pub async fn reset_prompt(&self) -> Result<(), PreferenceError> {
        PromptPreference::clear(self.preferences.as_ref()).await?;
        let unsupported = self.platform_unsupported();
        self.state.send_if_modified(|state| {
            if *state == AgentState::Denied && !unsupported {
                *state = AgentState::Unregistered;
                true
            } else {
                false
            }
        });
        tracing::info!("Notification prompt preference reset");
        Ok(())
    }

    /// Hold automatic prompts back for `defer`.
    pub async fn remind_later(&self, defer: Duration) -> Result<(), PreferenceError> {
        let after = Utc::now()
            + chrono::Duration::from_std(defer).unwrap_or_else(|_| chrono::Duration::hours(24));
        PromptPreference::RemindLater { after }
            .save(self.preferences.as_ref())
            .await?;
        tracing::info!(%after, "Notification prompt deferred");
        Ok(())
    }

    /// Follow the identity provider until its event stream closes.
    pub async fn run(&self) {
        // Subscribe before reading the current user so no sign-in is missed.
        let mut events = self.identity.subscribe();

        if let Some(user) = self.identity.current_user() {
            self.handle_sign_in(&user).await;
        }

        loop {
            match events.recv().await {
                Ok(AuthEvent::SignedIn(user)) => self.handle_sign_in(&user).await,
                Ok(AuthEvent::SignedOut) => {
                    tracing::debug!("User signed out");
                    self.on_signed_out();
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Identity events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }

        tracing::debug!("Identity event stream closed, registration agent stopping");
    }

    async fn handle_sign_in(&self, user: &UserIdentity) {
        match self.on_signed_in(user).await {
            Ok(record) => {
                tracing::debug!(endpoint = %record.endpoint_token, "Endpoint registered on sign-in");
            }
            Err(RegistrationError::InFlight) => {
                tracing::debug!(uid = %user.uid, "Registration already in flight");
            }
            Err(
                e @ (RegistrationError::PermissionDenied
                | RegistrationError::PromptDismissed
                | RegistrationError::PromptSuppressed
                | RegistrationError::PlatformUnsupported),
            ) => {
                tracing::info!(uid = %user.uid, reason = %e, "Notifications not enabled");
            }
            Err(e) => {
                tracing::warn!(uid = %user.uid, error = %e, "Endpoint registration failed, will retry on next sign-in");
            }
        }
    }

    async fn register(
        &self,
        user: &UserIdentity,
        mode: PromptMode,
    ) -> Result<EndpointRecord, RegistrationError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!(uid = %user.uid, "Registration suppressed, another one is running");
            return Err(RegistrationError::InFlight);
        };

        if self.platform_unsupported() {
            self.set_state(AgentState::Denied);
            return Err(RegistrationError::PlatformUnsupported);
        }

        self.acquire_permission(mode).await?;
        self.register_endpoint(user).await
    }

    async fn acquire_permission(&self, mode: PromptMode) -> Result<(), RegistrationError> {
        let current = self
            .push
            .permission()
            .await
            .map_err(|e| self.platform_failure(e, self.state()))?;
        match current {
            Permission::Granted => {
                self.set_state(AgentState::Granted);
                return Ok(());
            }
            Permission::Denied => {
                tracing::info!("Notifications are blocked in platform settings");
                self.set_state(AgentState::Denied);
                return Err(RegistrationError::PermissionDenied);
            }
            Permission::Default => {}
        }

        if mode == PromptMode::Automatic {
            match PromptPreference::load(self.preferences.as_ref()).await {
                Ok(Some(pref)) if pref.suppresses_prompt(Utc::now()) => {
                    tracing::debug!(?pref, "Skipping permission prompt");
                    if pref == PromptPreference::Denied {
                        self.set_state(AgentState::Denied);
                    }
                    return Err(RegistrationError::PromptSuppressed);
                }
                Ok(_) => {}
                Err(e) => {
                    // An unreadable decision is treated as a decline.
                    tracing::warn!(error = %e, "Failed to read prompt preference");
                    return Err(RegistrationError::PromptSuppressed);
                }
            }
        }

        self.set_state(AgentState::PermissionRequested);
        let answer = self
            .push
            .request_permission()
            .await
            .map_err(|e| self.platform_failure(e, AgentState::Unregistered))?;

        match answer {
            Permission::Granted => {
                tracing::info!("Notification permission granted");
                self.set_state(AgentState::Granted);
                Ok(())
            }
            Permission::Denied => {
                tracing::info!("Notification permission denied");
                self.remember(PromptPreference::Denied).await;
                self.set_state(AgentState::Denied);
                Err(RegistrationError::PermissionDenied)
            }
            Permission::Default => {
                tracing::info!("Notification prompt dismissed");
                if let Err(e) = self.remind_later(self.default_defer).await {
                    tracing::warn!(error = %e, "Failed to store prompt deferral");
                }
                self.set_state(AgentState::Unregistered);
                Err(RegistrationError::PromptDismissed)
            }
        }
    }

    async fn register_endpoint(
        &self,
        user: &UserIdentity,
    ) -> Result<EndpointRecord, RegistrationError> {
        self.set_state(AgentState::Registering);

        let token = match self.push.endpoint_token(&self.context).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!("No endpoint token available despite permission");
                self.set_state(AgentState::Granted);
                return Err(RegistrationError::TokenUnavailable);
            }
            Err(e) => return Err(self.platform_failure(e, AgentState::Granted)),
        };

        match self
            .registry
            .upsert(&token, &user.uid, user.email.as_deref())
            .await
        {
            Ok(record) => {
                tracing::info!(uid = %user.uid, endpoint = %token, "Endpoint registered");
                if let Ok(mut current) = self.registered_token.lock() {
                    *current = Some(token);
                }
                self.set_state(AgentState::Registered);
                Ok(record)
            }
            Err(e) => {
                self.set_state(AgentState::Granted);
                Err(RegistrationError::RegistrationWriteFailed(e.to_string()))
            }
        }
    }

    /// Record a platform error. `Unsupported` denies for the rest of the
    /// process; anything else moves to `fallback` so a later sign-in retries.
    fn platform_failure(&self, err: PlatformError, fallback: AgentState) -> RegistrationError {
        match err {
            PlatformError::Unsupported => {
                tracing::warn!("Push messaging is not supported on this platform");
                self.unsupported.store(true, Ordering::Release);
                self.set_state(AgentState::Denied);
            }
            PlatformError::Failed(ref msg) => {
                tracing::warn!(error = %msg, "Platform call failed");
                self.set_state(fallback);
            }
        }
        err.into()
    }

    async fn remember(&self, pref: PromptPreference) {
        if let Err(e) = pref.save(self.preferences.as_ref()).await {
            tracing::warn!(error = %e, "Failed to store prompt preference");
        }
    }

    fn set_state(&self, next: AgentState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = ?previous, to = ?next, "Registration state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::{Notify, broadcast};

    use courier_common::error::AppError;
    use courier_engine::registry::InMemoryEndpointRegistry;

    use crate::platform::{IdentityBus, IncomingMessage};
    use crate::preferences::InMemoryPreferenceStore;

    struct FakePushClient {
        permission: std::sync::Mutex<Permission>,
        answer: Permission,
        permission_error: Option<PlatformError>,
        token: Result<Option<String>, PlatformError>,
        prompts: AtomicUsize,
        platform_calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        incoming: broadcast::Sender<IncomingMessage>,
    }

    impl FakePushClient {
        fn new(permission: Permission, answer: Permission) -> Self {
            let (incoming, _) = broadcast::channel(4);
            Self {
                permission: std::sync::Mutex::new(permission),
                answer,
                permission_error: None,
                token: Ok(Some("device-token".to_string())),
                prompts: AtomicUsize::new(0),
                platform_calls: AtomicUsize::new(0),
                gate: None,
                incoming,
            }
        }

        fn with_token(mut self, token: Result<Option<String>, PlatformError>) -> Self {
            self.token = token;
            self
        }

        fn with_permission_error(mut self, err: PlatformError) -> Self {
            self.permission_error = Some(err);
            self
        }

        fn with_gate(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn prompts(&self) -> usize {
            self.prompts.load(Ordering::SeqCst)
        }

        fn platform_calls(&self) -> usize {
            self.platform_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PushClient for FakePushClient {
        async fn permission(&self) -> Result<Permission, PlatformError> {
            self.platform_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.permission_error {
                return Err(err.clone());
            }
            Ok(*self.permission.lock().unwrap())
        }

        async fn request_permission(&self) -> Result<Permission, PlatformError> {
            self.platform_calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.fetch_add(1, Ordering::SeqCst);
            if self.answer != Permission::Default {
                *self.permission.lock().unwrap() = self.answer;
            }
            Ok(self.answer)
        }

        async fn endpoint_token(
            &self,
            _context: &RegistrationContext,
        ) -> Result<Option<String>, PlatformError> {
            self.platform_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.token.clone()
        }

        fn incoming(&self) -> broadcast::Receiver<IncomingMessage> {
            self.incoming.subscribe()
        }
    }

    /// Registry whose writes fail until `heal` is called.
    #[derive(Default)]
    struct FlakyRegistry {
        healed: AtomicBool,
        inner: InMemoryEndpointRegistry,
    }

    #[async_trait]
    impl EndpointRegistry for FlakyRegistry {
        async fn upsert(
            &self,
            endpoint_token: &str,
            owner_id: &str,
            owner_email: Option<&str>,
        ) -> Result<EndpointRecord, AppError> {
            if !self.healed.load(Ordering::SeqCst) {
                return Err(AppError::Upstream("registry offline".to_string()));
            }
            self.inner.upsert(endpoint_token, owner_id, owner_email).await
        }

        async fn remove(&self, endpoint_token: &str) -> Result<(), AppError> {
            self.inner.remove(endpoint_token).await
        }

        async fn list_all(&self) -> Result<Vec<EndpointRecord>, AppError> {
            self.inner.list_all().await
        }

        async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<EndpointRecord>, AppError> {
            self.inner.list_by_owner(owner_id).await
        }
    }

    struct Harness {
        agent: Arc<RegistrationAgent>,
        push: Arc<FakePushClient>,
        registry: Arc<InMemoryEndpointRegistry>,
        identity: Arc<IdentityBus>,
    }

    fn harness(push: FakePushClient) -> Harness {
        let push = Arc::new(push);
        let registry = Arc::new(InMemoryEndpointRegistry::new());
        let identity = Arc::new(IdentityBus::new());
        let agent = Arc::new(RegistrationAgent::new(
            push.clone(),
            identity.clone(),
            registry.clone(),
            Arc::new(InMemoryPreferenceStore::new()),
            &AgentConfig::with_vapid_key("test-vapid"),
        ));
        Harness {
            agent,
            push,
            registry,
            identity,
        }
    }

    fn alice() -> UserIdentity {
        UserIdentity {
            uid: "uid-alice".to_string(),
            email: Some("alice@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn test_sign_in_registers_endpoint() {
        let h = harness(FakePushClient::new(Permission::Default, Permission::Granted));

        let record = h.agent.on_signed_in(&alice()).await.unwrap();

        assert_eq!(record.endpoint_token, "device-token");
        assert_eq!(record.owner_id, "uid-alice");
        assert_eq!(record.owner_email.as_deref(), Some("alice@example.com"));
        assert_eq!(h.agent.state(), AgentState::Registered);
        assert_eq!(h.agent.registered_token().as_deref(), Some("device-token"));
        assert_eq!(h.push.prompts(), 1);
    }

    #[tokio::test]
    async fn test_repeat_sign_in_keeps_single_record_without_prompt() {
        let h = harness(FakePushClient::new(Permission::Default, Permission::Granted));

        h.agent.on_signed_in(&alice()).await.unwrap();
        h.agent.on_signed_out();
        h.agent.on_signed_in(&alice()).await.unwrap();

        assert_eq!(h.registry.len().await, 1);
        assert_eq!(h.push.prompts(), 1);
    }

    #[tokio::test]
    async fn test_already_granted_skips_prompt() {
        let h = harness(FakePushClient::new(Permission::Granted, Permission::Granted));

        h.agent.on_signed_in(&alice()).await.unwrap();

        assert_eq!(h.push.prompts(), 0);
        assert_eq!(h.agent.state(), AgentState::Registered);
    }

    #[tokio::test]
    async fn test_denied_prompt_is_not_repeated() {
        let h = harness(FakePushClient::new(Permission::Default, Permission::Denied));

        let first = h.agent.on_signed_in(&alice()).await;
        assert_eq!(first.unwrap_err(), RegistrationError::PermissionDenied);
        assert_eq!(h.agent.state(), AgentState::Denied);

        // Only the stored preference can hold the second prompt back.
        *h.push.permission.lock().unwrap() = Permission::Default;
        h.agent.on_signed_out();
        let second = h.agent.on_signed_in(&alice()).await;

        assert_eq!(second.unwrap_err(), RegistrationError::PromptSuppressed);
        assert_eq!(h.agent.state(), AgentState::Denied);
        assert_eq!(h.push.prompts(), 1);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reset_prompt_allows_prompting_again() {
        let h = harness(FakePushClient::new(Permission::Default, Permission::Denied));
        let _ = h.agent.on_signed_in(&alice()).await;
        *h.push.permission.lock().unwrap() = Permission::Default;

        h.agent.reset_prompt().await.unwrap();
        assert_eq!(h.agent.state(), AgentState::Unregistered);

        let _ = h.agent.on_signed_in(&alice()).await;
        assert_eq!(h.push.prompts(), 2);
    }

    #[tokio::test]
    async fn test_explicit_enable_prompts_despite_decline() {
        let h = harness(FakePushClient::new(Permission::Default, Permission::Denied));
        let _ = h.agent.on_signed_in(&alice()).await;
        *h.push.permission.lock().unwrap() = Permission::Default;
        h.identity.sign_in(alice());

        let result = h.agent.enable().await;

        assert_eq!(result.unwrap_err(), RegistrationError::PermissionDenied);
        assert_eq!(h.push.prompts(), 2);
    }

    #[tokio::test]
    async fn test_enable_requires_signed_in_user() {
        let h = harness(FakePushClient::new(Permission::Default, Permission::Granted));
        assert_eq!(
            h.agent.enable().await.unwrap_err(),
            RegistrationError::NotSignedIn
        );
    }

    #[tokio::test]
    async fn test_blocked_platform_denies_without_prompt() {
        let h = harness(FakePushClient::new(Permission::Denied, Permission::Granted));

        let result = h.agent.on_signed_in(&alice()).await;

        assert_eq!(result.unwrap_err(), RegistrationError::PermissionDenied);
        assert_eq!(h.agent.state(), AgentState::Denied);
        assert_eq!(h.push.prompts(), 0);
    }

    #[tokio::test]
    async fn test_dismissed_prompt_defers_until_deadline() {
        let h = harness(FakePushClient::new(Permission::Default, Permission::Default));

        let first = h.agent.on_signed_in(&alice()).await;
        assert_eq!(first.unwrap_err(), RegistrationError::PromptDismissed);
        assert_eq!(h.agent.state(), AgentState::Unregistered);

        let second = h.agent.on_signed_in(&alice()).await;
        assert_eq!(second.unwrap_err(), RegistrationError::PromptSuppressed);
        assert_eq!(h.push.prompts(), 1);

        // A deferral that has already run out no longer holds the prompt back.
        h.agent.remind_later(Duration::ZERO).await.unwrap();
        let _ = h.agent.on_signed_in(&alice()).await;
        assert_eq!(h.push.prompts(), 2);
    }

    #[tokio::test]
    async fn test_missing_token_leaves_agent_granted() {
        let h = harness(
            FakePushClient::new(Permission::Granted, Permission::Granted).with_token(Ok(None)),
        );

        let result = h.agent.on_signed_in(&alice()).await;

        assert_eq!(result.unwrap_err(), RegistrationError::TokenUnavailable);
        assert_eq!(h.agent.state(), AgentState::Granted);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unsupported_token_fetch_denies_for_the_session() {
        let h = harness(
            FakePushClient::new(Permission::Granted, Permission::Granted)
                .with_token(Err(PlatformError::Unsupported)),
        );

        let first = h.agent.on_signed_in(&alice()).await;
        assert_eq!(first.unwrap_err(), RegistrationError::PlatformUnsupported);
        assert_eq!(h.agent.state(), AgentState::Denied);
        assert!(h.agent.platform_unsupported());
        let calls = h.push.platform_calls();

        // Neither a new sign-in nor an explicit opt-in reaches the platform again.
        h.agent.on_signed_out();
        let second = h.agent.on_signed_in(&alice()).await;
        assert_eq!(second.unwrap_err(), RegistrationError::PlatformUnsupported);
        h.identity.sign_in(alice());
        let third = h.agent.enable().await;
        assert_eq!(third.unwrap_err(), RegistrationError::PlatformUnsupported);

        assert_eq!(h.push.platform_calls(), calls);
        assert_eq!(h.agent.state(), AgentState::Denied);
        assert!(h.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unsupported_permission_query_denies() {
        let h = harness(
            FakePushClient::new(Permission::Default, Permission::Granted)
                .with_permission_error(PlatformError::Unsupported),
        );

        let first = h.agent.on_signed_in(&alice()).await;
        assert_eq!(first.unwrap_err(), RegistrationError::PlatformUnsupported);
        assert_eq!(h.agent.state(), AgentState::Denied);

        let _ = h.agent.on_signed_in(&alice()).await;
        assert_eq!(h.push.platform_calls(), 1);
        assert_eq!(h.push.prompts(), 0);

        // Resetting the prompt does not make the platform capable.
        h.agent.reset_prompt().await.unwrap();
        assert_eq!(h.agent.state(), AgentState::Denied);
    }

    #[tokio::test]
    async fn test_failed_token_fetch_stays_retryable() {
        let h = harness(
            FakePushClient::new(Permission::Granted, Permission::Granted)
                .with_token(Err(PlatformError::Failed("service worker missing".to_string()))),
        );

        let first = h.agent.on_signed_in(&alice()).await;
        assert!(matches!(
            first,
            Err(RegistrationError::RegistrationFailed(_))
        ));
        assert_eq!(h.agent.state(), AgentState::Granted);
        assert!(!h.agent.platform_unsupported());

        let calls = h.push.platform_calls();
        let _ = h.agent.on_signed_in(&alice()).await;
        assert!(h.push.platform_calls() > calls);
    }

    #[tokio::test]
    async fn test_write_failure_is_retried_on_next_sign_in() {
        let push = Arc::new(FakePushClient::new(Permission::Granted, Permission::Granted));
        let registry = Arc::new(FlakyRegistry::default());
        let agent = RegistrationAgent::new(
            push,
            Arc::new(IdentityBus::new()),
            registry.clone(),
            Arc::new(InMemoryPreferenceStore::new()),
            &AgentConfig::with_vapid_key("test-vapid"),
        );

        let first = agent.on_signed_in(&alice()).await;
        assert!(matches!(
            first,
            Err(RegistrationError::RegistrationWriteFailed(_))
        ));
        assert_eq!(agent.state(), AgentState::Granted);
        assert!(agent.registered_token().is_none());

        registry.healed.store(true, Ordering::SeqCst);
        agent.on_signed_in(&alice()).await.unwrap();
        assert_eq!(agent.state(), AgentState::Registered);
        assert_eq!(registry.inner.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_registration_is_suppressed() {
        let gate = Arc::new(Notify::new());
        let h = harness(
            FakePushClient::new(Permission::Granted, Permission::Granted).with_gate(gate.clone()),
        );
        let mut state = h.agent.watch_state();

        let first = {
            let agent = h.agent.clone();
            tokio::spawn(async move { agent.on_signed_in(&alice()).await })
        };
        state
            .wait_for(|s| *s == AgentState::Registering)
            .await
            .unwrap();

        let second = h.agent.on_signed_in(&alice()).await;
        assert_eq!(second.unwrap_err(), RegistrationError::InFlight);

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(h.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_sign_out_does_not_touch_registry() {
        let h = harness(FakePushClient::new(Permission::Granted, Permission::Granted));
        h.agent.on_signed_in(&alice()).await.unwrap();

        h.agent.on_signed_out();

        assert_eq!(h.agent.state(), AgentState::Unregistered);
        assert!(h.agent.registered_token().is_none());
        assert_eq!(h.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_run_follows_identity_events() {
        let h = harness(FakePushClient::new(Permission::Default, Permission::Granted));
        let mut state = h.agent.watch_state();

        let runner = {
            let agent = h.agent.clone();
            tokio::spawn(async move { agent.run().await })
        };
        tokio::task::yield_now().await;

        h.identity.sign_in(alice());
        state
            .wait_for(|s| *s == AgentState::Registered)
            .await
            .unwrap();

        h.identity.sign_out();
        state
            .wait_for(|s| *s == AgentState::Unregistered)
            .await
            .unwrap();

        runner.abort();
        assert_eq!(h.registry.len().await, 1);
    }
}
