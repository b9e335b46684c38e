//! Rendering of incoming push messages.
//!
//! In the foreground a message becomes an in-app banner that dismisses
//! itself; in the background the platform shows a system notification.
//! Activating either navigates to the message's click target.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use crate::platform::{IncomingMessage, Navigator, PlatformError, SystemNotifier};

pub const DEFAULT_TITLE: &str = "New Notification";
const DEFAULT_CLICK_TARGET: &str = "/";

/// A message with every display field resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub click_target: String,
}

impl RenderedNotification {
    pub fn from_message(message: &IncomingMessage, default_icon: &str) -> Self {
        fn present(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.trim().is_empty())
        }

        Self {
            title: present(&message.title).unwrap_or(DEFAULT_TITLE).to_string(),
            body: message.body.clone().unwrap_or_default(),
            icon: present(&message.icon).unwrap_or(default_icon).to_string(),
            click_target: present(&message.click_target)
                .unwrap_or(DEFAULT_CLICK_TARGET)
                .to_string(),
        }
    }

    /// Navigate to this notification's target.
    pub fn activate(&self, navigator: &dyn Navigator) {
        tracing::debug!(click_target = %self.click_target, "Notification activated");
        navigator.navigate(&self.click_target);
    }
}

/// The banner currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub id: u64,
    pub notification: RenderedNotification,
}

/// Single-slot in-app banner with auto-dismiss.
///
/// Each `show` replaces the current banner and starts its own timer; a timer
/// only clears the banner it was started for.
#[derive(Clone)]
pub struct ForegroundBanner {
    current: Arc<watch::Sender<Option<Banner>>>,
    next_id: Arc<AtomicU64>,
    display_for: Duration,
}

impl ForegroundBanner {
    pub fn new(display_for: Duration) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current: Arc::new(current),
            next_id: Arc::new(AtomicU64::new(1)),
            display_for,
        }
    }

    pub fn show(&self, notification: RenderedNotification) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.current.send_replace(Some(Banner { id, notification }));

        let current = Arc::clone(&self.current);
        let display_for = self.display_for;
        tokio::spawn(async move {
            tokio::time::sleep(display_for).await;
            current.send_if_modified(|slot| match slot {
                Some(banner) if banner.id == id => {
                    *slot = None;
                    true
                }
                _ => false,
            });
        });

        id
    }

    pub fn current(&self) -> Option<Banner> {
        self.current.borrow().clone()
    }

    /// Follow the banner slot (for the UI layer).
    pub fn subscribe(&self) -> watch::Receiver<Option<Banner>> {
        self.current.subscribe()
    }

    pub fn dismiss(&self) {
        self.current.send_replace(None);
    }

    /// Navigate to the current banner's target and close it.
    pub fn activate(&self, navigator: &dyn Navigator) -> bool {
        let Some(banner) = self.current.send_replace(None) else {
            return false;
        };
        banner.notification.activate(navigator);
        true
    }
}

/// Shows every foreground message as a banner until the platform's
/// incoming channel closes.
pub async fn run_foreground(
    mut incoming: broadcast::Receiver<IncomingMessage>,
    banner: ForegroundBanner,
    default_icon: String,
) {
    loop {
        match incoming.recv().await {
            Ok(message) => {
                let notification = RenderedNotification::from_message(&message, &default_icon);
                tracing::debug!(title = %notification.title, "Foreground message received");
                banner.show(notification);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Foreground messages lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Handles pushes that arrive while the application is not in the foreground.
pub struct BackgroundHandler {
    notifier: Arc<dyn SystemNotifier>,
    default_icon: String,
}

impl BackgroundHandler {
    pub fn new(notifier: Arc<dyn SystemNotifier>, default_icon: impl Into<String>) -> Self {
        Self {
            notifier,
            default_icon: default_icon.into(),
        }
    }

    /// Ask the platform to display `message`. Returns what was shown so the
    /// host can route a later activation.
    pub async fn handle(
        &self,
        message: &IncomingMessage,
    ) -> Result<RenderedNotification, PlatformError> {
        let notification = RenderedNotification::from_message(message, &self.default_icon);
        tracing::debug!(title = %notification.title, "Background message received");

        self.notifier
            .show(&notification.title, &notification.body, &notification.icon)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Failed to show system notification"))?;

        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingNavigator {
        visited: Mutex<Vec<String>>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&self, target: &str) {
            self.visited.lock().unwrap().push(target.to_string());
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        shown: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl SystemNotifier for RecordingNotifier {
        async fn show(&self, title: &str, body: &str, icon: &str) -> Result<(), PlatformError> {
            self.shown
                .lock()
                .unwrap()
                .push((title.to_string(), body.to_string(), icon.to_string()));
            Ok(())
        }
    }

    fn rendered(title: &str) -> RenderedNotification {
        RenderedNotification::from_message(
            &IncomingMessage {
                title: Some(title.to_string()),
                ..Default::default()
            },
            "/icon.png",
        )
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let n = RenderedNotification::from_message(&IncomingMessage::default(), "/icon.png");
        assert_eq!(n.title, "New Notification");
        assert_eq!(n.body, "");
        assert_eq!(n.icon, "/icon.png");
        assert_eq!(n.click_target, "/");
    }

    #[test]
    fn test_message_fields_win_over_defaults() {
        let n = RenderedNotification::from_message(
            &IncomingMessage {
                title: Some("New Delivery Added".to_string()),
                body: Some("TV for J. Doe.".to_string()),
                icon: Some("/custom.png".to_string()),
                click_target: Some("/deliveries".to_string()),
            },
            "/icon.png",
        );
        assert_eq!(n.title, "New Delivery Added");
        assert_eq!(n.body, "TV for J. Doe.");
        assert_eq!(n.icon, "/custom.png");
        assert_eq!(n.click_target, "/deliveries");
    }

    #[tokio::test(start_paused = true)]
    async fn test_banner_auto_dismisses() {
        let banner = ForegroundBanner::new(Duration::from_secs(5));
        banner.show(rendered("one"));
        assert!(banner.current().is_some());

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert!(banner.current().is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(banner.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_banner_restarts_timer() {
        let banner = ForegroundBanner::new(Duration::from_secs(5));
        banner.show(rendered("first"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        let second = banner.show(rendered("second"));

        // The first banner's timer fires here and must leave the second alone.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let current = banner.current().unwrap();
        assert_eq!(current.id, second);
        assert_eq!(current.notification.title, "second");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(banner.current().is_none());
    }

    #[tokio::test]
    async fn test_banner_activation_navigates_and_closes() {
        let banner = ForegroundBanner::new(Duration::from_secs(5));
        let navigator = RecordingNavigator::default();

        assert!(!banner.activate(&navigator));

        banner.show(rendered("hello"));
        assert!(banner.activate(&navigator));
        assert!(banner.current().is_none());
        assert_eq!(*navigator.visited.lock().unwrap(), vec!["/".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_loop_shows_incoming() {
        let (tx, rx) = broadcast::channel(4);
        let banner = ForegroundBanner::new(Duration::from_secs(5));
        let mut slot = banner.subscribe();

        let task = tokio::spawn(run_foreground(rx, banner.clone(), "/icon.png".to_string()));

        tx.send(IncomingMessage {
            title: Some("New Delivery Added".to_string()),
            ..Default::default()
        })
        .unwrap();
        slot.wait_for(|b| b.is_some()).await.unwrap();
        assert_eq!(
            banner.current().unwrap().notification.title,
            "New Delivery Added"
        );

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_background_handler_shows_system_notification() {
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = BackgroundHandler::new(notifier.clone(), "/icon.png");

        let shown = handler
            .handle(&IncomingMessage {
                body: Some("TV for J. Doe.".to_string()),
                click_target: Some("/deliveries".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(
            *notifier.shown.lock().unwrap(),
            vec![(
                "New Notification".to_string(),
                "TV for J. Doe.".to_string(),
                "/icon.png".to_string()
            )]
        );

        let navigator = RecordingNavigator::default();
        shown.activate(&navigator);
        assert_eq!(
            *navigator.visited.lock().unwrap(),
            vec!["/deliveries".to_string()]
        );
    }
}
