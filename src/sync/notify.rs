//! User-visible notification seam.
//!
//! The error handler and mobile service are the only components that surface
//! anything to the user; they do it through this trait so the UI shell can
//! plug in its toast system. The default `LogNotifier` writes to tracing.

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Warning,
    Error,
    Success,
}

/// A toast-style notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    /// Persistent notifications do not auto-dismiss; used for the final
    /// "refresh the page" escalation.
    pub persistent: bool,
}

impl Notification {
    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Warning,
            title: title.into(),
            description: description.into(),
            persistent: false,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            title: title.into(),
            description: description.into(),
            persistent: false,
        }
    }

    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            title: title.into(),
            description: description.into(),
            persistent: false,
        }
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Sink for user-visible notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that only logs, for headless deployments and the demo binary.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Warning => warn!(
                "[notification] {}: {}",
                notification.title, notification.description
            ),
            NotificationKind::Error => error!(
                "[notification] {}: {}",
                notification.title, notification.description
            ),
            NotificationKind::Success => info!(
                "[notification] {}: {}",
                notification.title, notification.description
            ),
        }
    }
}
