use std::sync::Arc;

use once_cell::sync::OnceCell;
use time::Duration;

use crate::config::NotificationOptions;

mod reminders;
mod undo;

pub use reminders::{confirm_reminder, Reminder, ReminderScheduler};
pub use undo::{DeletedItem, PendingUndo, UndoLedger};

pub const APP_TITLE: &str = "SpàiláCPAD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
    Default,
}

impl NotificationPermission {
    pub fn is_granted(self) -> bool {
        self == NotificationPermission::Granted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub message: String,
    pub duration: Duration,
    /// The toast offers an undo action.
    pub undo: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemNotification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
}

pub trait Notifier: Send + Sync {
    fn toast(&self, toast: &Toast);
    /// Returns `false` when the platform refused to show it.
    fn system(&self, notification: &SystemNotification) -> bool;
}

pub trait PermissionPrompt: Send + Sync {
    fn request(&self) -> NotificationPermission;
}

/// A prompt that always answers the same way, e.g. from configuration.
pub struct FixedPermission(pub NotificationPermission);

impl PermissionPrompt for FixedPermission {
    fn request(&self) -> NotificationPermission {
        self.0
    }
}

/// Prints toasts and notifications to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn toast(&self, toast: &Toast) {
        if toast.undo {
            println!("{} (run `spaila undo` to restore)", toast.message);
        } else {
            println!("{}", toast.message);
        }
    }

    fn system(&self, notification: &SystemNotification) -> bool {
        tracing::info!(title = %notification.title, "showing notification");
        println!("[{}] {}", notification.title, notification.body);
        true
    }
}

/// The one place toasts and system notifications go through. Permission is
/// requested at most once per center; every later call reuses the answer.
pub struct NotificationCenter {
    notifier: Arc<dyn Notifier>,
    prompt: Box<dyn PermissionPrompt>,
    permission: OnceCell<NotificationPermission>,
    options: NotificationOptions,
}

impl NotificationCenter {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        prompt: Box<dyn PermissionPrompt>,
        options: NotificationOptions,
    ) -> Self {
        Self {
            notifier,
            prompt,
            permission: OnceCell::new(),
            options,
        }
    }

    pub fn options(&self) -> &NotificationOptions {
        &self.options
    }

    pub fn permission(&self) -> NotificationPermission {
        *self.permission.get_or_init(|| {
            let answer = self.prompt.request();
            tracing::debug!(?answer, "notification permission resolved");
            answer
        })
    }

    pub fn info(&self, message: impl Into<String>) {
        self.notifier.toast(&Toast {
            message: message.into(),
            duration: self.options.toast_duration(),
            undo: false,
        });
    }

    pub fn offer_undo(&self, message: impl Into<String>) {
        self.notifier.toast(&Toast {
            message: message.into(),
            duration: self.options.undo_window(),
            undo: true,
        });
    }

    pub fn show_system(&self, notification: &SystemNotification) -> bool {
        if !self.permission().is_granted() {
            tracing::debug!(title = %notification.title, "notification suppressed, no permission");
            return false;
        }
        self.notifier.system(notification)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub toasts: Mutex<Vec<Toast>>,
        pub system: Mutex<Vec<SystemNotification>>,
    }

    impl Notifier for RecordingNotifier {
        fn toast(&self, toast: &Toast) {
            self.toasts.lock().push(toast.clone());
        }

        fn system(&self, notification: &SystemNotification) -> bool {
            self.system.lock().push(notification.clone());
            true
        }
    }

    impl RecordingNotifier {
        pub fn toast_messages(&self) -> Vec<String> {
            self.toasts.lock().iter().map(|t| t.message.clone()).collect()
        }
    }

    pub struct CountingPrompt {
        pub answer: NotificationPermission,
        pub calls: Arc<AtomicUsize>,
    }

    impl PermissionPrompt for CountingPrompt {
        fn request(&self) -> NotificationPermission {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    pub fn center(
        answer: NotificationPermission,
    ) -> (Arc<NotificationCenter>, Arc<RecordingNotifier>, Arc<AtomicUsize>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let center = NotificationCenter::new(
            notifier.clone(),
            Box::new(CountingPrompt {
                answer,
                calls: calls.clone(),
            }),
            NotificationOptions::default(),
        );
        (Arc::new(center), notifier, calls)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::center;
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn permission_is_requested_once() {
        let (center, _notifier, calls) = center(NotificationPermission::Granted);
        assert!(center.permission().is_granted());
        assert!(center.permission().is_granted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn system_notifications_need_permission() {
        let (center, notifier, _calls) = center(NotificationPermission::Denied);
        let shown = center.show_system(&SystemNotification {
            title: APP_TITLE.into(),
            body: "hello".into(),
            icon: None,
            badge: None,
        });
        assert!(!shown);
        assert!(notifier.system.lock().is_empty());
    }

    #[test]
    fn toasts_carry_configured_durations() {
        let (center, notifier, _calls) = center(NotificationPermission::Default);
        center.info("Note saved successfully");
        center.offer_undo("Note deleted");
        let toasts = notifier.toasts.lock();
        assert_eq!(toasts[0].duration, Duration::seconds(3));
        assert!(!toasts[0].undo);
        assert_eq!(toasts[1].duration, Duration::seconds(5));
        assert!(toasts[1].undo);
    }
}
