use std::sync::Arc;

use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tokio::task::JoinSet;

use super::{NotificationCenter, SystemNotification};
use crate::storage::{Priority, TodoRecord};
use crate::text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub todo_id: String,
    pub title: String,
    pub priority: Priority,
    pub date: Date,
    pub time: Time,
    pub due: OffsetDateTime,
}

impl Reminder {
    /// A reminder exists only for tasks with both a date and a time.
    pub fn for_todo(todo: &TodoRecord, offset: UtcOffset) -> Option<Self> {
        if !todo.has_reminder_slot() {
            return None;
        }
        let date = text::parse_date(&todo.date)?;
        let time = text::parse_time(&todo.time)?;
        Some(Self {
            todo_id: todo.id.clone(),
            title: todo.title.clone(),
            priority: todo.priority,
            date,
            time,
            due: PrimitiveDateTime::new(date, time).assume_offset(offset),
        })
    }

    /// Time left until the reminder fires, `None` once it is due.
    pub fn delay_from(&self, now: OffsetDateTime) -> Option<std::time::Duration> {
        let remaining = self.due - now;
        if remaining <= time::Duration::ZERO {
            return None;
        }
        remaining.try_into().ok()
    }

    pub fn notification(&self, icon: &str) -> SystemNotification {
        SystemNotification {
            title: format!("Reminder: {}", self.title),
            body: format!("Priority: {}", self.priority),
            icon: Some(icon.to_string()),
            badge: None,
        }
    }

    pub fn confirmation(&self) -> String {
        format!(
            "Reminder set for {} at {}",
            text::format_date(self.date),
            text::format_time(self.time)
        )
    }
}

/// Checks that `reminder` can still fire and confirms it to the user.
/// Returns the delay until it is due, or `None` when it is already due or
/// notifications are not permitted.
pub fn confirm_reminder(
    center: &NotificationCenter,
    reminder: &Reminder,
    now: OffsetDateTime,
) -> Option<std::time::Duration> {
    let Some(delay) = reminder.delay_from(now) else {
        tracing::debug!(todo_id = %reminder.todo_id, "reminder already due, skipping");
        return None;
    };
    if !center.permission().is_granted() {
        center.info("Please enable notifications to receive reminders");
        return None;
    }
    center.info(reminder.confirmation());
    Some(delay)
}

/// Fires reminders as local notifications. One sleeping task per reminder.
pub struct ReminderScheduler {
    center: Arc<NotificationCenter>,
    tasks: JoinSet<()>,
}

impl ReminderScheduler {
    pub fn new(center: Arc<NotificationCenter>) -> Self {
        Self {
            center,
            tasks: JoinSet::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Must be called from within a tokio runtime. Returns `false` when the
    /// reminder is already due or notifications are not permitted.
    pub fn schedule(&mut self, reminder: Reminder, now: OffsetDateTime) -> bool {
        let Some(delay) = confirm_reminder(&self.center, &reminder, now) else {
            return false;
        };

        let notification = reminder.notification(&self.center.options().icon);
        let center = self.center.clone();
        let todo_id = reminder.todo_id;
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::info!(%todo_id, "firing reminder");
            center.show_system(&notification);
        });
        true
    }

    /// Waits until every scheduled reminder has fired.
    pub async fn wait_all(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(err) = result {
                tracing::error!(?err, "reminder task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::test_support::center;
    use crate::notify::NotificationPermission;
    use time::macros::{datetime, offset};

    fn todo(date: &str, time: &str) -> TodoRecord {
        TodoRecord {
            id: "t1".into(),
            title: "Water plants".into(),
            priority: Priority::High,
            date: date.into(),
            time: time.into(),
            completed: false,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: None,
        }
    }

    #[test]
    fn reminder_requires_date_and_time() {
        assert!(Reminder::for_todo(&todo("2025-03-01", ""), offset!(UTC)).is_none());
        assert!(Reminder::for_todo(&todo("", "10:00"), offset!(UTC)).is_none());
        let reminder = Reminder::for_todo(&todo("2025-03-01", "10:00"), offset!(+1)).expect("r");
        assert_eq!(reminder.due, datetime!(2025-03-01 10:00 +1));
        assert_eq!(reminder.confirmation(), "Reminder set for Mar 1, 2025 at 10:00");
        let note = reminder.notification("icon.png");
        assert_eq!(note.title, "Reminder: Water plants");
        assert_eq!(note.body, "Priority: high");
    }

    #[test]
    fn past_reminders_have_no_delay() {
        let reminder = Reminder::for_todo(&todo("2025-03-01", "10:00"), offset!(UTC)).expect("r");
        assert!(reminder.delay_from(datetime!(2025-03-01 10:00 UTC)).is_none());
        assert_eq!(
            reminder.delay_from(datetime!(2025-03-01 9:59 UTC)),
            Some(std::time::Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_reminder_fires_notification() {
        let (center, notifier, _calls) = center(NotificationPermission::Granted);
        let mut scheduler = ReminderScheduler::new(center);
        let reminder = Reminder::for_todo(&todo("2025-03-01", "10:00"), offset!(UTC)).expect("r");

        assert!(scheduler.schedule(reminder, datetime!(2025-03-01 9:00 UTC)));
        assert_eq!(scheduler.pending(), 1);
        scheduler.wait_all().await;

        let shown = notifier.system.lock();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Reminder: Water plants");
        assert_eq!(
            notifier.toast_messages(),
            vec!["Reminder set for Mar 1, 2025 at 10:00".to_string()]
        );
    }

    #[tokio::test]
    async fn denied_permission_skips_scheduling() {
        let (center, notifier, _calls) = center(NotificationPermission::Denied);
        let mut scheduler = ReminderScheduler::new(center);
        let reminder = Reminder::for_todo(&todo("2025-03-01", "10:00"), offset!(UTC)).expect("r");

        assert!(!scheduler.schedule(reminder, datetime!(2025-03-01 9:00 UTC)));
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(
            notifier.toast_messages(),
            vec!["Please enable notifications to receive reminders".to_string()]
        );
    }
}
