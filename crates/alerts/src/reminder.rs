//! Timed "check the chart" reminders.

use crate::db::{Database, DbError, Reminder};
use crate::messages::reminder_message;
use crate::notifier::Notifier;
use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Invalid duration {0:?}, expected e.g. 5m, 2h or 3d")]
    InvalidDuration(String),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Parse `5m`, `2h` or `3d` into a positive duration.
pub fn parse_duration(value: &str) -> Result<Duration, ReminderError> {
    let invalid = || ReminderError::InvalidDuration(value.to_string());
    let value = value.trim();
    let unit = value.chars().last().ok_or_else(invalid)?;
    let amount: i64 = value[..value.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    match unit.to_ascii_lowercase() {
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        _ => None,
    }
    .ok_or_else(invalid)
}

/// Stores reminders and fires each one from its own task.
#[derive(Clone)]
pub struct ReminderScheduler {
    db: Database,
    notifier: Arc<dyn Notifier>,
    shutdown: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(db: Database, notifier: Arc<dyn Notifier>, shutdown: CancellationToken) -> Self {
        Self {
            db,
            notifier,
            shutdown,
        }
    }

    /// Store a reminder firing `after` from now and schedule it.
    pub async fn add(
        &self,
        chat_id: i64,
        user_id: i64,
        username: &str,
        symbol: &str,
        text: &str,
        after: Duration,
    ) -> Result<Reminder, ReminderError> {
        let reminder = self
            .db
            .insert_reminder(&Reminder {
                id: String::new(),
                chat_id,
                user_id,
                username: username.to_string(),
                symbol: symbol.to_string(),
                text: text.to_string(),
                trigger_at: Utc::now() + after,
            })
            .await?;

        info!(reminder_id = %reminder.id, symbol = symbol, chat_id = chat_id, at = %reminder.trigger_at, "Reminder scheduled");
        self.schedule(reminder.clone());
        Ok(reminder)
    }

    /// Reschedule every stored reminder; overdue ones fire right away.
    pub async fn restore(&self) -> Result<usize, ReminderError> {
        let pending = self.db.pending_reminders().await?;
        let count = pending.len();
        for reminder in pending {
            self.schedule(reminder);
        }
        if count > 0 {
            info!(count = count, "Reminders restored");
        }
        Ok(count)
    }

    fn schedule(&self, reminder: Reminder) {
        let this = self.clone();
        tokio::spawn(async move {
            let wait = (reminder.trigger_at - Utc::now())
                .to_std()
                .unwrap_or_default();
            tokio::select! {
                _ = this.shutdown.cancelled() => {
                    debug!(reminder_id = %reminder.id, "Reminder left for next start");
                }
                _ = tokio::time::sleep(wait) => this.fire(&reminder).await,
            }
        });
    }

    async fn fire(&self, reminder: &Reminder) {
        let text = reminder_message(&reminder.symbol, &reminder.text);
        if let Err(e) = self.notifier.notify(reminder.chat_id, &text).await {
            warn!(reminder_id = %reminder.id, chat_id = reminder.chat_id, error = %e, "Failed to send reminder");
        }
        if let Err(e) = self.db.delete_reminder(&reminder.id).await {
            warn!(reminder_id = %reminder.id, error = %e, "Failed to delete fired reminder");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::RecordingNotifier;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("3D").unwrap(), Duration::days(3));

        for bad in ["", "m", "0m", "-1h", "5", "5s", "1.5h", "h5"] {
            assert!(
                matches!(parse_duration(bad), Err(ReminderError::InvalidDuration(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    async fn wait_for_message(notifier: &RecordingNotifier) {
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while notifier.sent().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_due_reminder_fires_and_is_deleted() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = ReminderScheduler::new(db.clone(), notifier.clone(), CancellationToken::new());

        scheduler
            .add(5, 5, "trader", "BTCUSDT", "retest", Duration::zero())
            .await
            .unwrap();
        wait_for_message(&notifier).await;
        assert_eq!(
            notifier.sent_to(5),
            vec!["⏰ Check the chart of BTCUSDT, retest".to_string()]
        );

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !db.pending_reminders().await.unwrap().is_empty() {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_restore_reschedules_stored_reminders() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.insert_reminder(&Reminder {
            id: String::new(),
            chat_id: 3,
            user_id: 3,
            username: "trader".to_string(),
            symbol: "ETHUSDT".to_string(),
            text: String::new(),
            trigger_at: Utc::now() - Duration::minutes(1),
        })
        .await
        .unwrap();
        let future = db
            .insert_reminder(&Reminder {
                id: String::new(),
                chat_id: 3,
                user_id: 3,
                username: "trader".to_string(),
                symbol: "SOLUSDT".to_string(),
                text: String::new(),
                trigger_at: Utc::now() + Duration::hours(1),
            })
            .await
            .unwrap();

        let notifier = Arc::new(RecordingNotifier::new());
        let scheduler = ReminderScheduler::new(db.clone(), notifier.clone(), CancellationToken::new());
        assert_eq!(scheduler.restore().await.unwrap(), 2);

        wait_for_message(&notifier).await;
        assert_eq!(notifier.sent_to(3), vec!["⏰ Check the chart of ETHUSDT".to_string()]);
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while db.pending_reminders().await.unwrap().len() > 1 {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(db.pending_reminders().await.unwrap()[0].id, future.id);
    }
}
