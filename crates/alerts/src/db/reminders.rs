//! Stored chart reminders.

use super::{Database, DbResult};
use chrono::{DateTime, Utc};

/// Same layout as `CURRENT_TIMESTAMP`, so stored times compare as text.
const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub symbol: String,
    pub text: String,
    pub trigger_at: DateTime<Utc>,
}

type ReminderRow = (String, i64, i64, String, String, String, DateTime<Utc>);

impl Database {
    /// Store a reminder under a fresh short ID; the `id` field is ignored.
    pub async fn insert_reminder(&self, reminder: &Reminder) -> DbResult<Reminder> {
        let id = self.unused_id("reminders").await?;
        sqlx::query(
            r#"
            INSERT INTO reminders (id, chat_id, user_id, username, symbol, text, trigger_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(reminder.chat_id)
        .bind(reminder.user_id)
        .bind(&reminder.username)
        .bind(&reminder.symbol)
        .bind(&reminder.text)
        .bind(reminder.trigger_at.format(SQLITE_DATETIME).to_string())
        .execute(&self.pool)
        .await?;

        Ok(Reminder {
            id,
            ..reminder.clone()
        })
    }

    pub async fn delete_reminder(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM reminders WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All stored reminders, earliest first.
    pub async fn pending_reminders(&self) -> DbResult<Vec<Reminder>> {
        let rows = sqlx::query_as::<_, ReminderRow>(
            r#"
            SELECT id, chat_id, user_id, username, symbol, text, trigger_at
            FROM reminders
            ORDER BY trigger_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, chat_id, user_id, username, symbol, text, trigger_at)| Reminder {
                    id,
                    chat_id,
                    user_id,
                    username,
                    symbol,
                    text,
                    trigger_at,
                },
            )
            .collect())
    }

    /// Drop reminders overdue by more than `grace_minutes`.
    pub async fn delete_expired_reminders(&self, grace_minutes: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM reminders WHERE trigger_at < datetime('now', ? || ' minutes')",
        )
        .bind(-grace_minutes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
