//! Append-only trigger log and sampled price history.

use super::{decode_error, Database, DbResult};
use chrono::{DateTime, Utc};
use pricewatch_core::TriggerKind;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub const DEFAULT_HISTORY_LIMIT: i64 = 10;
pub const MAX_HISTORY_LIMIT: i64 = 50;

/// A trigger about to be logged.
#[derive(Debug, Clone)]
pub struct NewTrigger<'a> {
    /// Empty for sharp-change events.
    pub alert_id: Option<&'a str>,
    pub symbol: &'a str,
    pub price: f64,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: &'a str,
    pub kind: TriggerKind,
}

/// A logged trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTrigger {
    pub id: i64,
    pub alert_id: Option<String>,
    pub symbol: String,
    pub price: f64,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub kind: TriggerKind,
    pub triggered_at: DateTime<Utc>,
}

fn trigger_from_row(row: &SqliteRow) -> Result<AlertTrigger, sqlx::Error> {
    let kind: String = row.try_get("trigger_type")?;
    Ok(AlertTrigger {
        id: row.try_get("id")?,
        alert_id: row.try_get("alert_id")?,
        symbol: row.try_get("symbol")?,
        price: row.try_get("trigger_price")?,
        chat_id: row.try_get("chat_id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        kind: TriggerKind::from_name(&kind).ok_or_else(|| decode_error("trigger type", &kind))?,
        triggered_at: row.try_get("triggered_at")?,
    })
}

impl Database {
    /// Append one record to the trigger log.
    pub async fn log_trigger(&self, trigger: NewTrigger<'_>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_triggers (alert_id, symbol, trigger_price, chat_id, user_id, username, trigger_type)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trigger.alert_id.filter(|id| !id.is_empty()))
        .bind(trigger.symbol)
        .bind(trigger.price)
        .bind(trigger.chat_id)
        .bind(trigger.user_id)
        .bind(trigger.username)
        .bind(trigger.kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent triggers of a chat, newest first. `limit` is clamped to 1..=50.
    pub async fn trigger_history(&self, chat_id: i64, limit: i64) -> DbResult<Vec<AlertTrigger>> {
        let rows = sqlx::query(
            r#"
            SELECT id, alert_id, symbol, trigger_price, chat_id, user_id, username, trigger_type, triggered_at
            FROM alert_triggers
            WHERE chat_id = ?
            ORDER BY triggered_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(chat_id)
        .bind(limit.clamp(1, MAX_HISTORY_LIMIT))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(trigger_from_row).collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    /// Delete trigger records older than `days`.
    pub async fn purge_triggers(&self, days: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM alert_triggers WHERE triggered_at < datetime('now', ? || ' days')",
        )
        .bind(-days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Record a fetched price.
    pub async fn log_price(&self, symbol: &str, price: f64) -> DbResult<()> {
        sqlx::query("INSERT INTO price_history (symbol, price) VALUES (?, ?)")
            .bind(symbol)
            .bind(price)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Number of price samples stored for a symbol.
    pub async fn price_sample_count(&self, symbol: &str) -> DbResult<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM price_history WHERE symbol = ?")
                .bind(symbol)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Delete price samples older than `days`.
    pub async fn purge_price_history(&self, days: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM price_history WHERE timestamp < datetime('now', ? || ' days')",
        )
        .bind(-days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
