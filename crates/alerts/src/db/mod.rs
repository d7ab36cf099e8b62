//! SQLite store for alerts, calls, deposits, the trigger log and reminders.

mod alerts;
mod calls;
mod reminders;
mod stats;
mod triggers;

pub use alerts::NewAlert;
pub use calls::NewCall;
pub use reminders::Reminder;
pub use stats::{SymbolActivity, SymbolTrades, UserStats, STATS_WINDOW_DAYS};
pub use triggers::{AlertTrigger, NewTrigger, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT};

use pricewatch_core::{CallError, PriceSource};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Call not found: {0}")]
    CallNotFound(String),
    #[error("Invalid close: {0}")]
    InvalidClose(#[from] CallError),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection shared by the monitor and the command handlers.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to SQLite database at the given URL and run migrations.
    pub async fn connect(database_url: &str) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // Every in-memory connection is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> DbResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL DEFAULT 0,
                username TEXT NOT NULL DEFAULT '',
                symbol TEXT NOT NULL,
                target_price REAL NOT NULL DEFAULT 0,
                target_percent REAL NOT NULL DEFAULT 0,
                base_price REAL NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Migration: preferred source columns
        let _ = sqlx::query("ALTER TABLE alerts ADD COLUMN exchange TEXT NOT NULL DEFAULT ''")
            .execute(&self.pool)
            .await;
        let _ = sqlx::query("ALTER TABLE alerts ADD COLUMN market TEXT NOT NULL DEFAULT ''")
            .execute(&self.pool)
            .await;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                username TEXT NOT NULL DEFAULT '',
                chat_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL DEFAULT 0,
                pnl_percent REAL NOT NULL DEFAULT 0,
                size REAL NOT NULL DEFAULT 100,
                status TEXT NOT NULL DEFAULT 'open',
                opened_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                closed_at DATETIME
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Migration: position sizing, stop-loss and preferred source columns
        for column in [
            "deposit_percent REAL NOT NULL DEFAULT 0",
            "stop_loss_price REAL NOT NULL DEFAULT 0",
            "exchange TEXT NOT NULL DEFAULT ''",
            "market TEXT NOT NULL DEFAULT ''",
        ] {
            let _ = sqlx::query(&format!("ALTER TABLE calls ADD COLUMN {column}"))
                .execute(&self.pool)
                .await;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_deposits (
                user_id INTEGER PRIMARY KEY,
                initial_deposit REAL NOT NULL DEFAULT 100,
                current_deposit REAL NOT NULL DEFAULT 100,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_triggers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                alert_id TEXT,
                symbol TEXT NOT NULL,
                trigger_price REAL NOT NULL,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL DEFAULT 0,
                username TEXT NOT NULL DEFAULT '',
                trigger_type TEXT NOT NULL,
                triggered_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL DEFAULT 0,
                username TEXT NOT NULL DEFAULT '',
                symbol TEXT NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                trigger_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_alerts_chat_id ON alerts(chat_id)",
            "CREATE INDEX IF NOT EXISTS idx_alerts_symbol ON alerts(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_calls_user_id ON calls(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_calls_symbol_status ON calls(symbol, status)",
            "CREATE INDEX IF NOT EXISTS idx_calls_opened_at ON calls(opened_at)",
            "CREATE INDEX IF NOT EXISTS idx_triggers_chat_id ON alert_triggers(chat_id, triggered_at)",
            "CREATE INDEX IF NOT EXISTS idx_triggers_triggered_at ON alert_triggers(triggered_at)",
            "CREATE INDEX IF NOT EXISTS idx_price_history_symbol ON price_history(symbol, timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_reminders_trigger_at ON reminders(trigger_at)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }
}

/// Eight lowercase hex characters from four random bytes.
pub(crate) fn short_id() -> String {
    rand::random::<[u8; 4]>()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Persisted `(exchange, market)` columns; empty when unknown.
pub(crate) fn source_columns(source: Option<PriceSource>) -> (&'static str, &'static str) {
    match source {
        Some(s) => (s.exchange.name(), s.market.as_str()),
        None => ("", ""),
    }
}

pub(crate) fn decode_error(what: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(format!("invalid {what}: {value:?}").into())
}
