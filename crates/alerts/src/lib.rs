//! Price alerts and paper-trading calls over Telegram.
//!
//! This crate provides:
//! - SQLite storage for alerts, calls, deposits, trigger history and reminders
//! - The polling loop and the per-price condition checks (alerts, sharp
//!   changes, stop-losses)
//! - Telegram command handling and notifications

pub mod commands;
pub mod config;
pub mod db;
pub mod evaluator;
pub mod messages;
pub mod monitor;
pub mod notifier;
pub mod pipeline;
pub mod reminder;
pub mod risk;
pub mod sharp_change;
pub mod supervisor;
pub mod telegram;

pub use config::{MonitorConfig, RetentionConfig, SharpChangeConfig};
pub use db::{Database, DbError, DbResult};
pub use evaluator::AlertEvaluator;
pub use monitor::{PollSummary, PriceMonitor, SymbolProvider};
pub use notifier::{Notifier, NotifierError, RecordingNotifier, TelegramNotifier};
pub use pipeline::{PriceConditionPipeline, PriceHandler};
pub use reminder::{ReminderError, ReminderScheduler};
pub use risk::PositionRiskMonitor;
pub use sharp_change::SharpChangeDetector;
pub use supervisor::{MonitorFactory, MonitorSupervisor};
pub use telegram::{Command, TelegramBot, TelegramError};
