//! Application configuration.
//!
//! Values come from the environment (after `.env` is loaded), and command
//! line flags override them. An invalid value falls back to its default.

use clap::Parser;
use pricewatch_alerts::{MonitorConfig, RetentionConfig, SharpChangeConfig};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("BOT_TOKEN is not set")]
    MissingToken,
}

/// Price watch bot CLI
#[derive(Parser, Debug, Default)]
#[command(name = "pricewatch-bot")]
#[command(about = "Crypto price alerts and paper-trading calls on Telegram", long_about = None)]
pub struct Args {
    /// Telegram bot token (overrides BOT_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// SQLite database file (overrides DATABASE_PATH)
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Seconds between poll passes (overrides POLL_INTERVAL_SECS)
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Sharp-change threshold in percent (overrides SHARP_CHANGE_PERCENT)
    #[arg(long)]
    pub sharp_change_percent: Option<f64>,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bot_token: String,
    pub log_level: String,
    pub database_path: PathBuf,
    /// Per-request timeout of the exchange clients.
    pub http_timeout: Duration,
    pub monitor: MonitorConfig,
    pub sharp_change: SharpChangeConfig,
    pub retention: RetentionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            log_level: "info".to_string(),
            database_path: PathBuf::from("data/alerts.db"),
            http_timeout: Duration::from_secs(10),
            monitor: MonitorConfig::default(),
            sharp_change: SharpChangeConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}

/// Decimal that accepts a comma separator, e.g. `0,5`.
fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn parse_positive(raw: &str) -> Option<f64> {
    parse_decimal(raw).filter(|v| *v > 0.0)
}

fn parse_count(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok()
}

/// Log level from the environment or CLI, before the full config is read.
pub fn log_level(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> String {
    args.log_level
        .clone()
        .or_else(|| lookup("LOG_LEVEL"))
        .map(|l| l.trim().to_ascii_lowercase())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

impl AppConfig {
    /// Read the process environment, then apply `args`.
    pub fn from_env(args: &Args) -> Result<Self, ConfigError> {
        Self::load(args, |key| std::env::var(key).ok())
    }

    /// Build the config from a variable lookup, then apply `args`.
    pub fn load(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Reads a variable, warning when it is set but unusable.
        let read = |key: &str, parse: &dyn Fn(&str) -> bool| -> Option<String> {
            let raw = lookup(key)?;
            if raw.trim().is_empty() {
                return None;
            }
            if parse(&raw) {
                Some(raw)
            } else {
                warn!(variable = key, value = %raw, "Invalid value, using default");
                None
            }
        };
        let positive = |raw: &str| parse_positive(raw).is_some();
        let count = |raw: &str| parse_count(raw).is_some();
        let nonzero_count = |raw: &str| parse_count(raw).is_some_and(|v| v > 0);
        let decimal = |raw: &str| parse_decimal(raw).is_some_and(|v| v >= 0.0);

        config.bot_token = args
            .token
            .clone()
            .or_else(|| lookup("BOT_TOKEN"))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;
        config.log_level = log_level(args, &lookup);

        if let Some(path) = args.database.clone() {
            config.database_path = path;
        } else if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = PathBuf::from(path.trim());
        }

        if let Some(v) = read("SHARP_CHANGE_PERCENT", &positive).and_then(|r| parse_positive(&r)) {
            config.sharp_change.threshold_percent = v;
        }
        if let Some(v) = read("SHARP_CHANGE_INTERVAL_MIN", &nonzero_count).and_then(|r| parse_count(&r)) {
            config.sharp_change.lookback = Duration::from_secs(v * 60);
        }
        if let Some(v) = read("SHARP_CHANGE_COOLDOWN_SECS", &count).and_then(|r| parse_count(&r)) {
            config.sharp_change.cooldown = Duration::from_secs(v);
        }
        if let Some(v) = read("POLL_INTERVAL_SECS", &nonzero_count).and_then(|r| parse_count(&r)) {
            config.monitor.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = read("NOTABLE_MOVE_PERCENT", &decimal).and_then(|r| parse_decimal(&r)) {
            config.monitor.notable_move_percent = v;
        }
        if let Some(v) = read("HTTP_TIMEOUT_SECS", &nonzero_count).and_then(|r| parse_count(&r)) {
            config.http_timeout = Duration::from_secs(v);
        }
        if let Some(v) = read("TRIGGER_RETENTION_DAYS", &count).and_then(|r| parse_count(&r)) {
            config.retention.trigger_days = v as i64;
        }
        if let Some(v) = read("PRICE_HISTORY_RETENTION_DAYS", &count).and_then(|r| parse_count(&r)) {
            config.retention.price_history_days = v as i64;
        }

        if let Some(secs) = args.poll_interval.filter(|s| *s > 0) {
            config.monitor.poll_interval = Duration::from_secs(secs);
        }
        if let Some(pct) = args.sharp_change_percent.filter(|p| p.is_finite() && *p > 0.0) {
            config.sharp_change.threshold_percent = pct;
        }

        Ok(config)
    }

    /// SQLite connection URL for the database file.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.database_path.display())
    }
}
