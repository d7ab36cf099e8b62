//! Price Watch Bot - Headless Server
//!
//! Telegram bot for crypto price alerts and paper-trading calls.

mod config;
mod maintenance;

use clap::Parser;
use config::{AppConfig, Args};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use pricewatch_alerts::{
    AlertEvaluator, Database, MonitorSupervisor, Notifier, PositionRiskMonitor,
    PriceConditionPipeline, PriceMonitor, ReminderScheduler, SharpChangeDetector, TelegramBot,
    TelegramNotifier,
};
use pricewatch_feeds::PriceGateway;
use teloxide::Bot;

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}

async fn open_database(config: &AppConfig) -> Option<Database> {
    if let Some(dir) = config.database_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!(path = %dir.display(), error = %e, "Failed to create database directory");
            return None;
        }
    }

    match Database::connect(&config.database_url()).await {
        Ok(db) => Some(db),
        Err(e) => {
            error!(path = %config.database_path.display(), error = %e, "Failed to open database");
            None
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    init_logging(&config::log_level(&args, |key| std::env::var(key).ok()));

    let config = match AppConfig::from_env(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("🚀 Price Watch Bot starting...");
    info!("  Database: {}", config.database_path.display());
    info!("  Poll interval: {}s", config.monitor.poll_interval.as_secs());
    info!(
        "  Sharp change: {}% over {}m, cooldown {}s",
        config.sharp_change.threshold_percent,
        config.sharp_change.lookback_minutes(),
        config.sharp_change.cooldown.as_secs()
    );

    let Some(db) = open_database(&config).await else {
        std::process::exit(1);
    };

    let gateway = match PriceGateway::with_defaults(config.http_timeout) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Failed to build exchange clients: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let bot = Bot::new(&config.bot_token);
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(bot.clone()));

    // Marks outlive monitor restarts, so the detector is shared by every pipeline.
    let sharp_changes = Arc::new(SharpChangeDetector::new(
        config.sharp_change,
        db.clone(),
        gateway.clone(),
        notifier.clone(),
    ));

    let factory_db = db.clone();
    let factory_gateway = gateway.clone();
    let factory_notifier = notifier.clone();
    let monitor_config = config.monitor;
    let supervisor = Arc::new(MonitorSupervisor::new(
        Box::new(move || {
            let pipeline = PriceConditionPipeline::new(
                factory_db.clone(),
                monitor_config.record_price_history,
                AlertEvaluator::new(factory_db.clone(), factory_notifier.clone()),
                sharp_changes.clone(),
                PositionRiskMonitor::new(factory_db.clone(), factory_notifier.clone()),
            );
            PriceMonitor::new(
                Arc::new(factory_db.clone()),
                factory_gateway.clone(),
                Arc::new(pipeline),
                monitor_config,
            )
        }),
        shutdown.clone(),
    ));

    let reminders = ReminderScheduler::new(db.clone(), notifier.clone(), shutdown.child_token());
    match db
        .delete_expired_reminders(config.retention.reminder_grace_minutes)
        .await
    {
        Ok(0) => {}
        Ok(n) => info!(count = n, "Dropped long-overdue reminders"),
        Err(e) => warn!(error = %e, "Failed to drop expired reminders"),
    }
    if let Err(e) = reminders.restore().await {
        warn!(error = %e, "Failed to restore reminders");
    }

    supervisor.start().await;

    let maintenance_handle = tokio::spawn(maintenance::run(
        db.clone(),
        config.retention,
        shutdown.child_token(),
    ));

    let telegram = Arc::new(TelegramBot::new(
        bot,
        db.clone(),
        gateway,
        supervisor.clone(),
        reminders,
    ));
    let bot_handle = tokio::spawn(telegram.run(shutdown.child_token()));

    // Handle shutdown
    info!("Press Ctrl+C to stop...");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }

    warn!("Shutdown signal received");
    shutdown.cancel();
    supervisor.stop().await;

    // Wait for tasks with timeout, then abort
    let _ = tokio::time::timeout(Duration::from_secs(5), bot_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(1), maintenance_handle).await;

    info!("👋 Price Watch Bot stopped");
}
