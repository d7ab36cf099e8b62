//! Hourly retention purges.

use pricewatch_alerts::{Database, RetentionConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Rows removed by one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub triggers: u64,
    pub price_samples: u64,
    pub reminders: u64,
}

/// Purge every table once. A failed purge is logged and counted as zero.
pub async fn purge_once(db: &Database, retention: &RetentionConfig) -> PurgeSummary {
    let mut summary = PurgeSummary::default();

    if retention.trigger_days > 0 {
        match db.purge_triggers(retention.trigger_days).await {
            Ok(n) => summary.triggers = n,
            Err(e) => warn!(error = %e, "Failed to purge trigger history"),
        }
    }
    if retention.price_history_days > 0 {
        match db.purge_price_history(retention.price_history_days).await {
            Ok(n) => summary.price_samples = n,
            Err(e) => warn!(error = %e, "Failed to purge price history"),
        }
    }
    match db
        .delete_expired_reminders(retention.reminder_grace_minutes)
        .await
    {
        Ok(n) => summary.reminders = n,
        Err(e) => warn!(error = %e, "Failed to purge expired reminders"),
    }

    summary
}

/// Run `purge_once` every hour until cancelled.
pub async fn run(db: Database, retention: RetentionConfig, cancel: CancellationToken) {
    info!(
        trigger_days = retention.trigger_days,
        price_history_days = retention.price_history_days,
        "Starting retention maintenance"
    );

    loop {
        let summary = purge_once(&db, &retention).await;
        if summary == PurgeSummary::default() {
            debug!("Maintenance pass removed nothing");
        } else {
            info!(
                triggers = summary.triggers,
                price_samples = summary.price_samples,
                reminders = summary.reminders,
                "Maintenance pass finished"
            );
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {}
        }
    }

    info!("Retention maintenance stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_purge_on_fresh_database_removes_nothing() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.log_price("BTCUSDT", 1.0).await.unwrap();

        let summary = purge_once(&db, &RetentionConfig::default()).await;
        assert_eq!(summary, PurgeSummary::default());
        assert_eq!(db.price_sample_count("BTCUSDT").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(db, RetentionConfig::default(), cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
