//! Per-price fan-out to the condition checks.

use crate::db::Database;
use crate::evaluator::AlertEvaluator;
use crate::risk::PositionRiskMonitor;
use crate::sharp_change::SharpChangeDetector;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Receives every price the monitor fetches.
#[async_trait]
pub trait PriceHandler: Send + Sync {
    async fn on_price(&self, symbol: &str, price: f64);
}

/// Runs, in order: price history, alert evaluation, sharp-change detection
/// and stop-loss checks. Each stage sees the same price and fails on its own.
pub struct PriceConditionPipeline {
    db: Database,
    record_history: bool,
    alerts: AlertEvaluator,
    sharp_changes: Arc<SharpChangeDetector>,
    risk: PositionRiskMonitor,
}

impl PriceConditionPipeline {
    pub fn new(
        db: Database,
        record_history: bool,
        alerts: AlertEvaluator,
        sharp_changes: Arc<SharpChangeDetector>,
        risk: PositionRiskMonitor,
    ) -> Self {
        Self {
            db,
            record_history,
            alerts,
            sharp_changes,
            risk,
        }
    }
}

#[async_trait]
impl PriceHandler for PriceConditionPipeline {
    async fn on_price(&self, symbol: &str, price: f64) {
        if self.record_history {
            if let Err(e) = self.db.log_price(symbol, price).await {
                warn!(symbol = symbol, error = %e, "Failed to record price history");
            }
        }

        let fired = self.alerts.evaluate(symbol, price).await;
        let sharp = self.sharp_changes.evaluate(symbol, price).await;
        let stopped = self.risk.evaluate(symbol, price).await;

        debug!(
            symbol = symbol,
            price = price,
            alerts = fired.len(),
            sharp_change = sharp.is_some(),
            stop_losses = stopped.len(),
            "Price evaluated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharpChangeConfig;
    use crate::db::{NewAlert, NewCall};
    use crate::notifier::RecordingNotifier;
    use pretty_assertions::assert_eq;
    use pricewatch_core::{AlertCondition, Direction};
    use pricewatch_feeds::PriceGateway;

    #[tokio::test]
    async fn test_pipeline_runs_every_stage() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let pipeline = PriceConditionPipeline::new(
            db.clone(),
            true,
            AlertEvaluator::new(db.clone(), notifier.clone()),
            Arc::new(SharpChangeDetector::new(
                SharpChangeConfig::default(),
                db.clone(),
                PriceGateway::new(),
                notifier.clone(),
            )),
            PositionRiskMonitor::new(db.clone(), notifier.clone()),
        );

        db.add_alert(NewAlert {
            chat_id: 1,
            user_id: 1,
            username: "a".to_string(),
            symbol: "ABCUSDT".to_string(),
            condition: AlertCondition::Price { target: 50.0 },
            source: None,
        })
        .await
        .unwrap();
        db.open_call(NewCall {
            user_id: 2,
            username: "b".to_string(),
            chat_id: 2,
            symbol: "ABCUSDT".to_string(),
            source: None,
            direction: Direction::Long,
            entry_price: 60.0,
            deposit_percent: 0.0,
            stop_loss: 55.0,
        })
        .await
        .unwrap();

        pipeline.on_price("ABCUSDT", 50.1).await;

        assert_eq!(notifier.sent_to(1).len(), 1);
        assert_eq!(notifier.sent_to(2).len(), 1);
        assert_eq!(db.price_sample_count("ABCUSDT").await.unwrap(), 1);
        assert!(db.all_monitored_symbols().await.unwrap().is_empty());
    }
}
