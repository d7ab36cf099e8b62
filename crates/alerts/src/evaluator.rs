//! Alert evaluation against a freshly fetched price.

use crate::db::{Database, NewTrigger};
use crate::messages::{percent_alert_message, price_alert_message};
use crate::notifier::Notifier;
use pricewatch_core::{Alert, AlertCondition};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Checks every alert on a symbol and fires the ones whose condition holds.
///
/// A fired alert is logged and deleted before its chat is notified. Only the
/// pass whose delete removed the row sends the message, so replaying the same
/// prices, or an interrupted pass, never notifies twice.
pub struct AlertEvaluator {
    db: Database,
    notifier: Arc<dyn Notifier>,
}

impl AlertEvaluator {
    pub fn new(db: Database, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Evaluate all alerts on `symbol`. Returns the IDs of the alerts that fired.
    pub async fn evaluate(&self, symbol: &str, price: f64) -> Vec<String> {
        let alerts = match self.db.alerts_by_symbol(symbol).await {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(symbol = symbol, error = %e, "Failed to load alerts");
                return Vec::new();
            }
        };

        let mut fired = Vec::new();
        for alert in alerts {
            if self.fire_if_hit(&alert, price).await {
                fired.push(alert.id);
            }
        }
        fired
    }

    async fn fire_if_hit(&self, alert: &Alert, price: f64) -> bool {
        let Some(hit) = alert.check(price) else {
            debug!(alert_id = %alert.id, symbol = %alert.symbol, price = price, "Alert not reached");
            return false;
        };

        let logged = self
            .db
            .log_trigger(NewTrigger {
                alert_id: Some(&alert.id),
                symbol: &alert.symbol,
                price,
                chat_id: alert.chat_id,
                user_id: alert.user_id,
                username: &alert.username,
                kind: hit.kind,
            })
            .await;
        if let Err(e) = logged {
            // Left in place so the next tick retries the whole trigger.
            error!(alert_id = %alert.id, error = %e, "Failed to log trigger");
            return false;
        }

        match self.db.delete_alert_by_id(&alert.id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(alert_id = %alert.id, "Alert already removed, not notifying");
                return false;
            }
            Err(e) => {
                error!(alert_id = %alert.id, error = %e, "Failed to delete triggered alert");
                return false;
            }
        }

        let text = match alert.condition {
            AlertCondition::Price { target } => price_alert_message(alert, target, price),
            AlertCondition::Percent { base, .. } => {
                percent_alert_message(alert, base, price, hit.change_pct.unwrap_or_default())
            }
        };
        if let Err(e) = self.notifier.notify(alert.chat_id, &text).await {
            warn!(alert_id = %alert.id, chat_id = alert.chat_id, error = %e, "Failed to send alert notification");
        }

        info!(
            alert_id = %alert.id,
            symbol = %alert.symbol,
            chat_id = alert.chat_id,
            kind = %hit.kind,
            price = price,
            "Alert triggered"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewAlert;
    use crate::notifier::RecordingNotifier;
    use pretty_assertions::assert_eq;
    use pricewatch_core::TriggerKind;

    async fn setup() -> (Database, Arc<RecordingNotifier>, AlertEvaluator) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let evaluator = AlertEvaluator::new(db.clone(), notifier.clone());
        (db, notifier, evaluator)
    }

    async fn add(db: &Database, chat_id: i64, condition: AlertCondition) -> Alert {
        db.add_alert(NewAlert {
            chat_id,
            user_id: chat_id,
            username: "trader".to_string(),
            symbol: "ABCUSDT".to_string(),
            condition,
            source: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_price_alert_fires_inside_band_once() {
        let (db, notifier, evaluator) = setup().await;
        let alert = add(&db, 1, AlertCondition::Price { target: 100.0 }).await;

        let mut fired_at = Vec::new();
        for price in [98.0, 99.6, 101.0] {
            if !evaluator.evaluate("ABCUSDT", price).await.is_empty() {
                fired_at.push(price);
            }
        }
        assert_eq!(fired_at, vec![99.6]);
        assert!(db.alerts_by_chat(1).await.unwrap().is_empty());

        // Replaying the sequence yields nothing more.
        for price in [98.0, 99.6, 101.0] {
            assert!(evaluator.evaluate("ABCUSDT", price).await.is_empty());
        }

        assert_eq!(notifier.sent_to(1).len(), 1);
        let history = db.trigger_history(1, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].alert_id.as_deref(), Some(alert.id.as_str()));
        assert_eq!(history[0].kind, TriggerKind::Price);
        assert_eq!(history[0].price, 99.6);
    }

    #[tokio::test]
    async fn test_percent_alerts_are_directional() {
        let (db, notifier, evaluator) = setup().await;
        add(
            &db,
            1,
            AlertCondition::Percent {
                target_pct: 5.0,
                base: 100.0,
            },
        )
        .await;
        add(
            &db,
            2,
            AlertCondition::Percent {
                target_pct: -5.0,
                base: 100.0,
            },
        )
        .await;

        assert!(evaluator.evaluate("ABCUSDT", 104.9).await.is_empty());
        assert_eq!(evaluator.evaluate("ABCUSDT", 105.0).await.len(), 1);
        assert!(evaluator.evaluate("ABCUSDT", 96.0).await.is_empty());
        assert_eq!(evaluator.evaluate("ABCUSDT", 95.0).await.len(), 1);

        assert!(notifier.sent_to(1)[0].contains("rose by 5.00%"));
        assert!(notifier.sent_to(2)[0].contains("fell by 5.00%"));
        assert_eq!(db.trigger_history(2, 10).await.unwrap()[0].kind, TriggerKind::Percent);
    }

    #[tokio::test]
    async fn test_failed_notification_still_consumes_alert() {
        let (db, notifier, evaluator) = setup().await;
        add(&db, 1, AlertCondition::Price { target: 10.0 }).await;
        notifier.fail_chat(1);

        assert_eq!(evaluator.evaluate("ABCUSDT", 10.0).await.len(), 1);
        assert!(db.alerts_by_symbol("ABCUSDT").await.unwrap().is_empty());
        assert_eq!(db.trigger_history(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_alert_removed_before_firing_is_not_notified() {
        let (db, notifier, evaluator) = setup().await;
        let alert = add(&db, 1, AlertCondition::Price { target: 10.0 }).await;

        // Deleted by a command or an earlier pass after this pass loaded it.
        assert!(db.delete_alert(1, &alert.id).await.unwrap());

        assert!(!evaluator.fire_if_hit(&alert, 10.0).await);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_other_symbols_untouched() {
        let (db, notifier, evaluator) = setup().await;
        add(&db, 1, AlertCondition::Price { target: 10.0 }).await;

        assert!(evaluator.evaluate("XYZUSDT", 10.0).await.is_empty());
        assert_eq!(db.alerts_by_chat(1).await.unwrap().len(), 1);
        assert!(notifier.sent().is_empty());
    }
}
