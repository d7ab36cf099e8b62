//! Stop-loss enforcement for open calls.

use crate::db::Database;
use crate::messages::stop_loss_message;
use crate::notifier::Notifier;
use pricewatch_core::Call;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct PositionRiskMonitor {
    db: Database,
    notifier: Arc<dyn Notifier>,
}

impl PositionRiskMonitor {
    pub fn new(db: Database, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Close every open call on `symbol` whose stop-loss `price` breaches.
    ///
    /// The owner is notified only after the close is stored; a failed close
    /// stays open and is retried on the next price.
    pub async fn evaluate(&self, symbol: &str, price: f64) -> Vec<Call> {
        let calls = match self.db.open_calls_by_symbol(symbol).await {
            Ok(calls) => calls,
            Err(e) => {
                warn!(symbol = symbol, error = %e, "Failed to load open calls");
                return Vec::new();
            }
        };

        let mut closed = Vec::new();
        for call in calls.iter().filter(|c| c.stop_loss_breached(price)) {
            info!(
                call_id = %call.id,
                symbol = symbol,
                direction = call.direction.as_str(),
                stop_loss = call.stop_loss,
                price = price,
                "Stop-loss breached"
            );

            let updated = match self
                .db
                .close_call(&call.id, call.user_id, price, call.size)
                .await
            {
                Ok(updated) => updated,
                Err(e) => {
                    error!(call_id = %call.id, error = %e, "Failed to close call by stop-loss");
                    continue;
                }
            };

            let text = stop_loss_message(&updated, price);
            if let Err(e) = self.notifier.notify(updated.chat_id, &text).await {
                warn!(call_id = %updated.id, chat_id = updated.chat_id, error = %e, "Failed to send stop-loss notification");
            }
            closed.push(updated);
        }
        closed
    }
}
