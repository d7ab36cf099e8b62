//! Detection of large moves over a short lookback window.
//!
//! The baseline is the price recorded at the last notification for the symbol
//! while that notification is inside the lookback window, otherwise the
//! historical price one lookback ago. Consecutive notifications therefore
//! measure from each other instead of from a fixed anchor.

use crate::config::SharpChangeConfig;
use crate::db::{Database, NewTrigger};
use crate::messages::sharp_change_message;
use crate::notifier::Notifier;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pricewatch_core::{percent_change, TriggerKind};
use pricewatch_feeds::PriceGateway;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Time and price of the last notification for a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharpMark {
    pub at: DateTime<Utc>,
    pub price: f64,
}

/// A notified sharp move.
#[derive(Debug, Clone, PartialEq)]
pub struct SharpChange {
    pub symbol: String,
    pub from: f64,
    pub to: f64,
    pub change_pct: f64,
    /// Chats that were sent the notification.
    pub notified: usize,
}

pub struct SharpChangeDetector {
    config: SharpChangeConfig,
    lookback: Duration,
    cooldown: Duration,
    marks: DashMap<String, SharpMark>,
    db: Database,
    gateway: PriceGateway,
    notifier: Arc<dyn Notifier>,
}

impl SharpChangeDetector {
    pub fn new(
        config: SharpChangeConfig,
        db: Database,
        gateway: PriceGateway,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            lookback: Duration::seconds(config.lookback.as_secs() as i64),
            cooldown: Duration::seconds(config.cooldown.as_secs() as i64),
            marks: DashMap::new(),
            db,
            gateway,
            notifier,
        }
    }

    /// Last notification recorded for a symbol.
    pub fn mark(&self, symbol: &str) -> Option<SharpMark> {
        self.marks.get(symbol).map(|m| *m)
    }

    pub async fn evaluate(&self, symbol: &str, price: f64) -> Option<SharpChange> {
        self.evaluate_at(symbol, price, Utc::now()).await
    }

    /// Evaluate `price` observed at `now`.
    pub async fn evaluate_at(
        &self,
        symbol: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<SharpChange> {
        let baseline = self.baseline(symbol, now).await?;
        let change = percent_change(baseline, price);
        if change.abs() < self.config.threshold_percent {
            return None;
        }

        let mark = SharpMark { at: now, price };
        let armed = match self.marks.entry(symbol.to_string()) {
            Entry::Occupied(mut last) => {
                if now - last.get().at < self.cooldown {
                    false
                } else {
                    last.insert(mark);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(mark);
                true
            }
        };
        if !armed {
            debug!(symbol = symbol, change = change, "Sharp change suppressed by cooldown");
            return None;
        }

        let notified = self.notify_watchers(symbol, baseline, price, change).await;
        info!(
            symbol = symbol,
            from = baseline,
            to = price,
            change = change,
            chats = notified,
            "Sharp change detected"
        );

        Some(SharpChange {
            symbol: symbol.to_string(),
            from: baseline,
            to: price,
            change_pct: change,
            notified,
        })
    }

    async fn baseline(&self, symbol: &str, now: DateTime<Utc>) -> Option<f64> {
        if let Some(mark) = self.mark(symbol) {
            if now - mark.at < self.lookback {
                return Some(mark.price);
            }
        }

        let preferred = self.db.preferred_source(symbol).await.ok().flatten();
        match self
            .gateway
            .historical_price(symbol, now - self.lookback, preferred)
            .await
        {
            Ok(price) if price > 0.0 => Some(price),
            Ok(_) => None,
            Err(e) => {
                debug!(symbol = symbol, error = %e, "No baseline for sharp change");
                None
            }
        }
    }

    /// Notify each chat with an alert or an open call on the symbol once.
    async fn notify_watchers(&self, symbol: &str, from: f64, to: f64, change: f64) -> usize {
        // chat -> (user, username)
        let mut watchers: BTreeMap<i64, (i64, String)> = BTreeMap::new();
        match self.db.alerts_by_symbol(symbol).await {
            Ok(alerts) => {
                for alert in alerts {
                    watchers
                        .entry(alert.chat_id)
                        .or_insert((alert.user_id, alert.username));
                }
            }
            Err(e) => warn!(symbol = symbol, error = %e, "Failed to load alerts for sharp change"),
        }
        match self.db.open_calls_by_symbol(symbol).await {
            Ok(calls) => {
                for call in calls {
                    watchers
                        .entry(call.chat_id)
                        .or_insert((call.user_id, call.username));
                }
            }
            Err(e) => warn!(symbol = symbol, error = %e, "Failed to load calls for sharp change"),
        }

        let text = sharp_change_message(symbol, change, self.config.lookback_minutes(), from, to);
        let mut notified = 0;
        for (chat_id, (user_id, username)) in watchers {
            match self.notifier.notify(chat_id, &text).await {
                Ok(()) => notified += 1,
                Err(e) => {
                    warn!(symbol = symbol, chat_id = chat_id, error = %e, "Failed to send sharp change notification")
                }
            }
            let logged = self
                .db
                .log_trigger(NewTrigger {
                    alert_id: None,
                    symbol,
                    price: to,
                    chat_id,
                    user_id,
                    username: &username,
                    kind: TriggerKind::SharpChange,
                })
                .await;
            if let Err(e) = logged {
                error!(symbol = symbol, chat_id = chat_id, error = %e, "Failed to log sharp change");
            }
        }
        notified
    }
}
