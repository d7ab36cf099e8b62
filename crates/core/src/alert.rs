//! Price alerts and their trigger rule.

use crate::PriceSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative band around a target price that counts as "reached".
pub const PRICE_TOLERANCE: f64 = 0.005;

/// What an alert is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AlertCondition {
    /// Price within `PRICE_TOLERANCE` of `target`.
    Price { target: f64 },
    /// Percent move from `base` reaching `target_pct` in its own direction.
    Percent { target_pct: f64, base: f64 },
}

impl AlertCondition {
    /// Rebuild from the persisted columns. A positive target price wins,
    /// otherwise a non-zero percent with a positive base.
    pub fn from_columns(target_price: f64, target_percent: f64, base_price: f64) -> Option<Self> {
        if target_price > 0.0 {
            Some(AlertCondition::Price {
                target: target_price,
            })
        } else if target_percent != 0.0 && base_price > 0.0 {
            Some(AlertCondition::Percent {
                target_pct: target_percent,
                base: base_price,
            })
        } else {
            None
        }
    }

    /// Columns `(target_price, target_percent, base_price)`.
    pub fn to_columns(self) -> (f64, f64, f64) {
        match self {
            AlertCondition::Price { target } => (target, 0.0, 0.0),
            AlertCondition::Percent { target_pct, base } => (0.0, target_pct, base),
        }
    }

    /// Evaluate against an observed price.
    pub fn check(&self, price: f64) -> Option<AlertHit> {
        if !price.is_finite() {
            return None;
        }
        match *self {
            AlertCondition::Price { target } => {
                if target > 0.0 && (price - target).abs() <= target * PRICE_TOLERANCE {
                    Some(AlertHit {
                        kind: TriggerKind::Price,
                        change_pct: None,
                    })
                } else {
                    None
                }
            }
            AlertCondition::Percent { target_pct, base } => {
                if base <= 0.0 || target_pct == 0.0 {
                    return None;
                }
                let change = percent_change(base, price);
                let reached = if target_pct > 0.0 {
                    change >= target_pct
                } else {
                    change <= target_pct
                };
                reached.then_some(AlertHit {
                    kind: TriggerKind::Percent,
                    change_pct: Some(change),
                })
            }
        }
    }
}

/// A standing alert owned by one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Short hex identifier.
    pub id: String,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub symbol: String,
    pub condition: AlertCondition,
    /// Source resolved when the alert was created.
    pub source: Option<PriceSource>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn check(&self, price: f64) -> Option<AlertHit> {
        self.condition.check(price)
    }
}

/// Result of a fired condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertHit {
    pub kind: TriggerKind,
    /// Percent move from the base, for percent alerts.
    pub change_pct: Option<f64>,
}

/// Kind tag written to the trigger log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Price,
    Percent,
    SharpChange,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Price => "price",
            TriggerKind::Percent => "percent",
            TriggerKind::SharpChange => "sharp_change",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "price" => Some(TriggerKind::Price),
            "percent" => Some(TriggerKind::Percent),
            "sharp_change" => Some(TriggerKind::SharpChange),
            _ => None,
        }
    }

    /// Human label for history listings.
    pub fn label(self) -> &'static str {
        match self {
            TriggerKind::Price => "Price",
            TriggerKind::Percent => "Percent",
            TriggerKind::SharpChange => "Sharp change",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Percent change from `from` to `to`; zero when `from` is not positive.
#[inline]
pub fn percent_change(from: f64, to: f64) -> f64 {
    if from <= 0.0 {
        return 0.0;
    }
    (to - from) / from * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_alert(target: f64) -> AlertCondition {
        AlertCondition::Price { target }
    }

    #[test]
    fn test_price_alert_tolerance_band() {
        let alert = price_alert(100.0);
        assert!(alert.check(98.0).is_none());
        assert!(alert.check(99.49).is_none());
        assert_eq!(alert.check(99.6).map(|h| h.kind), Some(TriggerKind::Price));
        assert!(alert.check(99.51).is_some());
        assert!(alert.check(100.49).is_some());
        assert!(alert.check(101.0).is_none());
    }

    #[test]
    fn test_price_alert_scenario_sequence() {
        let alert = price_alert(100.0);
        let fired: Vec<f64> = [98.0, 99.6, 101.0]
            .into_iter()
            .filter(|p| alert.check(*p).is_some())
            .collect();
        assert_eq!(fired, vec![99.6]);
    }

    #[test]
    fn test_percent_alert_upward() {
        let alert = AlertCondition::Percent {
            target_pct: 5.0,
            base: 200.0,
        };
        assert!(alert.check(209.0).is_none());
        let hit = alert.check(210.0).unwrap();
        assert_eq!(hit.kind, TriggerKind::Percent);
        assert!((hit.change_pct.unwrap() - 5.0).abs() < 1e-9);
        // A drop never satisfies a positive target.
        assert!(alert.check(100.0).is_none());
    }

    #[test]
    fn test_percent_alert_downward() {
        let alert = AlertCondition::Percent {
            target_pct: -10.0,
            base: 50.0,
        };
        assert!(alert.check(46.0).is_none());
        assert!(alert.check(45.0).is_some());
        assert!(alert.check(60.0).is_none());
    }

    #[test]
    fn test_condition_columns() {
        assert_eq!(
            AlertCondition::from_columns(100.0, 0.0, 0.0),
            Some(price_alert(100.0))
        );
        assert_eq!(
            AlertCondition::from_columns(0.0, -3.0, 10.0),
            Some(AlertCondition::Percent {
                target_pct: -3.0,
                base: 10.0
            })
        );
        assert_eq!(AlertCondition::from_columns(0.0, 5.0, 0.0), None);
        assert_eq!(price_alert(7.0).to_columns(), (7.0, 0.0, 0.0));
    }

    #[test]
    fn test_trigger_kind_names() {
        for kind in [TriggerKind::Price, TriggerKind::Percent, TriggerKind::SharpChange] {
            assert_eq!(TriggerKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(TriggerKind::SharpChange.as_str(), "sharp_change");
    }

    #[test]
    fn test_percent_change_guards_zero_base() {
        assert_eq!(percent_change(0.0, 10.0), 0.0);
        assert!((percent_change(100.0, 89.0) + 11.0).abs() < 1e-9);
    }
}
