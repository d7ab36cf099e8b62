//! Tunables of the monitoring engine.

use std::time::Duration;

/// Polling loop settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    /// Time between poll passes.
    pub poll_interval: Duration,
    /// Tick-over-tick move (percent) reported as notable; 0 turns it off.
    pub notable_move_percent: f64,
    /// Record every fetched price in the price history table.
    pub record_price_history: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            notable_move_percent: 1.0,
            record_price_history: true,
        }
    }
}

/// Sharp-change detection settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharpChangeConfig {
    /// Absolute percent move that counts as sharp.
    pub threshold_percent: f64,
    /// How far back the baseline price is taken from.
    pub lookback: Duration,
    /// Minimum time between two notifications for one symbol.
    pub cooldown: Duration,
}

impl Default for SharpChangeConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 0.2,
            lookback: Duration::from_secs(15 * 60),
            cooldown: Duration::from_secs(5 * 60),
        }
    }
}

impl SharpChangeConfig {
    /// Lookback in whole minutes, as shown to users.
    pub fn lookback_minutes(&self) -> u64 {
        self.lookback.as_secs() / 60
    }
}

/// Retention of the append-only tables. Zero disables a purge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionConfig {
    pub trigger_days: i64,
    pub price_history_days: i64,
    /// Reminders overdue by longer than this are dropped.
    pub reminder_grace_minutes: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            trigger_days: 90,
            price_history_days: 7,
            reminder_grace_minutes: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(MonitorConfig::default().poll_interval, Duration::from_secs(60));
        let sharp = SharpChangeConfig::default();
        assert_eq!(sharp.lookback_minutes(), 15);
        assert_eq!(sharp.cooldown, Duration::from_secs(300));
        assert_eq!(RetentionConfig::default().trigger_days, 90);
    }
}
