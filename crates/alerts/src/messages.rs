//! Notification and reply texts (Telegram HTML).

use crate::db::{AlertTrigger, SymbolActivity, SymbolTrades, UserStats};
use pricewatch_core::{
    format_change, format_price, Alert, AlertCondition, Call, PriceInfo, TriggerKind,
};
use teloxide::utils::html::escape;

fn moved(change: f64) -> &'static str {
    if change >= 0.0 {
        "rose"
    } else {
        "fell"
    }
}

/// Alert fired by reaching its target band.
pub fn price_alert_message(alert: &Alert, target: f64, price: f64) -> String {
    format!(
        "🔔 <b>ALERT!</b> {} reached {} (current: {})",
        escape(&alert.symbol),
        format_price(target),
        format_price(price)
    )
}

/// Alert fired by a percent move from its base.
pub fn percent_alert_message(alert: &Alert, base: f64, price: f64, change: f64) -> String {
    format!(
        "🔔 <b>ALERT!</b> {} {} by {:.2}% (from {} to {})",
        escape(&alert.symbol),
        moved(change),
        change.abs(),
        format_price(base),
        format_price(price)
    )
}

pub fn sharp_change_message(
    symbol: &str,
    change: f64,
    minutes: u64,
    from: f64,
    to: f64,
) -> String {
    let icon = if change >= 0.0 { "🚀" } else { "📉" };
    format!(
        "{icon} <b>{}</b> {} by {:.2}% in {}m (from {} to {})",
        escape(symbol),
        moved(change),
        change.abs(),
        minutes,
        format_price(from),
        format_price(to)
    )
}

pub fn stop_loss_message(call: &Call, price: f64) -> String {
    format!(
        "🛑 <b>STOP-LOSS!</b> Call <code>{}</code> ({} {}) closed by stop-loss: price {} reached {}\nP&amp;L: {}",
        call.id,
        escape(&call.symbol),
        call.direction.label(),
        format_price(price),
        format_price(call.stop_loss),
        format_change(call.pnl_percent)
    )
}

pub fn reminder_message(symbol: &str, text: &str) -> String {
    let mut msg = format!("⏰ Check the chart of {}", escape(symbol));
    if !text.is_empty() {
        msg.push_str(", ");
        msg.push_str(&escape(text));
    }
    msg
}

/// One line describing an alert's condition.
pub fn alert_line(alert: &Alert) -> String {
    let condition = match alert.condition {
        AlertCondition::Price { target } => format!("price {}", format_price(target)),
        AlertCondition::Percent { target_pct, base } => format!(
            "{} from {}",
            format_change(target_pct),
            format_price(base)
        ),
    };
    format!(
        "<code>{}</code> {} {}",
        alert.id,
        escape(&alert.symbol),
        condition
    )
}

pub fn alert_list(alerts: &[Alert]) -> String {
    if alerts.is_empty() {
        return "No active alerts.".to_string();
    }
    let mut msg = String::from("<b>Active alerts</b>\n");
    for alert in alerts {
        msg.push('\n');
        msg.push_str(&alert_line(alert));
    }
    msg
}

/// Current price followed by the 15m/1h/4h/24h changes.
pub fn price_info_message(symbol: &str, info: &PriceInfo) -> String {
    let mut msg = format!(
        "<b>{}</b>: {} ({})",
        escape(symbol),
        format_price(info.quote.price),
        info.quote.source
    );
    for (window, change) in info.changes() {
        let change = change.map(format_change).unwrap_or_else(|| "n/a".to_string());
        msg.push_str(&format!("\n{window}: {change}"));
    }
    msg
}

/// An open call valued at `price`.
pub fn open_call_line(call: &Call, price: Option<f64>) -> String {
    let mut line = format!(
        "<code>{}</code> {} {} @ {} size {:.0}%",
        call.id,
        escape(&call.symbol),
        call.direction.label(),
        format_price(call.entry_price),
        call.size
    );
    if call.deposit_percent > 0.0 {
        line.push_str(&format!(" dep {:.1}%", call.deposit_percent));
    }
    if call.has_stop_loss() {
        line.push_str(&format!(" SL {}", format_price(call.stop_loss)));
    }
    match price {
        Some(price) => {
            line.push_str(&format!(
                "\n    now {} P&amp;L {}",
                format_price(price),
                format_change(call.unrealized_pnl(price))
            ));
            if call.deposit_percent > 0.0 {
                line.push_str(&format!(
                    " (deposit {})",
                    format_change(call.deposit_contribution(price))
                ));
            }
        }
        None => line.push_str("\n    price unavailable"),
    }
    line
}

pub fn closed_call_message(call: &Call, closed_size: f64) -> String {
    if call.is_open() {
        format!(
            "Call <code>{}</code> ({}) partially closed: {:.0}% at {}, P&amp;L {}. Remaining size {:.0}%",
            call.id,
            escape(&call.symbol),
            closed_size,
            format_price(call.exit_price),
            format_change(call.pnl_percent),
            call.size
        )
    } else {
        format!(
            "Call <code>{}</code> ({} {}) closed at {}, P&amp;L {}",
            call.id,
            escape(&call.symbol),
            call.direction.label(),
            format_price(call.exit_price),
            format_change(call.pnl_percent)
        )
    }
}

pub fn user_stats_message(stats: &UserStats) -> String {
    format!(
        "<b>Your call stats (90 days)</b>\n\
         Calls: {} (closed {}, wins {})\n\
         Win rate: {:.1}%\n\
         Total P&amp;L: {}\n\
         Average: {}\n\
         Best: {} Worst: {}\n\
         Deposit: {:.2} ({})",
        stats.total_calls,
        stats.closed_calls,
        stats.winning_calls,
        stats.win_rate,
        format_change(stats.total_pnl),
        format_change(stats.avg_pnl),
        format_change(stats.best_pnl),
        format_change(stats.worst_pnl),
        stats.deposit.current,
        format_change(stats.deposit.return_percent())
    )
}

pub fn leaderboard_line(rank: usize, stats: &UserStats, open_calls: usize) -> String {
    format!(
        "{}. {} deposit {} | closed {} win {:.0}% | open {}",
        rank,
        escape(&stats.username),
        format_change(stats.deposit.return_percent()),
        stats.closed_calls,
        stats.win_rate,
        open_calls
    )
}

pub fn symbol_trades_line(trades: &SymbolTrades) -> String {
    format!(
        "{}: {} calls, closed {}, win {:.0}%, P&amp;L {}",
        escape(&trades.symbol),
        trades.total_calls,
        trades.closed_calls,
        trades.win_rate,
        format_change(trades.total_pnl)
    )
}

pub fn symbol_activity_line(activity: &SymbolActivity) -> String {
    format!(
        "{}: {} active, {} triggered",
        escape(&activity.symbol),
        activity.active_alerts,
        activity.total_triggers
    )
}

pub fn trigger_line(trigger: &AlertTrigger) -> String {
    let kind = match trigger.kind {
        TriggerKind::SharpChange => "⚡",
        TriggerKind::Price | TriggerKind::Percent => "🔔",
    };
    format!(
        "{} {} {} {} at {}",
        trigger.triggered_at.format("%m-%d %H:%M"),
        kind,
        escape(&trigger.symbol),
        trigger.kind.label(),
        format_price(trigger.price)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn alert(condition: AlertCondition) -> Alert {
        Alert {
            id: "0a1b2c3d".to_string(),
            chat_id: 1,
            user_id: 1,
            username: "trader".to_string(),
            symbol: "BTCUSDT".to_string(),
            condition,
            source: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_alert_messages() {
        let a = alert(AlertCondition::Price { target: 100.0 });
        assert_eq!(
            price_alert_message(&a, 100.0, 99.6),
            "🔔 <b>ALERT!</b> BTCUSDT reached 100 (current: 99.6)"
        );
        assert_eq!(
            percent_alert_message(&a, 200.0, 180.0, -10.0),
            "🔔 <b>ALERT!</b> BTCUSDT fell by 10.00% (from 200 to 180)"
        );
    }

    #[test]
    fn test_sharp_change_message() {
        assert_eq!(
            sharp_change_message("ETHUSDT", 5.5, 15, 100.0, 105.5),
            "🚀 <b>ETHUSDT</b> rose by 5.50% in 15m (from 100 to 105.5)"
        );
    }

    #[test]
    fn test_reminder_message_escapes_text() {
        assert_eq!(reminder_message("BTCUSDT", ""), "⏰ Check the chart of BTCUSDT");
        assert_eq!(
            reminder_message("BTCUSDT", "a<b"),
            "⏰ Check the chart of BTCUSDT, a&lt;b"
        );
    }

    #[test]
    fn test_alert_list() {
        assert_eq!(alert_list(&[]), "No active alerts.");
        let list = alert_list(&[alert(AlertCondition::Percent {
            target_pct: 5.0,
            base: 10.0,
        })]);
        assert!(list.ends_with("<code>0a1b2c3d</code> BTCUSDT +5.00% from 10"));
    }
}
