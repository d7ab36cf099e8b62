//! Call statistics over a rolling window.
//!
//! Only calls sized against the deposit (deposit percent > 0) count toward
//! the leaderboard figures.

use super::calls::{call_from_row, CALL_COLUMNS};
use super::{Database, DbResult};
use pricewatch_core::{Call, Deposit, DEFAULT_DEPOSIT};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeMap;

/// Window of every statistic, in days.
pub const STATS_WINDOW_DAYS: i64 = 90;

const USER_STATS_SELECT: &str = r#"
    SELECT
        s.*,
        COALESCE(d.initial_deposit, ?) AS initial_deposit,
        COALESCE(d.current_deposit, ?) AS current_deposit
    FROM (
        SELECT
            user_id,
            MAX(username) AS username,
            COUNT(*) AS total_calls,
            SUM(CASE WHEN status = 'closed' THEN 1 ELSE 0 END) AS closed_calls,
            SUM(CASE WHEN status = 'closed' AND pnl_percent > 0 THEN 1 ELSE 0 END) AS winning_calls,
            TOTAL(CASE WHEN status = 'closed' THEN pnl_percent END) AS total_pnl,
            COALESCE(AVG(CASE WHEN status = 'closed' THEN pnl_percent END), 0.0) AS avg_pnl,
            COALESCE(MAX(CASE WHEN status = 'closed' THEN pnl_percent END), 0.0) AS best_pnl,
            COALESCE(MIN(CASE WHEN status = 'closed' THEN pnl_percent END), 0.0) AS worst_pnl
        FROM calls
        WHERE opened_at >= datetime('now', ? || ' days') AND deposit_percent > 0 {filter}
        GROUP BY user_id
    ) s
    LEFT JOIN user_deposits d ON d.user_id = s.user_id
"#;

/// Aggregate call performance of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub user_id: i64,
    pub username: String,
    pub total_calls: i64,
    pub closed_calls: i64,
    pub winning_calls: i64,
    pub total_pnl: f64,
    pub avg_pnl: f64,
    pub best_pnl: f64,
    pub worst_pnl: f64,
    pub win_rate: f64,
    pub deposit: Deposit,
}

impl UserStats {
    fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            username: String::new(),
            total_calls: 0,
            closed_calls: 0,
            winning_calls: 0,
            total_pnl: 0.0,
            avg_pnl: 0.0,
            best_pnl: 0.0,
            worst_pnl: 0.0,
            win_rate: 0.0,
            deposit: Deposit::new(user_id),
        }
    }
}

/// Per-symbol trade summary of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTrades {
    pub symbol: String,
    pub total_calls: i64,
    pub closed_calls: i64,
    pub winning_calls: i64,
    pub total_pnl: f64,
    pub win_rate: f64,
}

/// Active alerts and recent triggers on one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolActivity {
    pub symbol: String,
    pub active_alerts: i64,
    pub total_triggers: i64,
}

fn win_rate(winning: i64, closed: i64) -> f64 {
    if closed > 0 {
        winning as f64 / closed as f64 * 100.0
    } else {
        0.0
    }
}

fn user_stats_from_row(row: &SqliteRow) -> Result<UserStats, sqlx::Error> {
    let user_id: i64 = row.try_get("user_id")?;
    let closed_calls: i64 = row.try_get("closed_calls")?;
    let winning_calls: i64 = row.try_get("winning_calls")?;

    Ok(UserStats {
        user_id,
        username: row.try_get("username")?,
        total_calls: row.try_get("total_calls")?,
        closed_calls,
        winning_calls,
        total_pnl: row.try_get("total_pnl")?,
        avg_pnl: row.try_get("avg_pnl")?,
        best_pnl: row.try_get("best_pnl")?,
        worst_pnl: row.try_get("worst_pnl")?,
        win_rate: win_rate(winning_calls, closed_calls),
        deposit: Deposit {
            user_id,
            initial: row.try_get("initial_deposit")?,
            current: row.try_get("current_deposit")?,
        },
    })
}

impl Database {
    /// Statistics of one user; all zero when the user has no qualifying calls.
    pub async fn user_stats(&self, user_id: i64) -> DbResult<UserStats> {
        let row = sqlx::query(&USER_STATS_SELECT.replace("{filter}", "AND user_id = ?"))
            .bind(DEFAULT_DEPOSIT)
            .bind(DEFAULT_DEPOSIT)
            .bind(-STATS_WINDOW_DAYS)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(user_stats_from_row(&row)?),
            None => {
                let mut stats = UserStats::empty(user_id);
                stats.deposit = self.deposit(user_id).await?;
                Ok(stats)
            }
        }
    }

    /// Statistics of every user with qualifying calls, best total P&L first.
    pub async fn all_user_stats(&self) -> DbResult<Vec<UserStats>> {
        let sql = format!(
            "{} ORDER BY s.total_pnl DESC",
            USER_STATS_SELECT.replace("{filter}", "")
        );
        let rows = sqlx::query(&sql)
            .bind(DEFAULT_DEPOSIT)
            .bind(DEFAULT_DEPOSIT)
            .bind(-STATS_WINDOW_DAYS)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(user_stats_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    /// Trade summary per symbol for a user, ordered by symbol.
    pub async fn trades_by_symbol(&self, user_id: i64) -> DbResult<Vec<SymbolTrades>> {
        let rows = sqlx::query_as::<_, (String, i64, i64, i64, f64)>(
            r#"
            SELECT
                symbol,
                COUNT(*),
                SUM(CASE WHEN status = 'closed' THEN 1 ELSE 0 END),
                SUM(CASE WHEN status = 'closed' AND pnl_percent > 0 THEN 1 ELSE 0 END),
                TOTAL(CASE WHEN status = 'closed' THEN pnl_percent END)
            FROM calls
            WHERE user_id = ? AND opened_at >= datetime('now', ? || ' days') AND deposit_percent > 0
            GROUP BY symbol
            ORDER BY symbol
            "#,
        )
        .bind(user_id)
        .bind(-STATS_WINDOW_DAYS)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(symbol, total_calls, closed_calls, winning_calls, total_pnl)| SymbolTrades {
                    symbol,
                    total_calls,
                    closed_calls,
                    winning_calls,
                    total_pnl,
                    win_rate: win_rate(winning_calls, closed_calls),
                },
            )
            .collect())
    }

    /// Active alerts and triggers per symbol for a user, most active first.
    pub async fn symbol_activity(&self, user_id: i64) -> DbResult<Vec<SymbolActivity>> {
        let active = sqlx::query_as::<_, (String, i64)>(
            "SELECT symbol, COUNT(*) FROM alerts WHERE user_id = ? GROUP BY symbol",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let triggered = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT symbol, COUNT(*) FROM alert_triggers
            WHERE user_id = ? AND triggered_at >= datetime('now', ? || ' days')
            GROUP BY symbol
            "#,
        )
        .bind(user_id)
        .bind(-STATS_WINDOW_DAYS)
        .fetch_all(&self.pool)
        .await?;

        let mut by_symbol: BTreeMap<String, SymbolActivity> = BTreeMap::new();
        for (symbol, count) in active {
            let entry = by_symbol.entry(symbol.clone()).or_default();
            entry.symbol = symbol;
            entry.active_alerts = count;
        }
        for (symbol, count) in triggered {
            let entry = by_symbol.entry(symbol.clone()).or_default();
            entry.symbol = symbol;
            entry.total_triggers = count;
        }

        let mut activity: Vec<SymbolActivity> = by_symbol.into_values().collect();
        activity.sort_by(|a, b| b.active_alerts.cmp(&a.active_alerts));
        Ok(activity)
    }

    /// Best and worst closed call of a user within the window.
    pub async fn best_worst_calls(&self, user_id: i64) -> DbResult<(Option<Call>, Option<Call>)> {
        let mut picked = Vec::with_capacity(2);
        for order in ["DESC", "ASC"] {
            let row = sqlx::query(&format!(
                r#"
                SELECT {CALL_COLUMNS} FROM calls
                WHERE user_id = ? AND status = 'closed' AND opened_at >= datetime('now', ? || ' days')
                ORDER BY pnl_percent {order}
                LIMIT 1
                "#
            ))
            .bind(user_id)
            .bind(-STATS_WINDOW_DAYS)
            .fetch_optional(&self.pool)
            .await?;
            picked.push(row.as_ref().map(call_from_row).transpose()?);
        }

        let worst = picked.pop().flatten();
        let best = picked.pop().flatten();
        Ok((best, worst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewAlert, NewCall, NewTrigger};
    use pretty_assertions::assert_eq;
    use pricewatch_core::{AlertCondition, Direction, TriggerKind};

    async fn closed_call(db: &Database, user_id: i64, symbol: &str, exit: f64) -> Call {
        let call = db
            .open_call(NewCall {
                user_id,
                username: format!("user{user_id}"),
                chat_id: user_id,
                symbol: symbol.to_string(),
                source: None,
                direction: Direction::Long,
                entry_price: 100.0,
                deposit_percent: 10.0,
                stop_loss: 0.0,
            })
            .await
            .unwrap();
        db.close_call(&call.id, user_id, exit, 100.0).await.unwrap()
    }

    #[tokio::test]
    async fn test_user_stats() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        assert_eq!(db.user_stats(1).await.unwrap().total_calls, 0);

        closed_call(&db, 1, "BTCUSDT", 110.0).await;
        closed_call(&db, 1, "ETHUSDT", 95.0).await;

        let stats = db.user_stats(1).await.unwrap();
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.closed_calls, 2);
        assert_eq!(stats.winning_calls, 1);
        assert!((stats.total_pnl - 5.0).abs() < 1e-9);
        assert!((stats.best_pnl - 10.0).abs() < 1e-9);
        assert!((stats.worst_pnl + 5.0).abs() < 1e-9);
        assert!((stats.win_rate - 50.0).abs() < 1e-9);
        // 100 * 1.01 * 0.995
        assert!((stats.deposit.current - 100.495).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_user_stats_ordered_by_pnl() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        closed_call(&db, 1, "BTCUSDT", 101.0).await;
        closed_call(&db, 2, "BTCUSDT", 120.0).await;

        let all = db.all_user_stats().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].user_id, 2);
        assert_eq!(all[0].username, "user2");
        assert!((all[0].deposit.return_percent() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_trades_by_symbol_and_best_worst() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        closed_call(&db, 1, "ETHUSDT", 130.0).await;
        closed_call(&db, 1, "BTCUSDT", 90.0).await;
        closed_call(&db, 1, "BTCUSDT", 105.0).await;

        let trades = db.trades_by_symbol(1).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].symbol, "BTCUSDT");
        assert_eq!(trades[0].total_calls, 2);
        assert!((trades[0].win_rate - 50.0).abs() < 1e-9);

        let (best, worst) = db.best_worst_calls(1).await.unwrap();
        assert_eq!(best.unwrap().symbol, "ETHUSDT");
        assert!((worst.unwrap().pnl_percent + 10.0).abs() < 1e-9);
        assert_eq!(db.best_worst_calls(2).await.unwrap(), (None, None));
    }

    #[tokio::test]
    async fn test_symbol_activity() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        for symbol in ["ETHUSDT", "ETHUSDT", "BTCUSDT"] {
            db.add_alert(NewAlert {
                chat_id: 1,
                user_id: 1,
                username: "user1".to_string(),
                symbol: symbol.to_string(),
                condition: AlertCondition::Price { target: 1.0 },
                source: None,
            })
            .await
            .unwrap();
        }
        db.log_trigger(NewTrigger {
            alert_id: None,
            symbol: "SOLUSDT",
            price: 1.0,
            chat_id: 1,
            user_id: 1,
            username: "user1",
            kind: TriggerKind::SharpChange,
        })
        .await
        .unwrap();

        let activity = db.symbol_activity(1).await.unwrap();
        let summary: Vec<(&str, i64, i64)> = activity
            .iter()
            .map(|a| (a.symbol.as_str(), a.active_alerts, a.total_triggers))
            .collect();
        assert_eq!(
            summary,
            vec![("ETHUSDT", 2, 0), ("BTCUSDT", 1, 0), ("SOLUSDT", 0, 1)]
        );
    }
}
