//! Alert rows and the symbol registry queries built on them.

use super::{decode_error, short_id, source_columns, Database, DbResult};
use chrono::{DateTime, Utc};
use pricewatch_core::{Alert, AlertCondition, PriceSource};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

const ALERT_COLUMNS: &str = "id, chat_id, user_id, username, symbol, target_price, target_percent, base_price, exchange, market, created_at";

/// Alert fields supplied by the creating command.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub source: Option<PriceSource>,
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let condition = AlertCondition::from_columns(
        row.try_get("target_price")?,
        row.try_get("target_percent")?,
        row.try_get("base_price")?,
    )
    .ok_or_else(|| decode_error("alert condition", &id))?;
    let exchange: String = row.try_get("exchange")?;
    let market: String = row.try_get("market")?;

    Ok(Alert {
        id,
        chat_id: row.try_get("chat_id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        symbol: row.try_get("symbol")?,
        condition,
        source: PriceSource::from_names(&exchange, &market),
        created_at: row.try_get("created_at")?,
    })
}

impl Database {
    /// Insert a new alert under a fresh short ID.
    pub async fn add_alert(&self, new: NewAlert) -> DbResult<Alert> {
        let id = self.unused_id("alerts").await?;
        let (target_price, target_percent, base_price) = new.condition.to_columns();
        let (exchange, market) = source_columns(new.source);

        let created_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO alerts (id, chat_id, user_id, username, symbol, target_price, target_percent, base_price, exchange, market)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING created_at
            "#,
        )
        .bind(&id)
        .bind(new.chat_id)
        .bind(new.user_id)
        .bind(&new.username)
        .bind(&new.symbol)
        .bind(target_price)
        .bind(target_percent)
        .bind(base_price)
        .bind(exchange)
        .bind(market)
        .fetch_one(&self.pool)
        .await?;

        debug!(alert_id = %id, symbol = %new.symbol, chat_id = new.chat_id, "Alert stored");

        Ok(Alert {
            id,
            chat_id: new.chat_id,
            user_id: new.user_id,
            username: new.username,
            symbol: new.symbol,
            condition: new.condition,
            source: new.source,
            created_at,
        })
    }

    /// Overwrite the mutable fields of an alert. Returns false if it no longer exists.
    pub async fn update_alert(&self, alert: &Alert) -> DbResult<bool> {
        let (target_price, target_percent, base_price) = alert.condition.to_columns();
        let (exchange, market) = source_columns(alert.source);

        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET symbol = ?, target_price = ?, target_percent = ?, base_price = ?, exchange = ?, market = ?
            WHERE id = ?
            "#,
        )
        .bind(&alert.symbol)
        .bind(target_price)
        .bind(target_percent)
        .bind(base_price)
        .bind(exchange)
        .bind(market)
        .bind(&alert.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Alerts owned by a chat, oldest first.
    pub async fn alerts_by_chat(&self, chat_id: i64) -> DbResult<Vec<Alert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE chat_id = ? ORDER BY created_at, rowid"
        ))
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(alert_from_row).collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    /// Alerts on a symbol across all chats, oldest first.
    pub async fn alerts_by_symbol(&self, symbol: &str) -> DbResult<Vec<Alert>> {
        let rows = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE symbol = ? ORDER BY created_at, rowid"
        ))
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(alert_from_row).collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    /// Delete one alert of a chat. Returns whether a row was removed.
    pub async fn delete_alert(&self, chat_id: i64, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ? AND chat_id = ?")
            .bind(id)
            .bind(chat_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete an alert regardless of owner, used once it has fired.
    pub async fn delete_alert_by_id(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every alert of a chat. Returns the number removed.
    pub async fn delete_all_alerts(&self, chat_id: i64) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM alerts WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Sorted union of alert symbols and open call symbols.
    pub async fn all_monitored_symbols(&self) -> DbResult<Vec<String>> {
        let symbols = sqlx::query_scalar::<_, String>(
            r#"
            SELECT symbol FROM alerts
            UNION
            SELECT symbol FROM calls WHERE status = 'open'
            ORDER BY symbol
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(symbols)
    }

    /// Same union restricted to one chat.
    pub async fn symbols_for_chat(&self, chat_id: i64) -> DbResult<Vec<String>> {
        let symbols = sqlx::query_scalar::<_, String>(
            r#"
            SELECT symbol FROM alerts WHERE chat_id = ?
            UNION
            SELECT symbol FROM calls WHERE chat_id = ? AND status = 'open'
            ORDER BY symbol
            "#,
        )
        .bind(chat_id)
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(symbols)
    }

    /// Source recorded on the oldest alert for the symbol, else on the oldest open call.
    pub async fn preferred_source(&self, symbol: &str) -> DbResult<Option<PriceSource>> {
        let recorded = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT exchange, market FROM (
                SELECT exchange, market, 0 AS priority, created_at AS seen_at FROM alerts
                WHERE symbol = ? AND exchange != '' AND market != ''
                UNION ALL
                SELECT exchange, market, 1 AS priority, opened_at AS seen_at FROM calls
                WHERE symbol = ? AND status = 'open' AND exchange != '' AND market != ''
            )
            ORDER BY priority, seen_at
            "#,
        )
        .bind(symbol)
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        Ok(recorded
            .iter()
            .find_map(|(exchange, market)| PriceSource::from_names(exchange, market)))
    }

    /// A random short ID not yet used as a primary key of `table`.
    pub(crate) async fn unused_id(&self, table: &'static str) -> DbResult<String> {
        loop {
            let id = short_id();
            let taken = sqlx::query_scalar::<_, i64>(&format!(
                "SELECT COUNT(*) FROM {table} WHERE id = ?"
            ))
            .bind(&id)
            .fetch_one(&self.pool)
            .await?;
            if taken == 0 {
                return Ok(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pricewatch_core::{Exchange, MarketType};

    fn price_alert(chat_id: i64, symbol: &str, target: f64) -> NewAlert {
        NewAlert {
            chat_id,
            user_id: chat_id,
            username: "trader".to_string(),
            symbol: symbol.to_string(),
            condition: AlertCondition::Price { target },
            source: None,
        }
    }

    #[tokio::test]
    async fn test_add_and_list_alerts() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let source = PriceSource::new(Exchange::Bybit, MarketType::Futures);

        let mut new = price_alert(1, "BTCUSDT", 50000.0);
        new.source = Some(source);
        let alert = db.add_alert(new).await.unwrap();
        assert_eq!(alert.id.len(), 8);

        db.add_alert(NewAlert {
            condition: AlertCondition::Percent {
                target_pct: -5.0,
                base: 3000.0,
            },
            ..price_alert(2, "ETHUSDT", 0.0)
        })
        .await
        .unwrap();

        let mine = db.alerts_by_chat(1).await.unwrap();
        assert_eq!(mine, vec![alert.clone()]);
        assert_eq!(mine[0].source, Some(source));

        let eth = db.alerts_by_symbol("ETHUSDT").await.unwrap();
        assert_eq!(eth.len(), 1);
        assert_eq!(
            eth[0].condition,
            AlertCondition::Percent {
                target_pct: -5.0,
                base: 3000.0
            }
        );
    }

    #[tokio::test]
    async fn test_update_alert() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let mut alert = db.add_alert(price_alert(1, "BTCUSDT", 100.0)).await.unwrap();

        alert.condition = AlertCondition::Price { target: 120.0 };
        assert!(db.update_alert(&alert).await.unwrap());
        assert_eq!(db.alerts_by_chat(1).await.unwrap()[0].condition, alert.condition);

        db.delete_alert_by_id(&alert.id).await.unwrap();
        assert!(!db.update_alert(&alert).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_alert_checks_owner() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let alert = db.add_alert(price_alert(1, "BTCUSDT", 100.0)).await.unwrap();

        assert!(!db.delete_alert(2, &alert.id).await.unwrap());
        assert!(db.delete_alert(1, &alert.id).await.unwrap());
        assert!(!db.delete_alert(1, &alert.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_all_alerts() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        db.add_alert(price_alert(1, "BTCUSDT", 100.0)).await.unwrap();
        db.add_alert(price_alert(1, "ETHUSDT", 100.0)).await.unwrap();
        db.add_alert(price_alert(2, "ETHUSDT", 100.0)).await.unwrap();

        assert_eq!(db.delete_all_alerts(1).await.unwrap(), 2);
        assert_eq!(db.delete_all_alerts(1).await.unwrap(), 0);
        assert_eq!(db.alerts_by_chat(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_registry_follows_alert_changes() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        assert!(db.all_monitored_symbols().await.unwrap().is_empty());

        let eth = db.add_alert(price_alert(1, "ETHUSDT", 100.0)).await.unwrap();
        db.add_alert(price_alert(2, "BTCUSDT", 100.0)).await.unwrap();
        let eth_again = db.add_alert(price_alert(2, "ETHUSDT", 90.0)).await.unwrap();
        assert_eq!(
            db.all_monitored_symbols().await.unwrap(),
            vec!["BTCUSDT", "ETHUSDT"]
        );
        assert_eq!(db.symbols_for_chat(1).await.unwrap(), vec!["ETHUSDT"]);

        db.delete_alert(1, &eth.id).await.unwrap();
        assert_eq!(
            db.all_monitored_symbols().await.unwrap(),
            vec!["BTCUSDT", "ETHUSDT"]
        );
        db.delete_alert(2, &eth_again.id).await.unwrap();
        assert_eq!(db.all_monitored_symbols().await.unwrap(), vec!["BTCUSDT"]);
    }

    #[tokio::test]
    async fn test_preferred_source_prefers_alerts_with_source() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        assert_eq!(db.preferred_source("BTCUSDT").await.unwrap(), None);

        db.add_alert(price_alert(1, "BTCUSDT", 100.0)).await.unwrap();
        assert_eq!(db.preferred_source("BTCUSDT").await.unwrap(), None);

        let source = PriceSource::new(Exchange::Bitget, MarketType::Futures);
        let mut new = price_alert(2, "BTCUSDT", 100.0);
        new.source = Some(source);
        db.add_alert(new).await.unwrap();
        assert_eq!(db.preferred_source("BTCUSDT").await.unwrap(), Some(source));
    }
}
