//! Paper positions and the per-user virtual deposit.

use super::{decode_error, source_columns, Database, DbError, DbResult};
use chrono::{DateTime, Utc};
use pricewatch_core::{Call, CallStatus, Deposit, Direction, PriceSource, FULL_CALL_SIZE};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

pub(crate) const CALL_COLUMNS: &str = "id, user_id, username, chat_id, symbol, exchange, market, direction, entry_price, size, deposit_percent, stop_loss_price, status, exit_price, pnl_percent, opened_at, closed_at";

/// Call fields supplied by the opening command.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub user_id: i64,
    pub username: String,
    pub chat_id: i64,
    pub symbol: String,
    pub source: Option<PriceSource>,
    pub direction: Direction,
    pub entry_price: f64,
    pub deposit_percent: f64,
    /// Zero for none.
    pub stop_loss: f64,
}

pub(crate) fn call_from_row(row: &SqliteRow) -> Result<Call, sqlx::Error> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;
    let exchange: String = row.try_get("exchange")?;
    let market: String = row.try_get("market")?;
    let closed_at: Option<DateTime<Utc>> = row.try_get("closed_at")?;

    Ok(Call {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        chat_id: row.try_get("chat_id")?,
        symbol: row.try_get("symbol")?,
        source: PriceSource::from_names(&exchange, &market),
        direction: Direction::from_name(&direction)
            .ok_or_else(|| decode_error("direction", &direction))?,
        entry_price: row.try_get("entry_price")?,
        size: row.try_get("size")?,
        deposit_percent: row.try_get("deposit_percent")?,
        stop_loss: row.try_get("stop_loss_price")?,
        status: CallStatus::from_name(&status).ok_or_else(|| decode_error("status", &status))?,
        exit_price: row.try_get("exit_price")?,
        pnl_percent: row.try_get("pnl_percent")?,
        opened_at: row.try_get("opened_at")?,
        closed_at,
    })
}

async fn fetch_call(
    conn: &mut SqliteConnection,
    id: &str,
    user_id: i64,
) -> Result<Option<Call>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {CALL_COLUMNS} FROM calls WHERE id = ? AND user_id = ?"
    ))
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(call_from_row).transpose()
}

async fn fetch_deposit(conn: &mut SqliteConnection, user_id: i64) -> Result<Deposit, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO user_deposits (user_id) VALUES (?)")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    let (initial, current) = sqlx::query_as::<_, (f64, f64)>(
        "SELECT initial_deposit, current_deposit FROM user_deposits WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Deposit {
        user_id,
        initial,
        current,
    })
}

async fn store_deposit(
    conn: &mut SqliteConnection,
    user_id: i64,
    current: f64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO user_deposits (user_id, current_deposit) VALUES (?, ?)
        ON CONFLICT(user_id) DO UPDATE SET current_deposit = excluded.current_deposit, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(user_id)
    .bind(current)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl Database {
    /// Open a call at full size.
    pub async fn open_call(&self, new: NewCall) -> DbResult<Call> {
        let id = self.unused_id("calls").await?;
        let (exchange, market) = source_columns(new.source);

        let opened_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            INSERT INTO calls (id, user_id, username, chat_id, symbol, exchange, market, direction, entry_price, size, deposit_percent, stop_loss_price, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'open')
            RETURNING opened_at
            "#,
        )
        .bind(&id)
        .bind(new.user_id)
        .bind(&new.username)
        .bind(new.chat_id)
        .bind(&new.symbol)
        .bind(exchange)
        .bind(market)
        .bind(new.direction.as_str())
        .bind(new.entry_price)
        .bind(FULL_CALL_SIZE)
        .bind(new.deposit_percent)
        .bind(new.stop_loss)
        .fetch_one(&self.pool)
        .await?;

        info!(call_id = %id, symbol = %new.symbol, user_id = new.user_id, direction = new.direction.as_str(), entry = new.entry_price, "Call opened");

        Ok(Call {
            id,
            user_id: new.user_id,
            username: new.username,
            chat_id: new.chat_id,
            symbol: new.symbol,
            source: new.source,
            direction: new.direction,
            entry_price: new.entry_price,
            size: FULL_CALL_SIZE,
            deposit_percent: new.deposit_percent,
            stop_loss: new.stop_loss,
            status: CallStatus::Open,
            exit_price: 0.0,
            pnl_percent: 0.0,
            opened_at,
            closed_at: None,
        })
    }

    /// A call owned by `user_id`, open or closed.
    pub async fn call_by_id(&self, id: &str, user_id: i64) -> DbResult<Option<Call>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_call(&mut *conn, id, user_id).await?)
    }

    /// Calls of a user, newest first.
    pub async fn calls_by_user(&self, user_id: i64, only_open: bool) -> DbResult<Vec<Call>> {
        let filter = if only_open { " AND status = 'open'" } else { "" };
        let rows = sqlx::query(&format!(
            "SELECT {CALL_COLUMNS} FROM calls WHERE user_id = ?{filter} ORDER BY opened_at DESC, rowid DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(call_from_row).collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    /// Every open call, oldest first.
    pub async fn all_open_calls(&self) -> DbResult<Vec<Call>> {
        let rows = sqlx::query(&format!(
            "SELECT {CALL_COLUMNS} FROM calls WHERE status = 'open' ORDER BY opened_at, rowid"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(call_from_row).collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    /// Open calls on one symbol, oldest first.
    pub async fn open_calls_by_symbol(&self, symbol: &str) -> DbResult<Vec<Call>> {
        let rows = sqlx::query(&format!(
            "SELECT {CALL_COLUMNS} FROM calls WHERE symbol = ? AND status = 'open' ORDER BY opened_at, rowid"
        ))
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(call_from_row).collect::<Result<Vec<_>, sqlx::Error>>()?)
    }

    /// Set or clear (0) the stop-loss of an open call.
    pub async fn update_stop_loss(&self, id: &str, user_id: i64, price: f64) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE calls SET stop_loss_price = ? WHERE id = ? AND user_id = ? AND status = 'open'",
        )
        .bind(price)
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::CallNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Close `size` units of an open call at `exit_price`.
    ///
    /// The deposit adjustment and the call update commit together.
    /// Returns the call as stored after the close.
    pub async fn close_call(
        &self,
        id: &str,
        user_id: i64,
        exit_price: f64,
        size: f64,
    ) -> DbResult<Call> {
        let mut tx = self.pool.begin().await?;

        let call = fetch_call(&mut *tx, id, user_id)
            .await?
            .ok_or_else(|| DbError::CallNotFound(id.to_string()))?;
        let plan = call.plan_close(size, exit_price)?;

        if plan.closed_deposit_percent > 0.0 {
            let deposit = fetch_deposit(&mut *tx, user_id).await?;
            let updated = plan.apply_to_deposit(deposit.current);
            store_deposit(&mut *tx, user_id, updated).await?;
            debug!(user_id = user_id, before = deposit.current, after = updated, "Deposit adjusted");
        }

        if plan.fully_closed {
            sqlx::query(
                r#"
                UPDATE calls
                SET exit_price = ?, pnl_percent = ?, size = 0, status = 'closed', closed_at = CURRENT_TIMESTAMP
                WHERE id = ? AND user_id = ?
                "#,
            )
            .bind(plan.exit_price)
            .bind(plan.pnl_percent)
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                "UPDATE calls SET exit_price = ?, pnl_percent = ?, size = ? WHERE id = ? AND user_id = ?",
            )
            .bind(plan.exit_price)
            .bind(plan.pnl_percent)
            .bind(plan.remaining_size)
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }

        let updated = fetch_call(&mut *tx, id, user_id)
            .await?
            .ok_or_else(|| DbError::CallNotFound(id.to_string()))?;
        tx.commit().await?;

        info!(
            call_id = %id,
            symbol = %updated.symbol,
            closed_size = plan.closed_size,
            remaining = plan.remaining_size,
            pnl = plan.pnl_percent,
            "Call closed"
        );
        Ok(updated)
    }

    /// Deposit of a user, created at the default balance on first use.
    pub async fn deposit(&self, user_id: i64) -> DbResult<Deposit> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_deposit(&mut *conn, user_id).await?)
    }

    pub async fn update_deposit(&self, user_id: i64, current: f64) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        Ok(store_deposit(&mut *conn, user_id, current).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pricewatch_core::{CallError, DEFAULT_DEPOSIT};

    fn long_call(user_id: i64, symbol: &str, entry: f64) -> NewCall {
        NewCall {
            user_id,
            username: "trader".to_string(),
            chat_id: user_id,
            symbol: symbol.to_string(),
            source: None,
            direction: Direction::Long,
            entry_price: entry,
            deposit_percent: 0.0,
            stop_loss: 0.0,
        }
    }

    #[tokio::test]
    async fn test_open_and_get_call() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let call = db.open_call(long_call(7, "BTCUSDT", 100.0)).await.unwrap();
        assert_eq!(call.size, FULL_CALL_SIZE);

        let stored = db.call_by_id(&call.id, 7).await.unwrap().unwrap();
        assert_eq!(stored, call);
        assert_eq!(db.call_by_id(&call.id, 8).await.unwrap(), None);
        assert_eq!(db.all_monitored_symbols().await.unwrap(), vec!["BTCUSDT"]);
    }

    #[tokio::test]
    async fn test_partial_then_full_close() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let call = db.open_call(long_call(7, "BTCUSDT", 100.0)).await.unwrap();

        let partial = db.close_call(&call.id, 7, 110.0, 40.0).await.unwrap();
        assert_eq!(partial.size, 60.0);
        assert_eq!(partial.status, CallStatus::Open);
        assert!((partial.pnl_percent - 10.0).abs() < 1e-9);

        let err = db.close_call(&call.id, 7, 110.0, 61.0).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::InvalidClose(CallError::InvalidCloseSize { .. })
        ));

        let closed = db.close_call(&call.id, 7, 90.0, 60.0).await.unwrap();
        assert_eq!(closed.size, 0.0);
        assert_eq!(closed.status, CallStatus::Closed);
        assert!(closed.closed_at.is_some());
        assert!(db.open_calls_by_symbol("BTCUSDT").await.unwrap().is_empty());
        assert!(db.all_monitored_symbols().await.unwrap().is_empty());

        let err = db.close_call(&call.id, 7, 90.0, 10.0).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidClose(CallError::AlreadyClosed(_))));
    }

    #[tokio::test]
    async fn test_close_updates_deposit() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let mut new = long_call(7, "ETHUSDT", 100.0);
        new.deposit_percent = 50.0;
        let call = db.open_call(new).await.unwrap();

        // Half the position at +10%: 25% of the deposit moves by 10%.
        db.close_call(&call.id, 7, 110.0, 50.0).await.unwrap();
        let deposit = db.deposit(7).await.unwrap();
        assert!((deposit.current - 102.5).abs() < 1e-9);
        assert_eq!(deposit.initial, DEFAULT_DEPOSIT);
    }

    #[tokio::test]
    async fn test_split_close_moves_deposit_like_full_close() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let mut new = long_call(7, "ETHUSDT", 100.0);
        new.deposit_percent = 50.0;
        let call = db.open_call(new).await.unwrap();

        // 40 then 60 at +10%: 20% then 30% of the deposit move by 10% each.
        db.close_call(&call.id, 7, 110.0, 40.0).await.unwrap();
        assert!((db.deposit(7).await.unwrap().current - 102.0).abs() < 1e-9);
        db.close_call(&call.id, 7, 110.0, 60.0).await.unwrap();
        assert!((db.deposit(7).await.unwrap().current - 105.06).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_close_unknown_call() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let err = db.close_call("deadbeef", 1, 1.0, 100.0).await.unwrap_err();
        assert!(matches!(err, DbError::CallNotFound(ref id) if id == "deadbeef"));
    }

    #[tokio::test]
    async fn test_update_stop_loss_only_open() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let call = db.open_call(long_call(7, "BTCUSDT", 100.0)).await.unwrap();

        db.update_stop_loss(&call.id, 7, 95.0).await.unwrap();
        assert_eq!(db.call_by_id(&call.id, 7).await.unwrap().unwrap().stop_loss, 95.0);

        assert!(db.update_stop_loss(&call.id, 8, 95.0).await.is_err());
        db.close_call(&call.id, 7, 100.0, 100.0).await.unwrap();
        assert!(matches!(
            db.update_stop_loss(&call.id, 7, 90.0).await,
            Err(DbError::CallNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_calls_by_user_filters() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let first = db.open_call(long_call(7, "BTCUSDT", 100.0)).await.unwrap();
        db.open_call(long_call(7, "ETHUSDT", 10.0)).await.unwrap();
        db.open_call(long_call(8, "ETHUSDT", 10.0)).await.unwrap();
        db.close_call(&first.id, 7, 100.0, 100.0).await.unwrap();

        assert_eq!(db.calls_by_user(7, false).await.unwrap().len(), 2);
        let open = db.calls_by_user(7, true).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].symbol, "ETHUSDT");
        assert_eq!(db.all_open_calls().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deposit_defaults_and_updates() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        assert_eq!(db.deposit(3).await.unwrap(), Deposit::new(3));

        db.update_deposit(3, 120.0).await.unwrap();
        let deposit = db.deposit(3).await.unwrap();
        assert_eq!(deposit.current, 120.0);
        assert!((deposit.return_percent() - 20.0).abs() < 1e-9);
    }
}
