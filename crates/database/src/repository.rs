use crate::batch::BatchTx;
use crate::rows::{self, LEDGER_COLUMNS, ORDER_COLUMNS, PORTFOLIO_COLUMNS, POSITION_COLUMNS};
use crate::DbError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use core_types::{
    FxBatch, FxRate, LedgerEntry, Order, OrderStatus, Portfolio, Position, PriceBatch, Recommendation, Signal, SignalBatch,
    Snapshot,
};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePool;

/// The `DbRepository` is the pool-level interface to the store.
///
/// Single statements and read models run directly against the pool. Work that
/// must be all-or-nothing goes through [`DbRepository::begin_batch`].
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: SqlitePool,
}

impl DbRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Opens the transaction a decision or settlement batch runs in.
    pub async fn begin_batch(&self) -> Result<BatchTx, DbError> {
        let tx = self.pool.begin().await?;
        Ok(BatchTx::new(tx))
    }

    /// Seeds the singleton portfolio row on first use and returns it.
    ///
    /// An existing row is left untouched, whatever `start_cash` says.
    pub async fn ensure_portfolio(&self, base_ccy: &str, start_cash: Decimal) -> Result<Portfolio, DbError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO portfolio (id, base_ccy, cash, equity, nav, leverage, peak_nav, dd_max, updated_at)
            VALUES (1, ?, ?, '0', ?, '0', ?, '0', ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(base_ccy)
        .bind(start_cash.to_string())
        .bind(start_cash.to_string())
        .bind(start_cash.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            tracing::info!(%base_ccy, %start_cash, "Seeded portfolio");
        }
        self.get_portfolio().await
    }

    pub async fn get_portfolio(&self) -> Result<Portfolio, DbError> {
        let sql = format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolio WHERE id = 1");
        let row = sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound("portfolio".to_string()))?;
        rows::portfolio(&row)
    }

    /// Stores a validated signal batch. Re-sending a (symbol, date, run) key
    /// replaces its payload and refreshes `ingested_at`.
    pub async fn upsert_signals(&self, batch: &SignalBatch) -> Result<usize, DbError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        for input in &batch.signals {
            let risk_blob = input.risk.as_ref().map(serde_json::to_string).transpose()?;
            sqlx::query(
                r#"
                INSERT INTO signals (symbol, as_of_date, model_run_id, action, weight, confidence, risk_blob, ingested_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, as_of_date, model_run_id) DO UPDATE SET
                    action = excluded.action,
                    weight = excluded.weight,
                    confidence = excluded.confidence,
                    risk_blob = excluded.risk_blob,
                    ingested_at = excluded.ingested_at
                "#,
            )
            .bind(&input.symbol)
            .bind(batch.as_of_date)
            .bind(&batch.model_run_id)
            .bind(&input.action)
            .bind(input.weight.to_string())
            .bind(input.confidence.to_string())
            .bind(risk_blob)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(batch.signals.len())
    }

    pub async fn upsert_prices(&self, batch: &PriceBatch) -> Result<usize, DbError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        for input in &batch.prices {
            let currency = input
                .currency
                .as_deref()
                .ok_or_else(|| DbError::Decode {
                    column: "prices.currency".to_string(),
                    reason: format!("{} has no currency", input.symbol),
                })?;
            sqlx::query(
                r#"
                INSERT INTO prices (symbol, as_of_date, open, currency, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(symbol, as_of_date) DO UPDATE SET
                    open = excluded.open,
                    currency = excluded.currency,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&input.symbol)
            .bind(batch.as_of_date)
            .bind(input.open.to_string())
            .bind(currency)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(batch.prices.len())
    }

    /// Appends one rate per quote, all stamped with `ts`.
    pub async fn insert_fx_rates(&self, batch: &FxBatch, ts: DateTime<Utc>) -> Result<usize, DbError> {
        let mut tx = self.pool.begin().await?;
        for (quote, rate) in &batch.rates {
            sqlx::query(
                r#"
                INSERT INTO fx_rates (base, quote, rate, provider, ts)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(base, quote, ts) DO UPDATE SET rate = excluded.rate, provider = excluded.provider
                "#,
            )
            .bind(&batch.base)
            .bind(quote)
            .bind(rate.to_string())
            .bind(&batch.provider)
            .bind(ts)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(batch.rates.len())
    }

    /// Most recent base -> quote observation, if any was ever ingested.
    pub async fn latest_fx_rate(&self, base: &str, quote: &str) -> Result<Option<FxRate>, DbError> {
        let row = sqlx::query(
            "SELECT base, quote, rate, provider, ts FROM fx_rates WHERE base = ? AND quote = ? ORDER BY ts DESC LIMIT 1",
        )
        .bind(base)
        .bind(quote)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| rows::fx_rate(&r)).transpose()
    }

    pub async fn signals_for(&self, date: NaiveDate) -> Result<Vec<Signal>, DbError> {
        let records = sqlx::query(
            r#"
            SELECT symbol, as_of_date, model_run_id, action, weight, confidence, risk_blob
            FROM signals
            WHERE as_of_date = ?
            ORDER BY symbol ASC, ingested_at DESC, id DESC
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        records.iter().map(rows::signal).collect()
    }

    pub async fn recommendations_for(&self, date: NaiveDate) -> Result<Vec<Recommendation>, DbError> {
        let records = sqlx::query(
            "SELECT symbol, as_of_date, stance, rationale FROM recommendations WHERE as_of_date = ? ORDER BY symbol",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        records.iter().map(rows::recommendation).collect()
    }

    pub async fn open_positions(&self) -> Result<Vec<Position>, DbError> {
        let sql = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE status = 'open' ORDER BY symbol");
        let records = sqlx::query(&sql).fetch_all(&self.pool).await?;
        records.iter().map(rows::position).collect()
    }

    /// Every position ever held, newest first.
    pub async fn all_positions(&self) -> Result<Vec<Position>, DbError> {
        let sql = format!("SELECT {POSITION_COLUMNS} FROM positions ORDER BY id DESC");
        let records = sqlx::query(&sql).fetch_all(&self.pool).await?;
        records.iter().map(rows::position).collect()
    }

    pub async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, DbError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE status = ? ORDER BY id");
        let records = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        records.iter().map(rows::order).collect()
    }

    pub async fn get_order(&self, order_id: i64) -> Result<Order, DbError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("order {order_id}")))?;
        rows::order(&row)
    }

    /// Ledger entries in append order, optionally only those for one order.
    pub async fn ledger_entries(&self, order_id: Option<i64>) -> Result<Vec<LedgerEntry>, DbError> {
        let records = match order_id {
            Some(id) => {
                let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger WHERE order_id = ? ORDER BY id");
                sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!("SELECT {LEDGER_COLUMNS} FROM ledger ORDER BY id");
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        records.iter().map(rows::ledger_entry).collect()
    }

    pub async fn snapshot_for(&self, date: NaiveDate) -> Result<Option<Snapshot>, DbError> {
        let row = sqlx::query("SELECT as_of_date, nav, cash, equity, positions FROM snapshots WHERE as_of_date = ?")
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| rows::snapshot(&r)).transpose()
    }

    /// Claims the settlement lock for `exec_date`.
    ///
    /// Returns `false` when another holder owns a lock younger than `lease`.
    /// An older lock is taken over, since its holder is assumed dead.
    pub async fn try_acquire_settlement_lock(
        &self,
        exec_date: NaiveDate,
        holder: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, DbError> {
        let inserted = sqlx::query(
            "INSERT INTO settlement_locks (exec_date, holder, acquired_at) VALUES (?, ?, ?) ON CONFLICT(exec_date) DO NOTHING",
        )
        .bind(exec_date)
        .bind(holder)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 1 {
            return Ok(true);
        }

        let stale_before = now - lease;
        let taken_over = sqlx::query(
            "UPDATE settlement_locks SET holder = ?, acquired_at = ? WHERE exec_date = ? AND acquired_at < ?",
        )
        .bind(holder)
        .bind(now)
        .bind(exec_date)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        if taken_over.rows_affected() == 1 {
            tracing::warn!(%exec_date, holder, "Took over an expired settlement lock");
            return Ok(true);
        }
        Ok(false)
    }

    /// Releases the lock if `holder` still owns it.
    pub async fn release_settlement_lock(&self, exec_date: NaiveDate, holder: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM settlement_locks WHERE exec_date = ? AND holder = ?")
            .bind(exec_date)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
