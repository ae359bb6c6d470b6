use crate::rows::{self, ORDER_COLUMNS, PORTFOLIO_COLUMNS, POSITION_COLUMNS};
use crate::DbError;
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{LedgerEntry, Order, OrderDraft, Portfolio, Position, PriceBar, Rationale, Signal, Snapshot, Stance};
use rust_decimal::Decimal;
use sqlx::{Sqlite, Transaction};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

/// One all-or-nothing unit of work against the store.
///
/// Every read and write of a decision or settlement batch goes through the
/// same transaction. Nothing is visible to other connections until
/// [`BatchTx::commit`]; dropping the value without committing rolls back.
pub struct BatchTx {
    tx: Transaction<'static, Sqlite>,
}

impl BatchTx {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx }
    }

    pub async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub async fn load_portfolio(&mut self) -> Result<Portfolio, DbError> {
        let sql = format!("SELECT {PORTFOLIO_COLUMNS} FROM portfolio WHERE id = 1");
        let row = sqlx::query(&sql)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| DbError::NotFound("portfolio".to_string()))?;
        rows::portfolio(&row)
    }

    pub async fn save_portfolio(&mut self, portfolio: &Portfolio) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE portfolio
            SET cash = ?, equity = ?, nav = ?, leverage = ?, peak_nav = ?, dd_max = ?, updated_at = ?
            WHERE id = 1
            "#,
        )
        .bind(portfolio.cash.to_string())
        .bind(portfolio.equity.to_string())
        .bind(portfolio.nav.to_string())
        .bind(portfolio.leverage.to_string())
        .bind(portfolio.peak_nav.to_string())
        .bind(portfolio.dd_max.to_string())
        .bind(portfolio.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Signals dated `date`, one per symbol, in symbol order.
    ///
    /// When several model runs delivered a signal for the same symbol, the most
    /// recently ingested one wins.
    pub async fn load_signals(&mut self, date: NaiveDate) -> Result<Vec<Signal>, DbError> {
        let records = sqlx::query(
            r#"
            SELECT symbol, as_of_date, model_run_id, action, weight, confidence, risk_blob
            FROM signals
            WHERE as_of_date = ?
            ORDER BY symbol ASC, ingested_at DESC, id DESC
            "#,
        )
        .bind(date)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut latest: BTreeMap<String, Signal> = BTreeMap::new();
        for record in &records {
            let signal = rows::signal(record)?;
            latest.entry(signal.symbol.clone()).or_insert(signal);
        }
        Ok(latest.into_values().collect())
    }

    /// The most recent stance per symbol recorded strictly before `date`.
    pub async fn load_previous_stances(&mut self, date: NaiveDate) -> Result<HashMap<String, Stance>, DbError> {
        let records = sqlx::query(
            r#"
            SELECT r.symbol, r.stance
            FROM recommendations r
            WHERE r.as_of_date = (
                SELECT MAX(p.as_of_date) FROM recommendations p
                WHERE p.symbol = r.symbol AND p.as_of_date < ?
            )
            "#,
        )
        .bind(date)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut stances = HashMap::with_capacity(records.len());
        for record in &records {
            let symbol: String = sqlx::Row::try_get(record, "symbol")?;
            let raw: String = sqlx::Row::try_get(record, "stance")?;
            stances.insert(symbol, Stance::from_str(&raw)?);
        }
        Ok(stances)
    }

    /// Open positions keyed by symbol.
    pub async fn load_open_positions(&mut self) -> Result<HashMap<String, Position>, DbError> {
        let sql = format!("SELECT {POSITION_COLUMNS} FROM positions WHERE status = 'open'");
        let records = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;
        records
            .iter()
            .map(|r| rows::position(r).map(|p| (p.symbol.clone(), p)))
            .collect()
    }

    pub async fn latest_fx_rate(&mut self, base: &str, quote: &str) -> Result<Option<Decimal>, DbError> {
        let row = sqlx::query("SELECT rate FROM fx_rates WHERE base = ? AND quote = ? ORDER BY ts DESC LIMIT 1")
            .bind(base)
            .bind(quote)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|r| rows::decimal(&r, "rate")).transpose()
    }

    /// Currency of the symbol's most recent price on or before `date`.
    pub async fn latest_price_currency(&mut self, symbol: &str, date: NaiveDate) -> Result<Option<String>, DbError> {
        let currency = sqlx::query_scalar::<_, String>(
            "SELECT currency FROM prices WHERE symbol = ? AND as_of_date <= ? ORDER BY as_of_date DESC LIMIT 1",
        )
        .bind(symbol)
        .bind(date)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(currency)
    }

    /// Opening prices dated exactly `date`, keyed by symbol.
    pub async fn load_prices(&mut self, date: NaiveDate) -> Result<HashMap<String, PriceBar>, DbError> {
        let records = sqlx::query("SELECT symbol, as_of_date, open, currency FROM prices WHERE as_of_date = ?")
            .bind(date)
            .fetch_all(&mut *self.tx)
            .await?;
        records
            .iter()
            .map(|r| rows::price_bar(r).map(|p| (p.symbol.clone(), p)))
            .collect()
    }

    pub async fn upsert_recommendation(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        stance: Stance,
        rationale: &Rationale,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let rationale = serde_json::to_string(rationale)?;
        sqlx::query(
            r#"
            INSERT INTO recommendations (symbol, as_of_date, stance, rationale, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(symbol, as_of_date) DO UPDATE SET
                stance = excluded.stance,
                rationale = excluded.rationale,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(symbol)
        .bind(date)
        .bind(stance.as_str())
        .bind(rationale)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Drops orders staged for `decision_date` that have not been filled yet.
    pub async fn delete_new_orders_for_decision(&mut self, decision_date: NaiveDate) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM orders WHERE status = 'new' AND decision_date = ?")
            .bind(decision_date)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn symbols_with_filled_orders_for_decision(
        &mut self,
        decision_date: NaiveDate,
    ) -> Result<HashSet<String>, DbError> {
        let symbols = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT symbol FROM orders WHERE status = 'filled' AND decision_date = ?",
        )
        .bind(decision_date)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(symbols.into_iter().collect())
    }

    pub async fn insert_order(
        &mut self,
        draft: &OrderDraft,
        decision_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (symbol, side, qty, notional_ccy, currency, fx_to_base, status, origin, decision_date, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'new', ?, ?, ?)
            "#,
        )
        .bind(&draft.symbol)
        .bind(draft.side.as_str())
        .bind(draft.qty.to_string())
        .bind(draft.notional_ccy.to_string())
        .bind(&draft.currency)
        .bind(draft.fx_to_base.to_string())
        .bind(draft.origin.as_str())
        .bind(decision_date)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Orders awaiting settlement, oldest first.
    pub async fn load_new_orders(&mut self) -> Result<Vec<Order>, DbError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'new' ORDER BY id ASC");
        let records = sqlx::query(&sql).fetch_all(&mut *self.tx).await?;
        records.iter().map(rows::order).collect()
    }

    /// Moves an order from `new` to `filled`.
    ///
    /// Returns `false` if the order was no longer `new`, which means another
    /// writer settled it first.
    pub async fn mark_order_filled(
        &mut self,
        order_id: i64,
        qty: Decimal,
        fill_price: Decimal,
        fee_base: Decimal,
        filled_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'filled', qty = ?, fill_price = ?, fee_base = ?, filled_at = ?
            WHERE id = ? AND status = 'new'
            "#,
        )
        .bind(qty.to_string())
        .bind(fill_price.to_string())
        .bind(fee_base.to_string())
        .bind(filled_at)
        .bind(order_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Inserts a new position and returns its id. `position.id` is ignored.
    pub async fn insert_position(&mut self, position: &Position) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO positions (symbol, qty, avg_cost_ccy, currency, fx_to_base, cost_base, status, opened_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.symbol)
        .bind(position.qty.to_string())
        .bind(position.avg_cost_ccy.to_string())
        .bind(&position.currency)
        .bind(position.fx_to_base.to_string())
        .bind(position.cost_base.to_string())
        .bind(position.status.as_str())
        .bind(position.opened_at)
        .bind(position.closed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_position(&mut self, position: &Position) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET qty = ?, avg_cost_ccy = ?, fx_to_base = ?, cost_base = ?, status = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(position.qty.to_string())
        .bind(position.avg_cost_ccy.to_string())
        .bind(position.fx_to_base.to_string())
        .bind(position.cost_base.to_string())
        .bind(position.status.as_str())
        .bind(position.closed_at)
        .bind(position.id)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("position {}", position.id)));
        }
        Ok(())
    }

    /// Appends a ledger row and returns its id. `entry.id` is ignored.
    pub async fn append_ledger(&mut self, entry: &LedgerEntry) -> Result<i64, DbError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger (ts, entry_type, order_id, symbol, debit_base, credit_base, balance_after, fee_base, note)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.ts)
        .bind(&entry.entry_type)
        .bind(entry.order_id)
        .bind(entry.symbol.as_deref())
        .bind(entry.debit_base.to_string())
        .bind(entry.credit_base.to_string())
        .bind(entry.balance_after.to_string())
        .bind(entry.fee_base.to_string())
        .bind(&entry.note)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn upsert_snapshot(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) -> Result<(), DbError> {
        let positions = serde_json::to_string(&snapshot.positions)?;
        sqlx::query(
            r#"
            INSERT INTO snapshots (as_of_date, nav, cash, equity, positions, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(as_of_date) DO UPDATE SET
                nav = excluded.nav,
                cash = excluded.cash,
                equity = excluded.equity,
                positions = excluded.positions,
                created_at = excluded.created_at
            "#,
        )
        .bind(snapshot.as_of_date)
        .bind(snapshot.nav.to_string())
        .bind(snapshot.cash.to_string())
        .bind(snapshot.equity.to_string())
        .bind(positions)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}
