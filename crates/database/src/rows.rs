//! Row decoding shared by the repository and the batch transaction.
//!
//! Decimals live in TEXT columns; they are parsed here so a corrupt value
//! surfaces as `DbError::Decode` naming the column instead of a panic.

use crate::error::DbError;
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{
    FxRate, LedgerEntry, Order, OrderSide, OrderStatus, Portfolio, Position, PositionStatus, PriceBar, Recommendation,
    Signal, Snapshot, Stance,
};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;

pub(crate) fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal, DbError> {
    let raw: String = row.try_get(column)?;
    parse_decimal(column, &raw)
}

pub(crate) fn opt_decimal(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, DbError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| parse_decimal(column, &s)).transpose()
}

fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, DbError> {
    Decimal::from_str(raw).map_err(|e| DbError::Decode {
        column: column.to_string(),
        reason: format!("'{raw}': {e}"),
    })
}

fn parsed<T>(row: &SqliteRow, column: &str) -> Result<T, DbError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    T::from_str(&raw).map_err(|e| DbError::Decode {
        column: column.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn signal(row: &SqliteRow) -> Result<Signal, DbError> {
    let risk_blob: Option<String> = row.try_get("risk_blob")?;
    let risk = match risk_blob.as_deref() {
        Some(json) if !json.is_empty() => {
            match serde_json::from_str::<HashMap<String, serde_json::Value>>(json) {
                Ok(map) => core_types::RiskSnapshot::from_map(&map),
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable risk map; treating all metrics as zero");
                    core_types::RiskSnapshot::default()
                }
            }
        }
        _ => core_types::RiskSnapshot::default(),
    };
    Ok(Signal {
        symbol: row.try_get("symbol")?,
        as_of_date: row.try_get::<NaiveDate, _>("as_of_date")?,
        model_run_id: row.try_get("model_run_id")?,
        action: row.try_get("action")?,
        weight: decimal(row, "weight")?,
        confidence: decimal(row, "confidence")?,
        risk,
    })
}

pub(crate) fn recommendation(row: &SqliteRow) -> Result<Recommendation, DbError> {
    let rationale: String = row.try_get("rationale")?;
    Ok(Recommendation {
        symbol: row.try_get("symbol")?,
        as_of_date: row.try_get("as_of_date")?,
        stance: parsed::<Stance>(row, "stance")?,
        rationale: serde_json::from_str(&rationale)?,
    })
}

pub(crate) fn position(row: &SqliteRow) -> Result<Position, DbError> {
    Ok(Position {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        qty: decimal(row, "qty")?,
        avg_cost_ccy: decimal(row, "avg_cost_ccy")?,
        currency: row.try_get("currency")?,
        fx_to_base: decimal(row, "fx_to_base")?,
        cost_base: decimal(row, "cost_base")?,
        status: parsed::<PositionStatus>(row, "status")?,
        opened_at: row.try_get::<DateTime<Utc>, _>("opened_at")?,
        closed_at: row.try_get::<Option<DateTime<Utc>>, _>("closed_at")?,
    })
}

pub(crate) fn order(row: &SqliteRow) -> Result<Order, DbError> {
    let origin: Option<String> = row.try_get("origin")?;
    Ok(Order {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        side: parsed::<OrderSide>(row, "side")?,
        qty: decimal(row, "qty")?,
        notional_ccy: decimal(row, "notional_ccy")?,
        currency: row.try_get("currency")?,
        fx_to_base: decimal(row, "fx_to_base")?,
        status: parsed::<OrderStatus>(row, "status")?,
        origin: origin.as_deref().map(Stance::from_str).transpose()?,
        decision_date: row.try_get::<Option<NaiveDate>, _>("decision_date")?,
        fill_price: opt_decimal(row, "fill_price")?,
        fee_base: opt_decimal(row, "fee_base")?,
        created_at: row.try_get("created_at")?,
        filled_at: row.try_get("filled_at")?,
    })
}

pub(crate) fn ledger_entry(row: &SqliteRow) -> Result<LedgerEntry, DbError> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        ts: row.try_get("ts")?,
        entry_type: row.try_get("entry_type")?,
        order_id: row.try_get("order_id")?,
        symbol: row.try_get("symbol")?,
        debit_base: decimal(row, "debit_base")?,
        credit_base: decimal(row, "credit_base")?,
        balance_after: decimal(row, "balance_after")?,
        fee_base: decimal(row, "fee_base")?,
        note: row.try_get("note")?,
    })
}

pub(crate) fn portfolio(row: &SqliteRow) -> Result<Portfolio, DbError> {
    Ok(Portfolio {
        base_ccy: row.try_get("base_ccy")?,
        cash: decimal(row, "cash")?,
        equity: decimal(row, "equity")?,
        nav: decimal(row, "nav")?,
        leverage: decimal(row, "leverage")?,
        peak_nav: decimal(row, "peak_nav")?,
        dd_max: decimal(row, "dd_max")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn price_bar(row: &SqliteRow) -> Result<PriceBar, DbError> {
    Ok(PriceBar {
        symbol: row.try_get("symbol")?,
        as_of_date: row.try_get("as_of_date")?,
        open: decimal(row, "open")?,
        currency: row.try_get("currency")?,
    })
}

pub(crate) fn fx_rate(row: &SqliteRow) -> Result<FxRate, DbError> {
    Ok(FxRate {
        base: row.try_get("base")?,
        quote: row.try_get("quote")?,
        rate: decimal(row, "rate")?,
        provider: row.try_get("provider")?,
        ts: row.try_get::<DateTime<Utc>, _>("ts")?,
    })
}

pub(crate) fn snapshot(row: &SqliteRow) -> Result<Snapshot, DbError> {
    let positions: String = row.try_get("positions")?;
    Ok(Snapshot {
        as_of_date: row.try_get("as_of_date")?,
        nav: decimal(row, "nav")?,
        cash: decimal(row, "cash")?,
        equity: decimal(row, "equity")?,
        positions: serde_json::from_str(&positions)?,
    })
}

pub(crate) const PORTFOLIO_COLUMNS: &str = "base_ccy, cash, equity, nav, leverage, peak_nav, dd_max, updated_at";

pub(crate) const POSITION_COLUMNS: &str =
    "id, symbol, qty, avg_cost_ccy, currency, fx_to_base, cost_base, status, opened_at, closed_at";

pub(crate) const ORDER_COLUMNS: &str = "id, symbol, side, qty, notional_ccy, currency, fx_to_base, status, origin, \
     decision_date, fill_price, fee_base, created_at, filled_at";

pub(crate) const LEDGER_COLUMNS: &str =
    "id, ts, entry_type, order_id, symbol, debit_base, credit_base, balance_after, fee_base, note";
