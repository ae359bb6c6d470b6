use crate::enums::{DecisionTag, OrderSide, OrderStatus, PositionStatus, Stance};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

/// Typed view of the risk map attached to a signal.
///
/// Keys missing from the upstream map, or holding something other than a
/// number, read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSnapshot {
    pub bubble_score: Decimal,
    pub rsi_14: Decimal,
    pub sharpe_1y: Decimal,
    pub vol_30d: Decimal,
    pub max_dd_1y: Decimal,
}

impl RiskSnapshot {
    pub fn from_map(map: &HashMap<String, Value>) -> Self {
        let get = |key: &str| map.get(key).and_then(numeric).unwrap_or(Decimal::ZERO);
        Self {
            bubble_score: get("bubble_score"),
            rsi_14: get("rsi_14"),
            sharpe_1y: get("sharpe_1y"),
            vol_30d: get("vol_30d"),
            max_dd_1y: get("max_dd_1y"),
        }
    }
}

/// Reads a JSON number, or a string holding one, as a decimal.
fn numeric(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let raw = n.to_string();
            Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// A per-symbol trading signal for one date, as ingested from upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub model_run_id: String,
    pub action: String,
    pub weight: Decimal,
    pub confidence: Decimal,
    pub risk: RiskSnapshot,
}

/// Structured explanation of a stance, stored alongside the recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rationale {
    /// Previous stance for the symbol, lower-cased; empty if there was none.
    pub previous: String,
    /// Raw signal action, lower-cased.
    pub action: String,
    pub weight: Decimal,
    pub risk: RiskSnapshot,
    pub decision: DecisionTag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub stance: Stance,
    pub rationale: Rationale,
}

/// A holding in a single instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub symbol: String,
    pub qty: Decimal,
    /// Weighted average acquisition price in instrument currency.
    pub avg_cost_ccy: Decimal,
    pub currency: String,
    /// Instrument currency -> base currency factor at the last mutation.
    pub fx_to_base: Decimal,
    /// Book cost of the open quantity in base currency.
    pub cost_base: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open && self.qty > Decimal::ZERO
    }
}

/// An order produced by the stager, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub symbol: String,
    pub side: OrderSide,
    /// Zero for buys; the quantity is resolved from the notional at fill time.
    pub qty: Decimal,
    /// Instrument-currency notional for buys; zero for sells.
    pub notional_ccy: Decimal,
    pub currency: String,
    pub fx_to_base: Decimal,
    /// The stance that produced the order.
    pub origin: Stance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub notional_ccy: Decimal,
    pub currency: String,
    pub fx_to_base: Decimal,
    pub status: OrderStatus,
    pub origin: Option<Stance>,
    pub decision_date: Option<NaiveDate>,
    pub fill_price: Option<Decimal>,
    pub fee_base: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

/// The settlement receipt for a single order.
///
/// It describes the effect of the fill; applying it to state is the caller's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub fill_price: Decimal,
    pub qty: Decimal,
    pub currency: String,
    /// Instrument currency -> base currency factor used for cash movement.
    pub fx_to_base: Decimal,
    /// `qty * fill_price` converted to base currency, before fees.
    pub gross_base: Decimal,
    pub fee_base: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of a cash movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub entry_type: String,
    pub order_id: Option<i64>,
    pub symbol: Option<String>,
    pub debit_base: Decimal,
    pub credit_base: Decimal,
    pub balance_after: Decimal,
    pub fee_base: Decimal,
    pub note: String,
}

/// Portfolio-level aggregates. There is exactly one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub base_ccy: String,
    pub cash: Decimal,
    pub equity: Decimal,
    pub nav: Decimal,
    pub leverage: Decimal,
    pub peak_nav: Decimal,
    /// Most negative drawdown ever observed, as a fraction.
    pub dd_max: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub as_of_date: NaiveDate,
    pub open: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxRate {
    pub base: String,
    pub quote: String,
    pub rate: Decimal,
    pub provider: String,
    pub ts: DateTime<Utc>,
}

/// End-of-batch view of the book, one per settlement date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub as_of_date: NaiveDate,
    pub nav: Decimal,
    pub cash: Decimal,
    pub equity: Decimal,
    pub positions: Vec<Position>,
}
