use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// A missing or unusable market input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("Missing opening price for {symbol} on {date}")]
    MissingPrice { symbol: String, date: NaiveDate },

    #[error("No FX rate {base}->{quote}")]
    MissingFxRate { base: String, quote: String },

    #[error("FX rate {base}->{quote} is not usable: {rate}")]
    InvalidFxRate {
        base: String,
        quote: String,
        rate: Decimal,
    },

    #[error("Opening price for {symbol} is not usable: {price}")]
    InvalidPrice { symbol: String, price: Decimal },
}

/// Store state that cannot be settled consistently.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("Order {order_id}: no open position for {symbol} to sell")]
    NoOpenPosition { order_id: i64, symbol: String },

    #[error("Order {order_id} for {symbol}: currency {actual} does not match {expected}")]
    CurrencyMismatch {
        order_id: i64,
        symbol: String,
        expected: String,
        actual: String,
    },

    #[error("Order {order_id} is invalid: {reason}")]
    InvalidOrder { order_id: i64, reason: String },

    #[error("Order {order_id} was settled by another writer")]
    Conflict { order_id: i64 },

    #[error("Settlement for {date} is already in progress")]
    InProgress { date: NaiveDate },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] core_types::CoreError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Database error: {0}")]
    Database(#[from] database::DbError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Coarse category of an [`EngineError`], for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Lookup,
    Settlement,
    Persistence,
    Configuration,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Lookup(_) => ErrorKind::Lookup,
            EngineError::Settlement(_) => ErrorKind::Settlement,
            EngineError::Database(_) => ErrorKind::Persistence,
            EngineError::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

impl From<configuration::ConfigError> for EngineError {
    fn from(err: configuration::ConfigError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

impl From<risk::RiskError> for EngineError {
    fn from(err: risk::RiskError) -> Self {
        match err {
            risk::RiskError::InvalidRate { base, quote, rate } => {
                EngineError::Lookup(LookupError::InvalidFxRate { base, quote, rate })
            }
            risk::RiskError::InvalidParameters(msg) => EngineError::Configuration(msg),
        }
    }
}

/// Attaches the order being settled to an executor failure.
pub(crate) fn settlement_failure(
    order_id: i64,
    base_ccy: &str,
    err: executor::ExecutorError,
) -> EngineError {
    use executor::ExecutorError as E;
    match err {
        E::PositionNotFound(symbol) => SettlementError::NoOpenPosition { order_id, symbol }.into(),
        E::InvalidOrder { order_id, reason } => SettlementError::InvalidOrder { order_id, reason }.into(),
        E::CurrencyMismatch {
            symbol,
            expected,
            actual,
        } => SettlementError::CurrencyMismatch {
            order_id,
            symbol,
            expected,
            actual,
        }
        .into(),
        E::InvalidRate { currency, rate } => LookupError::InvalidFxRate {
            base: base_ccy.to_string(),
            quote: currency,
            rate,
        }
        .into(),
        E::InvalidPrice { symbol, price } => LookupError::InvalidPrice { symbol, price }.into(),
    }
}
