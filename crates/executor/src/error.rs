use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("No open position for {0} to sell")]
    PositionNotFound(String),

    #[error("Order {order_id} is not fillable: {reason}")]
    InvalidOrder { order_id: i64, reason: String },

    #[error("Currency mismatch for {symbol}: expected {expected}, got {actual}")]
    CurrencyMismatch {
        symbol: String,
        expected: String,
        actual: String,
    },

    #[error("Exchange rate for {currency} is not usable: {rate}")]
    InvalidRate { currency: String, rate: Decimal },

    #[error("Opening price for {symbol} is not usable: {price}")]
    InvalidPrice { symbol: String, price: Decimal },
}
