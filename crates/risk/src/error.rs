use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("Sizing parameters from configuration are invalid: {0}")]
    InvalidParameters(String),

    #[error("Exchange rate {base}->{quote} is not usable: {rate}")]
    InvalidRate {
        base: String,
        quote: String,
        rate: Decimal,
    },
}
