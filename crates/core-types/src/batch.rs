//! Inbound batch payloads and their validation.
//!
//! A batch is validated as a whole before anything touches the store, so a
//! single malformed entry rejects the entire batch.

use crate::error::CoreError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalInput {
    pub symbol: String,
    pub action: String,
    pub weight: Decimal,
    pub confidence: Decimal,
    /// Raw upstream metrics. Stored as received; only numeric entries are read.
    #[serde(default, alias = "risk_blob")]
    pub risk: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBatch {
    pub as_of_date: NaiveDate,
    pub model_run_id: String,
    pub signals: Vec<SignalInput>,
}

impl SignalBatch {
    /// Checks every entry and returns a copy with normalized symbols and actions.
    pub fn validated(&self) -> Result<SignalBatch, CoreError> {
        let model_run_id = self.model_run_id.trim();
        if model_run_id.is_empty() {
            return Err(invalid("model_run_id", "must be non-empty"));
        }
        if self.signals.is_empty() {
            return Err(invalid("signals", "batch contains no signals"));
        }

        let mut seen = HashSet::new();
        let mut signals = Vec::with_capacity(self.signals.len());
        for (idx, input) in self.signals.iter().enumerate() {
            let symbol = normalize_symbol(&input.symbol)
                .ok_or_else(|| invalid(&format!("signals[{idx}].symbol"), "must be non-empty"))?;
            if !seen.insert(symbol.clone()) {
                return Err(invalid(&format!("signals[{idx}].symbol"), &format!("duplicate symbol {symbol}")));
            }
            let action = input.action.trim().to_lowercase();
            if action.is_empty() {
                return Err(invalid(&format!("signals[{idx}].action"), "must be non-empty"));
            }
            if !is_unit_fraction(input.weight) {
                return Err(invalid(&format!("signals[{idx}].weight"), "must be within [0, 1]"));
            }
            if !is_unit_fraction(input.confidence) {
                return Err(invalid(&format!("signals[{idx}].confidence"), "must be within [0, 1]"));
            }
            signals.push(SignalInput {
                symbol,
                action,
                weight: input.weight,
                confidence: input.confidence,
                risk: input.risk.clone(),
            });
        }

        Ok(SignalBatch {
            as_of_date: self.as_of_date,
            model_run_id: model_run_id.to_string(),
            signals,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceInput {
    pub symbol: String,
    #[serde(alias = "open_ccy")]
    pub open: Decimal,
    #[serde(default, alias = "ccy")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBatch {
    pub as_of_date: NaiveDate,
    pub prices: Vec<PriceInput>,
}

impl PriceBatch {
    /// Checks every entry; a missing currency becomes `default_ccy`.
    pub fn validated(&self, default_ccy: &str) -> Result<PriceBatch, CoreError> {
        if self.prices.is_empty() {
            return Err(invalid("prices", "batch contains no prices"));
        }

        let mut seen = HashSet::new();
        let mut prices = Vec::with_capacity(self.prices.len());
        for (idx, input) in self.prices.iter().enumerate() {
            let symbol = normalize_symbol(&input.symbol)
                .ok_or_else(|| invalid(&format!("prices[{idx}].symbol"), "must be non-empty"))?;
            if !seen.insert(symbol.clone()) {
                return Err(invalid(&format!("prices[{idx}].symbol"), &format!("duplicate symbol {symbol}")));
            }
            if input.open <= Decimal::ZERO {
                return Err(invalid(&format!("prices[{idx}].open"), "must be positive"));
            }
            let currency = match input.currency.as_deref().map(str::trim) {
                Some(ccy) if !ccy.is_empty() => normalize_currency(ccy)
                    .ok_or_else(|| invalid(&format!("prices[{idx}].currency"), "must be a 3-letter code"))?,
                _ => default_ccy.to_uppercase(),
            };
            prices.push(PriceInput {
                symbol,
                open: input.open,
                currency: Some(currency),
            });
        }

        Ok(PriceBatch {
            as_of_date: self.as_of_date,
            prices,
        })
    }
}

/// A set of base -> quote rates observed at one moment from one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxBatch {
    pub base: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    pub rates: BTreeMap<String, Decimal>,
}

fn default_provider() -> String {
    "manual".to_string()
}

impl FxBatch {
    pub fn validated(&self) -> Result<FxBatch, CoreError> {
        let base = normalize_currency(&self.base).ok_or_else(|| invalid("base", "must be a 3-letter code"))?;
        if self.rates.is_empty() {
            return Err(invalid("rates", "batch contains no rates"));
        }
        let mut rates = BTreeMap::new();
        for (quote, rate) in &self.rates {
            let quote = normalize_currency(quote)
                .ok_or_else(|| invalid(&format!("rates.{quote}"), "must be a 3-letter code"))?;
            if *rate <= Decimal::ZERO {
                return Err(invalid(&format!("rates.{quote}"), "must be positive"));
            }
            rates.insert(quote, *rate);
        }
        Ok(FxBatch {
            base,
            provider: self.provider.trim().to_string(),
            rates,
        })
    }
}

pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    (!symbol.is_empty()).then_some(symbol)
}

pub fn normalize_currency(raw: &str) -> Option<String> {
    let ccy = raw.trim().to_uppercase();
    (ccy.len() == 3 && ccy.chars().all(|c| c.is_ascii_alphabetic())).then_some(ccy)
}

fn is_unit_fraction(value: Decimal) -> bool {
    value >= Decimal::ZERO && value <= Decimal::ONE
}

fn invalid(field: &str, reason: &str) -> CoreError {
    CoreError::InvalidInput(field.to_string(), reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal(symbol: &str, action: &str) -> SignalInput {
        SignalInput {
            symbol: symbol.to_string(),
            action: action.to_string(),
            weight: dec!(0.1),
            confidence: dec!(0.5),
            risk: None,
        }
    }

    fn batch(signals: Vec<SignalInput>) -> SignalBatch {
        SignalBatch {
            as_of_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            model_run_id: "run-1".to_string(),
            signals,
        }
    }

    #[test]
    fn signal_batch_normalizes_symbols_and_actions() {
        let out = batch(vec![signal(" aapl ", "BUY")]).validated().unwrap();
        assert_eq!(out.signals[0].symbol, "AAPL");
        assert_eq!(out.signals[0].action, "buy");
    }

    #[test]
    fn signal_batch_rejects_blank_symbol_anywhere() {
        let err = batch(vec![signal("MSFT", "buy"), signal("  ", "buy")])
            .validated()
            .unwrap_err();
        assert!(err.to_string().contains("signals[1].symbol"));
    }

    #[test]
    fn signal_batch_rejects_duplicates_and_bad_weights() {
        assert!(batch(vec![signal("X", "buy"), signal("x", "watch")]).validated().is_err());

        let mut heavy = signal("X", "buy");
        heavy.weight = dec!(1.5);
        assert!(batch(vec![heavy]).validated().is_err());

        let mut no_run = batch(vec![signal("X", "buy")]);
        no_run.model_run_id = " ".to_string();
        assert!(no_run.validated().is_err());
    }

    #[test]
    fn signal_batch_accepts_metrics_blob_with_non_numeric_keys() {
        let parsed: SignalBatch = serde_json::from_str(
            r#"{
                "as_of_date": "2025-03-03",
                "model_run_id": "run-7",
                "signals": [{
                    "symbol": "nvda",
                    "action": "buy",
                    "weight": 0.1,
                    "confidence": 0.6,
                    "risk": {"bubble_score": 0.8, "rsi_14": 71.2, "ok": true, "last_date": "2025-03-02"}
                }]
            }"#,
        )
        .unwrap();
        let out = parsed.validated().unwrap();
        let risk = out.signals[0].risk.as_ref().unwrap();
        assert_eq!(risk.get("ok"), Some(&Value::Bool(true)));
        assert_eq!(crate::RiskSnapshot::from_map(risk).bubble_score, dec!(0.8));
    }

    #[test]
    fn price_batch_defaults_currency_and_rejects_non_positive_open() {
        let prices = PriceBatch {
            as_of_date: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            prices: vec![PriceInput {
                symbol: "vod".to_string(),
                open: dec!(0.72),
                currency: None,
            }],
        };
        let out = prices.validated("usd").unwrap();
        assert_eq!(out.prices[0].symbol, "VOD");
        assert_eq!(out.prices[0].currency.as_deref(), Some("USD"));

        let mut bad = prices.clone();
        bad.prices[0].open = Decimal::ZERO;
        assert!(bad.validated("USD").is_err());
    }

    #[test]
    fn fx_batch_rejects_non_positive_rates() {
        let fx = FxBatch {
            base: "gbp".to_string(),
            provider: "manual".to_string(),
            rates: BTreeMap::from([("usd".to_string(), dec!(1.27))]),
        };
        let out = fx.validated().unwrap();
        assert_eq!(out.base, "GBP");
        assert_eq!(out.rates.get("USD"), Some(&dec!(1.27)));

        let mut bad = fx.clone();
        bad.rates.insert("EUR".to_string(), dec!(-1));
        assert!(bad.validated().is_err());
    }
}
