#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use configuration::EngineConfig;
use core_types::{OrderDraft, OrderSide, PriceBatch, PriceInput, SignalBatch, SignalInput, Stance};
use database::{connect_in_memory, DbRepository};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.portfolio.start_cash = dec!(1000);
    config
}

pub async fn setup(config: &EngineConfig) -> DbRepository {
    let repo = DbRepository::new(connect_in_memory().await.unwrap());
    repo.ensure_portfolio(&config.portfolio.base_ccy, config.portfolio.start_cash)
        .await
        .unwrap();
    repo
}

pub fn signal(symbol: &str, action: &str, weight: Decimal) -> SignalInput {
    SignalInput {
        symbol: symbol.to_string(),
        action: action.to_string(),
        weight,
        confidence: dec!(0.8),
        risk: None,
    }
}

pub fn risky(mut input: SignalInput, key: &str, value: Decimal) -> SignalInput {
    input
        .risk
        .get_or_insert_with(HashMap::new)
        .insert(key.to_string(), serde_json::Value::Number(value.to_string().parse().unwrap()));
    input
}

pub fn signals(date: NaiveDate, signals: Vec<SignalInput>) -> SignalBatch {
    SignalBatch {
        as_of_date: date,
        model_run_id: "run-1".to_string(),
        signals,
    }
}

pub fn prices(date: NaiveDate, quotes: &[(&str, Decimal, &str)]) -> PriceBatch {
    PriceBatch {
        as_of_date: date,
        prices: quotes
            .iter()
            .map(|(symbol, open, ccy)| PriceInput {
                symbol: symbol.to_string(),
                open: *open,
                currency: Some(ccy.to_string()),
            })
            .collect(),
    }
}

/// Stages an order directly, bypassing the decision run.
pub async fn stage(repo: &DbRepository, symbol: &str, side: OrderSide, qty: Decimal, notional: Decimal, ccy: &str) -> i64 {
    let draft = OrderDraft {
        symbol: symbol.to_string(),
        side,
        qty,
        notional_ccy: notional,
        currency: ccy.to_string(),
        fx_to_base: Decimal::ONE,
        origin: match side {
            OrderSide::Buy => Stance::Buy,
            OrderSide::Sell => Stance::Sell,
        },
    };
    let mut tx = repo.begin_batch().await.unwrap();
    let id = tx.insert_order(&draft, day(1), Utc::now()).await.unwrap();
    tx.commit().await.unwrap();
    id
}
