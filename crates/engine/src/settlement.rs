use crate::error::{settlement_failure, EngineError, LookupError, SettlementError};
use chrono::{Duration, NaiveDate, Utc};
use configuration::EngineConfig;
use core_types::{Fill, LedgerEntry, OrderSide, Portfolio, PriceBar, Snapshot};
use database::{BatchTx, DbRepository};
use executor::{Book, Executor, FillRequest, SimulatedExecutor};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LEDGER_ORDER_FILL: &str = "order_fill";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilledOrder {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub fill_price: Decimal,
    pub qty: Decimal,
    pub currency: String,
    pub fee_base: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub cash: Decimal,
    pub equity: Decimal,
    pub nav: Decimal,
    pub leverage: Decimal,
}

impl From<&Portfolio> for PortfolioSummary {
    fn from(p: &Portfolio) -> Self {
        Self {
            cash: p.cash,
            equity: p.equity,
            nav: p.nav,
            leverage: p.leverage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FillReport {
    pub date: NaiveDate,
    pub filled: Vec<FilledOrder>,
    pub portfolio: PortfolioSummary,
}

/// Settles every pending order against the opening prices of one session.
///
/// A run is all-or-nothing: a missing price or FX rate, a sell with nothing
/// to sell, or any store failure leaves orders, positions, the ledger and the
/// portfolio exactly as they were. Only one run per execution date may be in
/// flight at a time.
pub struct FillEngine {
    repo: DbRepository,
    config: EngineConfig,
    executor: Arc<dyn Executor>,
}

impl FillEngine {
    pub fn new(repo: DbRepository, config: EngineConfig) -> Self {
        let executor = Arc::new(SimulatedExecutor::new(config.frictions.clone()));
        Self::with_executor(repo, config, executor)
    }

    pub fn with_executor(repo: DbRepository, config: EngineConfig, executor: Arc<dyn Executor>) -> Self {
        Self { repo, config, executor }
    }

    pub async fn run(&self, date: NaiveDate) -> Result<FillReport, EngineError> {
        let holder = Uuid::new_v4().to_string();
        // Bounded by configuration validation.
        let lease = Duration::seconds(self.config.settlement.lock_lease_secs as i64);
        if !self
            .repo
            .try_acquire_settlement_lock(date, &holder, Utc::now(), lease)
            .await?
        {
            warn!(%date, "Settlement already in progress");
            return Err(SettlementError::InProgress { date }.into());
        }
        debug!(%date, %holder, "Acquired settlement lock");

        let outcome = self.settle(date).await;

        if let Err(e) = self.repo.release_settlement_lock(date, &holder).await {
            warn!(%date, error = %e, "Failed to release settlement lock; it will expire with its lease");
        }
        if let Err(e) = &outcome {
            warn!(%date, kind = ?e.kind(), error = %e, "Settlement rolled back");
        }
        outcome
    }

    async fn settle(&self, date: NaiveDate) -> Result<FillReport, EngineError> {
        info!(%date, "Starting settlement");
        let mut tx = self.repo.begin_batch().await?;

        let portfolio = tx.load_portfolio().await?;
        let orders = tx.load_new_orders().await?;
        if orders.is_empty() {
            info!(%date, "No pending orders");
            tx.rollback().await?;
            return Ok(FillReport {
                date,
                filled: Vec::new(),
                portfolio: PortfolioSummary::from(&portfolio),
            });
        }

        let prices = tx.load_prices(date).await?;
        if let Some(order) = orders.iter().find(|o| !prices.contains_key(&o.symbol)) {
            return Err(LookupError::MissingPrice {
                symbol: order.symbol.clone(),
                date,
            }
            .into());
        }
        let base_ccy = portfolio.base_ccy.clone();
        let rates = resolve_rates(&mut tx, &base_ccy, orders.iter().filter_map(|o| prices.get(&o.symbol))).await?;

        let positions = tx.load_open_positions().await?;
        let mut book = Book::new(&portfolio, positions.into_values(), &self.config.settlement);
        let now = Utc::now();
        let mut filled = Vec::with_capacity(orders.len());

        for order in &orders {
            let bar = prices.get(&order.symbol).ok_or_else(|| LookupError::MissingPrice {
                symbol: order.symbol.clone(),
                date,
            })?;
            let base_to_quote = rate_for(&rates, &base_ccy, &bar.currency)?;

            let sell_qty = match order.side {
                OrderSide::Buy => Decimal::ZERO,
                OrderSide::Sell => book
                    .sellable_qty(&order.symbol, order.qty)
                    .map_err(|e| settlement_failure(order.id, &base_ccy, e))?,
            };

            let fill = self
                .executor
                .execute(&FillRequest {
                    order,
                    sell_qty,
                    open: bar.open,
                    currency: &bar.currency,
                    base_to_quote,
                    timestamp: now,
                })
                .map_err(|e| settlement_failure(order.id, &base_ccy, e))?;

            let update = book
                .apply(&fill)
                .map_err(|e| settlement_failure(order.id, &base_ccy, e))?;
            if update.is_new {
                let id = tx.insert_position(&update.position).await?;
                book.set_position_id(&fill.symbol, id);
            } else {
                tx.update_position(&update.position).await?;
            }

            if !tx
                .mark_order_filled(order.id, fill.qty, fill.fill_price, fill.fee_base, now)
                .await?
            {
                return Err(SettlementError::Conflict { order_id: order.id }.into());
            }
            tx.append_ledger(&ledger_entry(&fill, book.cash(), &base_ccy)).await?;

            debug!(order_id = order.id, symbol = %fill.symbol, qty = %fill.qty, price = %fill.fill_price, "Filled order");
            filled.push(FilledOrder {
                order_id: order.id,
                symbol: fill.symbol,
                side: fill.side,
                fill_price: fill.fill_price,
                qty: fill.qty,
                currency: fill.currency,
                fee_base: fill.fee_base,
            });
        }

        let next = book.finalize(now);
        tx.save_portfolio(&next).await?;
        tx.upsert_snapshot(
            &Snapshot {
                as_of_date: date,
                nav: next.nav,
                cash: next.cash,
                equity: next.equity,
                positions: book.open_positions(),
            },
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            %date,
            filled = filled.len(),
            nav = %next.nav,
            cash = %next.cash,
            equity = %next.equity,
            "Settlement committed"
        );
        Ok(FillReport {
            date,
            filled,
            portfolio: PortfolioSummary::from(&next),
        })
    }
}

/// Base -> quote rates for every price currency in play. Any missing pair aborts.
async fn resolve_rates<'a>(
    tx: &mut BatchTx,
    base_ccy: &str,
    bars: impl Iterator<Item = &'a PriceBar>,
) -> Result<HashMap<String, Decimal>, EngineError> {
    let mut rates = HashMap::new();
    for bar in bars {
        if rates.contains_key(&bar.currency) {
            continue;
        }
        let rate = if bar.currency == base_ccy {
            Decimal::ONE
        } else {
            tx.latest_fx_rate(base_ccy, &bar.currency)
                .await?
                .ok_or_else(|| LookupError::MissingFxRate {
                    base: base_ccy.to_string(),
                    quote: bar.currency.clone(),
                })?
        };
        rates.insert(bar.currency.clone(), rate);
    }
    Ok(rates)
}

fn rate_for(rates: &HashMap<String, Decimal>, base_ccy: &str, currency: &str) -> Result<Decimal, LookupError> {
    rates.get(currency).copied().ok_or_else(|| LookupError::MissingFxRate {
        base: base_ccy.to_string(),
        quote: currency.to_string(),
    })
}

fn ledger_entry(fill: &Fill, cash_after: Decimal, base_ccy: &str) -> LedgerEntry {
    let (debit_base, credit_base, verb) = match fill.side {
        OrderSide::Buy => (fill.gross_base + fill.fee_base, Decimal::ZERO, "BUY"),
        OrderSide::Sell => (Decimal::ZERO, fill.gross_base - fill.fee_base, "SELL"),
    };
    LedgerEntry {
        id: 0,
        ts: fill.timestamp,
        entry_type: LEDGER_ORDER_FILL.to_string(),
        order_id: Some(fill.order_id),
        symbol: Some(fill.symbol.clone()),
        debit_base,
        credit_base,
        balance_after: cash_after,
        fee_base: fill.fee_base,
        note: format!(
            "{verb} {} qty={} @ {} {}, fee={} {base_ccy}",
            fill.symbol,
            fill.qty.round_dp(6),
            fill.fill_price.round_dp(4),
            fill.currency,
            fill.fee_base.round_dp(4),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn unresolved_currency_is_a_lookup_error_not_parity() {
        let rates = HashMap::from([("GBP".to_string(), Decimal::ONE), ("USD".to_string(), dec!(1.25))]);
        assert_eq!(rate_for(&rates, "GBP", "USD").unwrap(), dec!(1.25));
        assert!(matches!(
            rate_for(&rates, "GBP", "EUR"),
            Err(LookupError::MissingFxRate { base, quote }) if base == "GBP" && quote == "EUR"
        ));
    }
}
