use crate::error::EngineError;
use chrono::{NaiveDate, Utc};
use configuration::EngineConfig;
use core_types::{OrderSide, Recommendation, Stance};
use database::{BatchTx, DbRepository};
use risk::{OrderStager, StagingContext, StanceResolver};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// An order staged by a decision run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedOrder {
    pub order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    /// Explicit quantity for sells; zero for buys.
    pub qty: Decimal,
    /// Instrument-currency notional for buys; zero for sells.
    pub notional_ccy: Decimal,
    pub currency: String,
    pub origin: Stance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionReport {
    pub date: NaiveDate,
    pub recommendations: Vec<Recommendation>,
    pub staged_orders: Vec<StagedOrder>,
    /// Pending orders from an earlier run for the same date that were replaced.
    pub superseded_orders: u64,
}

/// Turns the signals of one trading day into recommendations and staged orders.
///
/// A run never touches positions, the ledger or the portfolio row. Running it
/// again for the same date with the same inputs produces the same
/// recommendations and the same pending orders.
pub struct DecisionRunner {
    repo: DbRepository,
    config: EngineConfig,
    resolver: StanceResolver,
    stager: OrderStager,
}

impl DecisionRunner {
    pub fn new(repo: DbRepository, config: EngineConfig) -> Result<Self, EngineError> {
        let resolver = StanceResolver::new(config.risk_thresholds.clone());
        let stager = OrderStager::new(config.sizing.clone())?;
        Ok(Self {
            repo,
            config,
            resolver,
            stager,
        })
    }

    pub async fn run(&self, date: NaiveDate) -> Result<DecisionReport, EngineError> {
        info!(%date, "Starting decision run");
        let mut tx = self.repo.begin_batch().await?;
        let now = Utc::now();

        let portfolio = tx.load_portfolio().await?;
        let signals = tx.load_signals(date).await?;
        let previous = tx.load_previous_stances(date).await?;
        let positions = tx.load_open_positions().await?;
        let superseded_orders = tx.delete_new_orders_for_decision(date).await?;
        let already_filled = tx.symbols_with_filled_orders_for_decision(date).await?;

        let base_ccy = portfolio.base_ccy.as_str();
        let mut rates: HashMap<String, Decimal> = HashMap::new();
        let mut recommendations = Vec::with_capacity(signals.len());
        let mut staged_orders = Vec::new();

        for signal in &signals {
            let position = positions.get(&signal.symbol);
            let (stance, rationale) = self
                .resolver
                .resolve(signal, previous.get(&signal.symbol).copied(), position);
            debug!(symbol = %signal.symbol, %stance, decision = ?rationale.decision, "Resolved stance");

            tx.upsert_recommendation(&signal.symbol, date, stance, &rationale, now)
                .await?;
            recommendations.push(Recommendation {
                symbol: signal.symbol.clone(),
                as_of_date: date,
                stance,
                rationale,
            });

            if already_filled.contains(&signal.symbol) {
                debug!(symbol = %signal.symbol, "Orders from this date already filled; not restaging");
                continue;
            }

            let (quote_ccy, base_to_quote) = match stance {
                Stance::Buy | Stance::BuySmall => {
                    let quote = tx
                        .latest_price_currency(&signal.symbol, date)
                        .await?
                        .unwrap_or_else(|| self.config.fx.default_quote_ccy.clone());
                    let rate = self.base_to_quote(&mut tx, base_ccy, &quote, &mut rates).await?;
                    (quote, rate)
                }
                _ => (base_ccy.to_string(), Decimal::ONE),
            };

            let ctx = StagingContext {
                nav: portfolio.nav,
                base_ccy,
                quote_ccy: &quote_ccy,
                base_to_quote,
                position,
            };
            let Some(draft) = self.stager.stage(&signal.symbol, stance, signal.weight, &ctx)? else {
                continue;
            };

            let order_id = tx.insert_order(&draft, date, now).await?;
            debug!(order_id, symbol = %draft.symbol, side = draft.side.as_str(), "Staged order");
            staged_orders.push(StagedOrder {
                order_id,
                symbol: draft.symbol,
                side: draft.side,
                qty: draft.qty,
                notional_ccy: draft.notional_ccy,
                currency: draft.currency,
                origin: draft.origin,
            });
        }

        tx.commit().await?;
        info!(
            %date,
            recommendations = recommendations.len(),
            staged = staged_orders.len(),
            superseded = superseded_orders,
            "Decision run committed"
        );

        Ok(DecisionReport {
            date,
            recommendations,
            staged_orders,
            superseded_orders,
        })
    }

    /// Base -> quote rate for sizing, cached per run.
    ///
    /// A pair with no stored rate falls back to `fx.fallback_rate`. The fill
    /// re-prices FX from the store and fails instead.
    async fn base_to_quote(
        &self,
        tx: &mut BatchTx,
        base: &str,
        quote: &str,
        cache: &mut HashMap<String, Decimal>,
    ) -> Result<Decimal, EngineError> {
        if quote == base {
            return Ok(Decimal::ONE);
        }
        if let Some(rate) = cache.get(quote) {
            return Ok(*rate);
        }
        let rate = match tx.latest_fx_rate(base, quote).await? {
            Some(rate) => rate,
            None => {
                let fallback = self.config.fx.fallback_rate;
                warn!(base, quote, %fallback, "No FX rate stored; using fallback");
                fallback
            }
        };
        cache.insert(quote.to_string(), rate);
        Ok(rate)
    }
}
