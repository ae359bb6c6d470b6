use crate::error::ExecutorError;
use chrono::{DateTime, Utc};
use configuration::SettlementSettings;
use core_types::{Fill, OrderSide, Portfolio, Position, PositionStatus};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// What a fill did to a position, for the caller to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub position: Position,
    /// The position did not exist before this fill and has no store id yet.
    pub is_new: bool,
}

/// In-memory state of the account during one settlement batch.
///
/// The book starts from the stored portfolio row and open positions, absorbs
/// fills one by one, and produces the new portfolio row at the end. Equity is
/// never tracked separately: it is always the sum of `cost_base` over the
/// open positions.
#[derive(Debug, Clone)]
pub struct Book {
    base_ccy: String,
    cash: Decimal,
    peak_nav: Decimal,
    dd_max: Decimal,
    positions: BTreeMap<String, Position>,
    close_epsilon: Decimal,
    nav_floor: Decimal,
}

impl Book {
    pub fn new(portfolio: &Portfolio, positions: impl IntoIterator<Item = Position>, settings: &SettlementSettings) -> Self {
        Self {
            base_ccy: portfolio.base_ccy.clone(),
            cash: portfolio.cash,
            peak_nav: portfolio.peak_nav,
            dd_max: portfolio.dd_max,
            positions: positions
                .into_iter()
                .filter(Position::is_open)
                .map(|p| (p.symbol.clone(), p))
                .collect(),
            close_epsilon: settings.close_epsilon,
            nav_floor: settings.nav_floor,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn equity(&self) -> Decimal {
        self.positions.values().map(|p| p.cost_base).sum()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    /// Records the store id of a position opened by an earlier fill.
    pub fn set_position_id(&mut self, symbol: &str, id: i64) {
        if let Some(position) = self.positions.get_mut(symbol) {
            position.id = id;
        }
    }

    /// The quantity a sell of `requested` may actually take.
    ///
    /// Selling more than is held is clamped to the open quantity.
    pub fn sellable_qty(&self, symbol: &str, requested: Decimal) -> Result<Decimal, ExecutorError> {
        let position = self
            .positions
            .get(symbol)
            .ok_or_else(|| ExecutorError::PositionNotFound(symbol.to_string()))?;
        if requested > position.qty {
            tracing::warn!(
                symbol,
                %requested,
                open = %position.qty,
                "Sell exceeds open quantity; clamping"
            );
            return Ok(position.qty);
        }
        Ok(requested)
    }

    /// Applies a fill to cash and positions.
    pub fn apply(&mut self, fill: &Fill) -> Result<PositionUpdate, ExecutorError> {
        match fill.side {
            OrderSide::Buy => self.apply_buy(fill),
            OrderSide::Sell => self.apply_sell(fill),
        }
    }

    fn apply_buy(&mut self, fill: &Fill) -> Result<PositionUpdate, ExecutorError> {
        self.cash -= fill.gross_base + fill.fee_base;

        if let Some(position) = self.positions.get_mut(&fill.symbol) {
            check_currency(position, fill)?;
            let total_qty = position.qty + fill.qty;
            position.avg_cost_ccy = (position.avg_cost_ccy * position.qty + fill.fill_price * fill.qty) / total_qty;
            position.qty = total_qty;
            position.cost_base += fill.gross_base;
            position.fx_to_base = fill.fx_to_base;
            return Ok(PositionUpdate {
                position: position.clone(),
                is_new: false,
            });
        }

        let position = Position {
            id: 0,
            symbol: fill.symbol.clone(),
            qty: fill.qty,
            avg_cost_ccy: fill.fill_price,
            currency: fill.currency.clone(),
            fx_to_base: fill.fx_to_base,
            cost_base: fill.gross_base,
            status: PositionStatus::Open,
            opened_at: fill.timestamp,
            closed_at: None,
        };
        self.positions.insert(fill.symbol.clone(), position.clone());
        Ok(PositionUpdate { position, is_new: true })
    }

    fn apply_sell(&mut self, fill: &Fill) -> Result<PositionUpdate, ExecutorError> {
        let position = self
            .positions
            .get_mut(&fill.symbol)
            .ok_or_else(|| ExecutorError::PositionNotFound(fill.symbol.clone()))?;
        check_currency(position, fill)?;

        let closes = fill.qty >= position.qty - self.close_epsilon;
        let released = if closes {
            position.cost_base
        } else {
            position.cost_base * fill.qty / position.qty
        };

        self.cash += fill.gross_base - fill.fee_base;
        position.cost_base -= released;
        position.fx_to_base = fill.fx_to_base;

        if closes {
            position.qty = Decimal::ZERO;
            position.cost_base = Decimal::ZERO;
            position.status = PositionStatus::Closed;
            position.closed_at = Some(fill.timestamp);
            let closed = position.clone();
            self.positions.remove(&fill.symbol);
            return Ok(PositionUpdate {
                position: closed,
                is_new: false,
            });
        }

        position.qty -= fill.qty;
        Ok(PositionUpdate {
            position: position.clone(),
            is_new: false,
        })
    }

    /// The portfolio row after every fill so far.
    ///
    /// NAV is floored at `nav_floor` so leverage stays defined. The peak never
    /// decreases and `dd_max` only ever moves down.
    pub fn finalize(&self, now: DateTime<Utc>) -> Portfolio {
        let equity = self.equity();
        let mut nav = self.cash + equity;
        if nav <= Decimal::ZERO {
            tracing::warn!(%nav, floor = %self.nav_floor, "NAV is not positive; flooring");
            nav = self.nav_floor;
        }
        let peak_nav = self.peak_nav.max(nav);
        let drawdown = if peak_nav > Decimal::ZERO {
            (nav - peak_nav) / peak_nav
        } else {
            Decimal::ZERO
        };

        Portfolio {
            base_ccy: self.base_ccy.clone(),
            cash: self.cash,
            equity,
            nav,
            leverage: equity / nav,
            peak_nav,
            dd_max: self.dd_max.min(drawdown),
            updated_at: now,
        }
    }
}

fn check_currency(position: &Position, fill: &Fill) -> Result<(), ExecutorError> {
    if position.currency != fill.currency {
        return Err(ExecutorError::CurrencyMismatch {
            symbol: fill.symbol.clone(),
            expected: position.currency.clone(),
            actual: fill.currency.clone(),
        });
    }
    Ok(())
}
