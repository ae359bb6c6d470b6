use crate::error::RiskError;
use configuration::Sizing;
use core_types::{OrderDraft, OrderSide, Position, Stance};
use rust_decimal::Decimal;

/// Market facts the stager needs for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct StagingContext<'a> {
    /// Portfolio NAV in base currency.
    pub nav: Decimal,
    /// Base currency code, used in error messages.
    pub base_ccy: &'a str,
    /// Currency the instrument trades in.
    pub quote_ccy: &'a str,
    /// Base -> quote rate (units of quote per unit of base).
    pub base_to_quote: Decimal,
    /// The open position for the symbol, if any.
    pub position: Option<&'a Position>,
}

/// Turns a stance into at most one order draft.
///
/// Buys are staged as a notional in the instrument currency; the quantity is
/// only known once the fill price is. Sells and trims carry an explicit
/// quantity taken from the open position.
#[derive(Debug, Clone)]
pub struct OrderStager {
    sizing: Sizing,
}

impl OrderStager {
    pub fn new(sizing: Sizing) -> Result<Self, RiskError> {
        if sizing.max_pos_pct <= Decimal::ZERO || sizing.max_pos_pct > Decimal::ONE {
            return Err(RiskError::InvalidParameters(
                "max_pos_pct must be within (0, 1]".to_string(),
            ));
        }
        if sizing.trim_fraction <= Decimal::ZERO || sizing.trim_fraction > Decimal::ONE {
            return Err(RiskError::InvalidParameters(
                "trim_fraction must be within (0, 1]".to_string(),
            ));
        }
        Ok(Self { sizing })
    }

    pub fn stage(
        &self,
        symbol: &str,
        stance: Stance,
        weight: Decimal,
        ctx: &StagingContext<'_>,
    ) -> Result<Option<OrderDraft>, RiskError> {
        match stance {
            Stance::Buy | Stance::BuySmall => self.stage_buy(symbol, stance, weight, ctx),
            Stance::Sell => Ok(open_position(ctx).map(|p| sell(p, p.qty, stance))),
            Stance::Trim => Ok(open_position(ctx).and_then(|p| {
                let qty = p.qty * self.sizing.trim_fraction;
                (qty > Decimal::ZERO).then(|| sell(p, qty, stance))
            })),
            Stance::Avoid | Stance::Watch | Stance::Hold => Ok(None),
        }
    }

    fn stage_buy(
        &self,
        symbol: &str,
        stance: Stance,
        weight: Decimal,
        ctx: &StagingContext<'_>,
    ) -> Result<Option<OrderDraft>, RiskError> {
        if ctx.base_to_quote <= Decimal::ZERO {
            return Err(RiskError::InvalidRate {
                base: ctx.base_ccy.to_string(),
                quote: ctx.quote_ccy.to_string(),
                rate: ctx.base_to_quote,
            });
        }

        let target_base = (weight * ctx.nav).min(self.sizing.max_pos_pct * ctx.nav);
        if target_base <= Decimal::ZERO {
            tracing::debug!(symbol, %weight, nav = %ctx.nav, "Buy target is not positive; nothing staged");
            return Ok(None);
        }

        Ok(Some(OrderDraft {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            qty: Decimal::ZERO,
            notional_ccy: target_base * ctx.base_to_quote,
            currency: ctx.quote_ccy.to_string(),
            fx_to_base: Decimal::ONE / ctx.base_to_quote,
            origin: stance,
        }))
    }
}

fn open_position<'a>(ctx: &StagingContext<'a>) -> Option<&'a Position> {
    ctx.position.filter(|p| p.is_open())
}

fn sell(position: &Position, qty: Decimal, origin: Stance) -> OrderDraft {
    OrderDraft {
        symbol: position.symbol.clone(),
        side: OrderSide::Sell,
        qty,
        notional_ccy: Decimal::ZERO,
        currency: position.currency.clone(),
        fx_to_base: position.fx_to_base,
        origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::PositionStatus;
    use rust_decimal_macros::dec;

    fn stager() -> OrderStager {
        OrderStager::new(Sizing::default()).unwrap()
    }

    fn ctx<'a>(nav: Decimal, rate: Decimal, position: Option<&'a Position>) -> StagingContext<'a> {
        StagingContext {
            nav,
            base_ccy: "GBP",
            quote_ccy: "USD",
            base_to_quote: rate,
            position,
        }
    }

    fn held(qty: Decimal) -> Position {
        Position {
            id: 7,
            symbol: "AAPL".to_string(),
            qty,
            avg_cost_ccy: dec!(10),
            currency: "USD".to_string(),
            fx_to_base: dec!(0.8),
            cost_base: qty * dec!(8),
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    #[test]
    fn buy_is_capped_at_max_position_pct() {
        let draft = stager()
            .stage("AAPL", Stance::Buy, dec!(0.20), &ctx(dec!(1000), dec!(1.25), None))
            .unwrap()
            .unwrap();
        assert_eq!(draft.side, OrderSide::Buy);
        assert_eq!(draft.qty, Decimal::ZERO);
        assert_eq!(draft.notional_ccy, dec!(187.5));
        assert_eq!(draft.currency, "USD");
        assert_eq!(draft.fx_to_base, dec!(0.8));
        assert_eq!(draft.origin, Stance::Buy);
    }

    #[test]
    fn small_weight_is_used_when_below_cap() {
        let draft = stager()
            .stage("AAPL", Stance::BuySmall, dec!(0.05), &ctx(dec!(1000), Decimal::ONE, None))
            .unwrap()
            .unwrap();
        assert_eq!(draft.notional_ccy, dec!(50));
        assert_eq!(draft.fx_to_base, Decimal::ONE);
    }

    #[test]
    fn non_positive_target_stages_nothing() {
        let none = stager()
            .stage("AAPL", Stance::Buy, Decimal::ZERO, &ctx(dec!(1000), dec!(1.25), None))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        let err = stager()
            .stage("AAPL", Stance::Buy, dec!(0.1), &ctx(dec!(1000), Decimal::ZERO, None))
            .unwrap_err();
        assert!(matches!(err, RiskError::InvalidRate { .. }));
    }

    #[test]
    fn sell_stages_full_quantity_in_position_currency() {
        let position = held(dec!(10));
        let draft = stager()
            .stage("AAPL", Stance::Sell, dec!(0.1), &ctx(dec!(1000), dec!(1.25), Some(&position)))
            .unwrap()
            .unwrap();
        assert_eq!(draft.side, OrderSide::Sell);
        assert_eq!(draft.qty, dec!(10));
        assert_eq!(draft.notional_ccy, Decimal::ZERO);
        assert_eq!(draft.fx_to_base, dec!(0.8));
    }

    #[test]
    fn trim_sells_configured_fraction() {
        let position = held(dec!(10));
        let draft = stager()
            .stage("AAPL", Stance::Trim, dec!(0.1), &ctx(dec!(1000), dec!(1.25), Some(&position)))
            .unwrap()
            .unwrap();
        assert_eq!(draft.qty, dec!(2.5));
        assert_eq!(draft.origin, Stance::Trim);

        let half = OrderStager::new(Sizing {
            trim_fraction: dec!(0.5),
            ..Sizing::default()
        })
        .unwrap();
        let draft = half
            .stage("AAPL", Stance::Trim, dec!(0.1), &ctx(dec!(1000), dec!(1.25), Some(&position)))
            .unwrap()
            .unwrap();
        assert_eq!(draft.qty, dec!(5));
    }

    #[test]
    fn sell_without_position_stages_nothing() {
        let none = stager()
            .stage("AAPL", Stance::Sell, dec!(0.1), &ctx(dec!(1000), dec!(1.25), None))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn passive_stances_stage_nothing() {
        let position = held(dec!(10));
        for stance in [Stance::Avoid, Stance::Watch, Stance::Hold] {
            let out = stager()
                .stage("AAPL", stance, dec!(0.5), &ctx(dec!(1000), dec!(1.25), Some(&position)))
                .unwrap();
            assert!(out.is_none());
        }
    }

    #[test]
    fn invalid_sizing_is_rejected() {
        let bad = Sizing {
            max_pos_pct: dec!(1.5),
            ..Sizing::default()
        };
        assert!(OrderStager::new(bad).is_err());
    }
}
