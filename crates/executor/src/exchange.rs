use crate::error::ExecutorError;
use chrono::{DateTime, Utc};
use configuration::Frictions;
use core_types::{Fill, Order, OrderSide};
use rust_decimal::Decimal;

/// Everything needed to price one order at the open.
#[derive(Debug, Clone)]
pub struct FillRequest<'a> {
    pub order: &'a Order,
    /// Quantity to sell. Ignored for buys, whose quantity follows from the notional.
    pub sell_qty: Decimal,
    /// Opening price in `currency`.
    pub open: Decimal,
    /// Currency the opening price is quoted in.
    pub currency: &'a str,
    /// Base -> `currency` rate; 1 when `currency` is the base currency.
    pub base_to_quote: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A generic trait for pricing a fill.
///
/// Implementations compute the effect of a trade (price, quantity, fee)
/// but **do not modify any book or portfolio state**. The caller applies the
/// returned `Fill`.
pub trait Executor: Send + Sync {
    fn execute(&self, request: &FillRequest<'_>) -> Result<Fill, ExecutorError>;
}

/// Next-open fill simulation with proportional slippage and a floored fee.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    frictions: Frictions,
}

impl SimulatedExecutor {
    pub fn new(frictions: Frictions) -> Self {
        Self { frictions }
    }

    /// Opening price moved against the order by the slippage rate.
    pub fn fill_price(&self, side: OrderSide, open: Decimal) -> Decimal {
        let slip = self.frictions.slippage_rate();
        match side {
            OrderSide::Buy => open * (Decimal::ONE + slip),
            OrderSide::Sell => open * (Decimal::ONE - slip),
        }
    }

    /// Commission on a base-currency notional, never below `min_fee`.
    pub fn fee(&self, notional_base: Decimal) -> Decimal {
        (notional_base * self.frictions.fee_rate()).max(self.frictions.min_fee)
    }
}

impl Executor for SimulatedExecutor {
    fn execute(&self, request: &FillRequest<'_>) -> Result<Fill, ExecutorError> {
        let order = request.order;
        if request.open <= Decimal::ZERO {
            return Err(ExecutorError::InvalidPrice {
                symbol: order.symbol.clone(),
                price: request.open,
            });
        }
        if request.base_to_quote <= Decimal::ZERO {
            return Err(ExecutorError::InvalidRate {
                currency: request.currency.to_string(),
                rate: request.base_to_quote,
            });
        }

        let fill_price = self.fill_price(order.side, request.open);
        let fx_to_base = Decimal::ONE / request.base_to_quote;

        let (qty, gross_base) = match order.side {
            OrderSide::Buy => {
                if order.notional_ccy <= Decimal::ZERO {
                    return Err(ExecutorError::InvalidOrder {
                        order_id: order.id,
                        reason: format!("buy notional {} is not positive", order.notional_ccy),
                    });
                }
                if order.currency != request.currency {
                    return Err(ExecutorError::CurrencyMismatch {
                        symbol: order.symbol.clone(),
                        expected: order.currency.clone(),
                        actual: request.currency.to_string(),
                    });
                }
                (order.notional_ccy / fill_price, order.notional_ccy * fx_to_base)
            }
            OrderSide::Sell => {
                if request.sell_qty <= Decimal::ZERO {
                    return Err(ExecutorError::InvalidOrder {
                        order_id: order.id,
                        reason: format!("sell quantity {} is not positive", request.sell_qty),
                    });
                }
                (request.sell_qty, request.sell_qty * fill_price * fx_to_base)
            }
        };

        let fee_base = self.fee(gross_base);
        tracing::debug!(
            order_id = order.id,
            symbol = %order.symbol,
            side = order.side.as_str(),
            %fill_price,
            %qty,
            %gross_base,
            %fee_base,
            "Priced fill"
        );

        Ok(Fill {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            fill_price,
            qty,
            currency: request.currency.to_string(),
            fx_to_base,
            gross_base,
            fee_base,
            timestamp: request.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::OrderStatus;
    use rust_decimal_macros::dec;

    fn order(side: OrderSide, qty: Decimal, notional: Decimal) -> Order {
        Order {
            id: 1,
            symbol: "AAPL".to_string(),
            side,
            qty,
            notional_ccy: notional,
            currency: "USD".to_string(),
            fx_to_base: dec!(0.8),
            status: OrderStatus::New,
            origin: None,
            decision_date: None,
            fill_price: None,
            fee_base: None,
            created_at: Utc::now(),
            filled_at: None,
        }
    }

    fn request<'a>(order: &'a Order, sell_qty: Decimal, rate: Decimal) -> FillRequest<'a> {
        FillRequest {
            order,
            sell_qty,
            open: dec!(10),
            currency: "USD",
            base_to_quote: rate,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn buy_pays_slippage_and_sizes_from_notional() {
        let executor = SimulatedExecutor::new(Frictions::default());
        let buy = order(OrderSide::Buy, Decimal::ZERO, dec!(150));
        let fill = executor.execute(&request(&buy, Decimal::ZERO, Decimal::ONE)).unwrap();

        assert_eq!(fill.fill_price, dec!(10.01));
        assert_eq!(fill.qty.round_dp(6), dec!(14.985015));
        assert_eq!(fill.gross_base, dec!(150));
        assert_eq!(fill.fee_base, dec!(0.075));
    }

    #[test]
    fn sell_receives_less_than_open_and_converts_to_base() {
        let executor = SimulatedExecutor::new(Frictions::default());
        let sell = order(OrderSide::Sell, dec!(4), Decimal::ZERO);
        let fill = executor.execute(&request(&sell, dec!(4), dec!(1.25))).unwrap();

        assert_eq!(fill.fill_price, dec!(9.99));
        assert_eq!(fill.fx_to_base, dec!(0.8));
        assert_eq!(fill.gross_base, dec!(31.968));
    }

    #[test]
    fn minimum_fee_applies_to_small_fills() {
        let executor = SimulatedExecutor::new(Frictions {
            min_fee: dec!(1),
            ..Frictions::default()
        });
        assert_eq!(executor.fee(dec!(150)), dec!(1));
        assert_eq!(executor.fee(dec!(10000)), dec!(5));
    }

    #[test]
    fn buy_in_wrong_currency_is_rejected() {
        let executor = SimulatedExecutor::new(Frictions::default());
        let mut buy = order(OrderSide::Buy, Decimal::ZERO, dec!(150));
        buy.currency = "EUR".to_string();
        let err = executor.execute(&request(&buy, Decimal::ZERO, Decimal::ONE)).unwrap_err();
        assert!(matches!(err, ExecutorError::CurrencyMismatch { .. }));
    }

    #[test]
    fn degenerate_orders_are_rejected() {
        let executor = SimulatedExecutor::new(Frictions::default());
        let buy = order(OrderSide::Buy, Decimal::ZERO, Decimal::ZERO);
        assert!(matches!(
            executor.execute(&request(&buy, Decimal::ZERO, Decimal::ONE)),
            Err(ExecutorError::InvalidOrder { .. })
        ));
        let sell = order(OrderSide::Sell, Decimal::ZERO, Decimal::ZERO);
        assert!(matches!(
            executor.execute(&request(&sell, Decimal::ZERO, Decimal::ONE)),
            Err(ExecutorError::InvalidOrder { .. })
        ));
        let buy = order(OrderSide::Buy, Decimal::ZERO, dec!(150));
        assert!(matches!(
            executor.execute(&request(&buy, Decimal::ZERO, Decimal::ZERO)),
            Err(ExecutorError::InvalidRate { .. })
        ));
    }
}
