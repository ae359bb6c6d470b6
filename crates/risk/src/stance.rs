use configuration::RiskThresholds;
use core_types::{Action, DecisionTag, Position, Rationale, RiskSnapshot, Signal, Stance};

/// Risk flags derived from a signal's risk map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RiskFlags {
    pub overheated: bool,
    pub too_volatile: bool,
}

impl RiskFlags {
    pub fn any(&self) -> bool {
        self.overheated || self.too_volatile
    }
}

/// Maps a signal, the previous stance and the current holding to a stance.
///
/// The resolver is a pure function of its inputs: the same signal, previous
/// stance and position always produce the same stance and rationale.
#[derive(Debug, Clone)]
pub struct StanceResolver {
    thresholds: RiskThresholds,
}

impl StanceResolver {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    pub fn flags(&self, risk: &RiskSnapshot) -> RiskFlags {
        let t = &self.thresholds;
        RiskFlags {
            overheated: risk.bubble_score >= t.bubble_score_max
                || (risk.rsi_14 >= t.rsi_overbought && risk.sharpe_1y < t.sharpe_floor),
            too_volatile: risk.vol_30d >= t.vol_30d_max || risk.max_dd_1y <= t.max_dd_floor,
        }
    }

    /// Resolves the stance for one signal.
    ///
    /// Rules are checked in priority order and the first match wins:
    /// an `avoid` action, then the risk flags, then the holding branch, then
    /// the flat branch. A position only counts as held when it is open with a
    /// positive quantity.
    pub fn resolve(
        &self,
        signal: &Signal,
        previous: Option<Stance>,
        position: Option<&Position>,
    ) -> (Stance, Rationale) {
        let action = Action::parse(&signal.action);
        let holding = position.is_some_and(Position::is_open);
        let flags = self.flags(&signal.risk);

        let (stance, decision) = match (&action, holding) {
            (Action::Avoid, true) => (Stance::Sell, DecisionTag::SellOnAvoid),
            (Action::Avoid, false) => (Stance::Avoid, DecisionTag::AvoidFlat),
            _ if flags.any() && holding => (Stance::Trim, DecisionTag::TrimOnRisk),
            _ if flags.any() => (Stance::Watch, DecisionTag::WatchOnRisk),
            (Action::Buy | Action::BuySmall, true) => (Stance::Hold, DecisionTag::HoldOnBuy),
            (Action::Watch, true) => (Stance::Hold, DecisionTag::HoldOnWatch),
            (_, true) => (Stance::Hold, DecisionTag::Hold),
            (Action::Buy, false) => (Stance::Buy, DecisionTag::InitBuy),
            (Action::BuySmall, false) => (Stance::BuySmall, DecisionTag::InitBuySmall),
            (Action::Watch, false) if previous == Some(Stance::Watch) => {
                (Stance::BuySmall, DecisionTag::EscalateWatch)
            }
            (Action::Watch, false) => (Stance::Watch, DecisionTag::WatchFlat),
            (Action::Other(_), false) => (Stance::Watch, DecisionTag::WatchFallback),
        };

        let rationale = Rationale {
            previous: previous.map(|s| s.as_str().to_string()).unwrap_or_default(),
            action: action.as_str().to_string(),
            weight: signal.weight,
            risk: signal.risk,
            decision,
        };
        (stance, rationale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use core_types::PositionStatus;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn resolver() -> StanceResolver {
        StanceResolver::new(RiskThresholds::default())
    }

    fn signal(action: &str, risk: RiskSnapshot) -> Signal {
        Signal {
            symbol: "AAPL".to_string(),
            as_of_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            model_run_id: "run-1".to_string(),
            action: action.to_string(),
            weight: dec!(0.2),
            confidence: dec!(0.7),
            risk,
        }
    }

    fn position(qty: Decimal) -> Position {
        Position {
            id: 1,
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
    fn avoid_sells_a_holding_and_avoids_when_flat() {
        let held = position(dec!(10));
        let (stance, why) = resolver().resolve(&signal("avoid", RiskSnapshot::default()), None, Some(&held));
        assert_eq!(stance, Stance::Sell);
        assert_eq!(why.decision, DecisionTag::SellOnAvoid);

        let (stance, why) = resolver().resolve(&signal("AVOID", RiskSnapshot::default()), None, None);
        assert_eq!(stance, Stance::Avoid);
        assert_eq!(why.decision, DecisionTag::AvoidFlat);
    }

    #[test]
    fn bubble_risk_trims_a_holding() {
        let risk = RiskSnapshot {
            bubble_score: dec!(0.8),
            ..Default::default()
        };
        let held = position(dec!(5));
        let (stance, why) = resolver().resolve(&signal("buy", risk), None, Some(&held));
        assert_eq!(stance, Stance::Trim);
        assert_eq!(why.decision, DecisionTag::TrimOnRisk);

        let (stance, _) = resolver().resolve(&signal("buy", risk), None, None);
        assert_eq!(stance, Stance::Watch);
    }

    #[test]
    fn overbought_only_counts_with_weak_sharpe() {
        let hot = RiskSnapshot {
            rsi_14: dec!(80),
            sharpe_1y: dec!(0.5),
            ..Default::default()
        };
        assert!(resolver().flags(&hot).overheated);

        let strong = RiskSnapshot {
            sharpe_1y: dec!(1.2),
            ..hot
        };
        assert!(!resolver().flags(&strong).overheated);
        let (stance, _) = resolver().resolve(&signal("buy", strong), None, None);
        assert_eq!(stance, Stance::Buy);
    }

    #[test]
    fn volatility_and_drawdown_thresholds_are_inclusive() {
        let vol = RiskSnapshot {
            vol_30d: dec!(0.60),
            ..Default::default()
        };
        assert!(resolver().flags(&vol).too_volatile);
        let dd = RiskSnapshot {
            max_dd_1y: dec!(-0.45),
            ..Default::default()
        };
        assert!(resolver().flags(&dd).too_volatile);
    }

    #[test]
    fn repeated_watch_escalates_when_flat() {
        let sig = signal("watch", RiskSnapshot::default());
        let (stance, why) = resolver().resolve(&sig, Some(Stance::Watch), None);
        assert_eq!(stance, Stance::BuySmall);
        assert_eq!(why.decision, DecisionTag::EscalateWatch);
        assert_eq!(why.previous, "watch");

        let (stance, why) = resolver().resolve(&sig, Some(Stance::Hold), None);
        assert_eq!(stance, Stance::Watch);
        assert_eq!(why.decision, DecisionTag::WatchFlat);
    }

    #[test]
    fn holdings_are_held_whatever_the_action() {
        let held = position(dec!(3));
        for action in ["buy", "buy_small", "watch", "accumulate"] {
            let (stance, _) = resolver().resolve(&signal(action, RiskSnapshot::default()), None, Some(&held));
            assert_eq!(stance, Stance::Hold, "action {action}");
        }
    }

    #[test]
    fn zero_quantity_position_counts_as_flat() {
        let empty = position(Decimal::ZERO);
        let (stance, _) = resolver().resolve(&signal("avoid", RiskSnapshot::default()), None, Some(&empty));
        assert_eq!(stance, Stance::Avoid);
    }

    #[test]
    fn unknown_action_falls_back_to_watch() {
        let (stance, why) = resolver().resolve(&signal("Accumulate", RiskSnapshot::default()), None, None);
        assert_eq!(stance, Stance::Watch);
        assert_eq!(why.decision, DecisionTag::WatchFallback);
        assert_eq!(why.action, "accumulate");
    }

    #[test]
    fn resolution_is_deterministic() {
        let sig = signal("watch", RiskSnapshot::default());
        let first = resolver().resolve(&sig, Some(Stance::Watch), None);
        let second = resolver().resolve(&sig, Some(Stance::Watch), None);
        assert_eq!(first, second);
    }
}
