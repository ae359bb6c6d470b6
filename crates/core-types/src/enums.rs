use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl FromStr for OrderSide {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            other => Err(CoreError::InvalidInput("side".to_string(), other.to_string())),
        }
    }
}

/// Lifecycle of a staged order. `New` -> `Filled` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Filled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Filled => "filled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OrderStatus::New),
            "filled" => Ok(OrderStatus::Filled),
            other => Err(CoreError::InvalidInput("order status".to_string(), other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PositionStatus::Open),
            "closed" => Ok(PositionStatus::Closed),
            other => Err(CoreError::InvalidInput("position status".to_string(), other.to_string())),
        }
    }
}

/// The raw action carried by an upstream signal.
///
/// Parsing is case-insensitive. Anything outside the known vocabulary is kept
/// verbatim (lower-cased) in `Other` so the resolver can fall back safely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Avoid,
    Watch,
    BuySmall,
    Buy,
    Other(String),
}

impl Action {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase();
        match normalized.as_str() {
            "avoid" => Action::Avoid,
            "watch" => Action::Watch,
            "buy_small" => Action::BuySmall,
            "buy" => Action::Buy,
            _ => Action::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Avoid => "avoid",
            Action::Watch => "watch",
            Action::BuySmall => "buy_small",
            Action::Buy => "buy",
            Action::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The categorical recommendation for a symbol on a given date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Avoid,
    Watch,
    BuySmall,
    Buy,
    Hold,
    Trim,
    Sell,
}

impl Stance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stance::Avoid => "avoid",
            Stance::Watch => "watch",
            Stance::BuySmall => "buy_small",
            Stance::Buy => "buy",
            Stance::Hold => "hold",
            Stance::Trim => "trim",
            Stance::Sell => "sell",
        }
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stance {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "avoid" => Ok(Stance::Avoid),
            "watch" => Ok(Stance::Watch),
            "buy_small" => Ok(Stance::BuySmall),
            "buy" => Ok(Stance::Buy),
            "hold" => Ok(Stance::Hold),
            "trim" => Ok(Stance::Trim),
            "sell" => Ok(Stance::Sell),
            other => Err(CoreError::InvalidInput("stance".to_string(), other.to_string())),
        }
    }
}

/// Which branch of the decision table produced a stance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTag {
    SellOnAvoid,
    AvoidFlat,
    TrimOnRisk,
    WatchOnRisk,
    HoldOnBuy,
    HoldOnWatch,
    Hold,
    InitBuy,
    InitBuySmall,
    EscalateWatch,
    WatchFlat,
    WatchFallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parsing_is_case_insensitive() {
        assert_eq!(Action::parse(" BUY_small "), Action::BuySmall);
        assert_eq!(Action::parse("Avoid"), Action::Avoid);
        assert_eq!(Action::parse("Accumulate"), Action::Other("accumulate".to_string()));
    }

    #[test]
    fn stance_string_form_matches_serde() {
        for stance in [
            Stance::Avoid,
            Stance::Watch,
            Stance::BuySmall,
            Stance::Buy,
            Stance::Hold,
            Stance::Trim,
            Stance::Sell,
        ] {
            let json = serde_json::to_string(&stance).unwrap();
            assert_eq!(json, format!("\"{}\"", stance.as_str()));
            assert_eq!(stance.as_str().parse::<Stance>().unwrap(), stance);
        }
    }
}
