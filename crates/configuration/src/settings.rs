use crate::error::ConfigError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// The root configuration structure for the engine.
///
/// A loaded `EngineConfig` is never mutated. Changing a setting produces a new
/// snapshot through [`EngineConfig::patched`], so batches already running keep
/// the values they started with.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub portfolio: PortfolioSettings,
    pub sizing: Sizing,
    pub frictions: Frictions,
    pub fx: FxSettings,
    pub risk_thresholds: RiskThresholds,
    pub settlement: SettlementSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioSettings {
    /// The currency NAV, cash and the ledger are kept in.
    pub base_ccy: String,
    /// Cash used to seed the portfolio row the first time the store is opened.
    pub start_cash: Decimal,
}

impl Default for PortfolioSettings {
    fn default() -> Self {
        Self {
            base_ccy: "GBP".to_string(),
            start_cash: dec!(100),
        }
    }
}

/// Position sizing limits applied when staging orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sizing {
    /// Maximum fraction of NAV a single new position may take (e.g. 0.15).
    pub max_pos_pct: Decimal,
    /// Fraction of the open quantity sold by a trim.
    pub trim_fraction: Decimal,
}

impl Default for Sizing {
    fn default() -> Self {
        Self {
            max_pos_pct: dec!(0.15),
            trim_fraction: dec!(0.25),
        }
    }
}

/// Trading frictions applied at fill time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frictions {
    /// Adverse move applied to the opening price, in basis points.
    pub slippage_bps: Decimal,
    /// Broker commission in basis points of the base-currency notional.
    pub fee_bps: Decimal,
    /// Minimum commission per fill, in base currency.
    pub min_fee: Decimal,
}

impl Frictions {
    pub fn slippage_rate(&self) -> Decimal {
        self.slippage_bps / dec!(10000)
    }

    pub fn fee_rate(&self) -> Decimal {
        self.fee_bps / dec!(10000)
    }
}

impl Default for Frictions {
    fn default() -> Self {
        Self {
            slippage_bps: dec!(10),
            fee_bps: dec!(5),
            min_fee: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FxSettings {
    /// Instrument currency assumed for a symbol with no known price history.
    pub default_quote_ccy: String,
    /// Base -> quote rate used by the decision run when the FX table has no data.
    pub fallback_rate: Decimal,
}

impl Default for FxSettings {
    fn default() -> Self {
        Self {
            default_quote_ccy: "USD".to_string(),
            fallback_rate: dec!(1.25),
        }
    }
}

/// Cut-offs that turn a signal's risk map into the overheated / too-volatile flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub bubble_score_max: Decimal,
    pub rsi_overbought: Decimal,
    pub sharpe_floor: Decimal,
    pub vol_30d_max: Decimal,
    pub max_dd_floor: Decimal,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            bubble_score_max: dec!(0.75),
            rsi_overbought: dec!(75),
            sharpe_floor: dec!(0.8),
            vol_30d_max: dec!(0.60),
            max_dd_floor: dec!(-0.45),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementSettings {
    /// A sell within this quantity of the open size closes the position.
    pub close_epsilon: Decimal,
    /// Lower bound for NAV when deriving leverage.
    pub nav_floor: Decimal,
    /// A settlement lock older than this is treated as abandoned.
    pub lock_lease_secs: u64,
    /// Deadline for a single decision or fill batch.
    pub batch_timeout_secs: u64,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            close_epsilon: dec!(0.000000001),
            nav_floor: dec!(0.000001),
            lock_lease_secs: 300,
            batch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://data/paperfolio.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// A partial update to the live-tunable settings.
///
/// Field names follow the flat keys operators already use (`max_pos_pct`,
/// `slippage_bps`, ...). Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[serde(default, deny_unknown_fields)]
pub struct ConfigPatch {
    #[cfg_attr(feature = "clap", arg(long))]
    pub max_pos_pct: Option<Decimal>,
    #[cfg_attr(feature = "clap", arg(long))]
    pub trim_fraction: Option<Decimal>,
    #[cfg_attr(feature = "clap", arg(long))]
    pub slippage_bps: Option<Decimal>,
    #[cfg_attr(feature = "clap", arg(long))]
    pub fee_bps: Option<Decimal>,
    #[cfg_attr(feature = "clap", arg(long))]
    pub min_fee: Option<Decimal>,
    #[cfg_attr(feature = "clap", arg(long))]
    pub default_quote_ccy: Option<String>,
    #[cfg_attr(feature = "clap", arg(long))]
    pub fx_fallback_rate: Option<Decimal>,
}

impl EngineConfig {
    /// Returns a new, validated snapshot with `patch` applied. `self` is untouched.
    pub fn patched(&self, patch: &ConfigPatch) -> Result<EngineConfig, ConfigError> {
        let mut next = self.clone();
        if let Some(v) = patch.max_pos_pct {
            next.sizing.max_pos_pct = v;
        }
        if let Some(v) = patch.trim_fraction {
            next.sizing.trim_fraction = v;
        }
        if let Some(v) = patch.slippage_bps {
            next.frictions.slippage_bps = v;
        }
        if let Some(v) = patch.fee_bps {
            next.frictions.fee_bps = v;
        }
        if let Some(v) = patch.min_fee {
            next.frictions.min_fee = v;
        }
        if let Some(v) = &patch.default_quote_ccy {
            next.fx.default_quote_ccy = v.trim().to_uppercase();
        }
        if let Some(v) = patch.fx_fallback_rate {
            next.fx.fallback_rate = v;
        }
        next.validate()?;
        Ok(next)
    }

    /// Rejects settings that would make sizing or settlement arithmetic meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ccy("portfolio.base_ccy", &self.portfolio.base_ccy)?;
        check_ccy("fx.default_quote_ccy", &self.fx.default_quote_ccy)?;
        if self.portfolio.start_cash <= Decimal::ZERO {
            return Err(invalid("portfolio.start_cash must be positive"));
        }
        if self.sizing.max_pos_pct <= Decimal::ZERO || self.sizing.max_pos_pct > Decimal::ONE {
            return Err(invalid("sizing.max_pos_pct must be within (0, 1]"));
        }
        if self.sizing.trim_fraction <= Decimal::ZERO || self.sizing.trim_fraction > Decimal::ONE {
            return Err(invalid("sizing.trim_fraction must be within (0, 1]"));
        }
        if self.frictions.slippage_bps < Decimal::ZERO || self.frictions.slippage_bps >= dec!(10000) {
            return Err(invalid("frictions.slippage_bps must be within [0, 10000)"));
        }
        if self.frictions.fee_bps < Decimal::ZERO {
            return Err(invalid("frictions.fee_bps must not be negative"));
        }
        if self.frictions.min_fee < Decimal::ZERO {
            return Err(invalid("frictions.min_fee must not be negative"));
        }
        if self.fx.fallback_rate <= Decimal::ZERO {
            return Err(invalid("fx.fallback_rate must be positive"));
        }
        if self.settlement.close_epsilon < Decimal::ZERO {
            return Err(invalid("settlement.close_epsilon must not be negative"));
        }
        if self.settlement.nav_floor <= Decimal::ZERO {
            return Err(invalid("settlement.nav_floor must be positive"));
        }
        if self.settlement.lock_lease_secs == 0 || self.settlement.lock_lease_secs > MAX_LOCK_LEASE_SECS {
            return Err(invalid("settlement.lock_lease_secs must be within (0, 604800]"));
        }
        if self.settlement.batch_timeout_secs == 0 {
            return Err(invalid("settlement.batch_timeout_secs must be positive"));
        }
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections must be positive"));
        }
        Ok(())
    }
}

/// One week.
const MAX_LOCK_LEASE_SECS: u64 = 7 * 24 * 60 * 60;

fn check_ccy(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.len() == 3 && value.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "{field} must be an upper-case 3-letter code, got '{value}'"
        )))
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        EngineConfig::default().validate().unwrap();
        let frictions = Frictions::default();
        assert_eq!(frictions.slippage_rate(), dec!(0.001));
        assert_eq!(frictions.fee_rate(), dec!(0.0005));
    }

    #[test]
    fn patch_returns_new_snapshot_and_leaves_original() {
        let original = EngineConfig::default();
        let patch = ConfigPatch {
            max_pos_pct: Some(dec!(0.10)),
            trim_fraction: Some(dec!(0.5)),
            default_quote_ccy: Some("eur".to_string()),
            ..Default::default()
        };
        let next = original.patched(&patch).unwrap();

        assert_eq!(next.sizing.max_pos_pct, dec!(0.10));
        assert_eq!(next.sizing.trim_fraction, dec!(0.5));
        assert_eq!(next.fx.default_quote_ccy, "EUR");
        assert_eq!(original.sizing.max_pos_pct, dec!(0.15));
        assert_eq!(original.fx.default_quote_ccy, "USD");
    }

    #[test]
    fn patch_is_rejected_when_result_is_invalid() {
        let original = EngineConfig::default();
        let patch = ConfigPatch {
            trim_fraction: Some(dec!(1.5)),
            ..Default::default()
        };
        assert!(matches!(
            original.patched(&patch),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn patch_rejects_unknown_keys() {
        let parsed: Result<ConfigPatch, _> = serde_json::from_str(r#"{"max_leverage": 2}"#);
        assert!(parsed.is_err());
    }
}
