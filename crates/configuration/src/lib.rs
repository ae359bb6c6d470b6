// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use logging::init_tracing;
pub use settings::{
    ConfigPatch, DatabaseSettings, EngineConfig, Frictions, FxSettings, LoggingSettings,
    PortfolioSettings, RiskThresholds, SettlementSettings, Sizing,
};

/// Prefix for environment overrides, e.g. `PAPERFOLIO__SIZING__MAX_POS_PCT=0.1`.
pub const ENV_PREFIX: &str = "PAPERFOLIO";

/// Loads the engine configuration.
///
/// Values come from the built-in defaults, then the TOML file at `path` (optional,
/// missing files are skipped), then `PAPERFOLIO__*` environment variables. The
/// merged result is validated before it is returned.
pub fn load_config(path: &str) -> Result<EngineConfig, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    // Attempt to deserialize the entire configuration into our `EngineConfig` struct
    let config = builder.try_deserialize::<EngineConfig>()?;
    config.validate()?;

    tracing::debug!(?config, "Configuration loaded");
    Ok(config)
}
