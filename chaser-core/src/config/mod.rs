//! Layered configuration
//!
//! A TOML file provides the base; `CHASER__`-prefixed environment
//! variables override individual keys. API credentials never live in the
//! file, only in the environment.

mod types;

pub use types::{
    Credentials, DurableConfig, LoggingConfig, StrategyConfig, VenueConfig,
};

use anyhow::{Context, Result};
use ::config::{Config as ConfigLoader, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Instrument traded, e.g. "BTCUSDT"
    pub symbol: String,
    pub strategy: StrategyConfig,
    pub venue: VenueConfig,
    #[serde(default)]
    pub durable: DurableConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `path` with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let loader = ConfigLoader::builder()
            .set_default("strategy.qty_base", 0.001)?
            .set_default("strategy.step_max", 6)?
            .set_default("strategy.tp_pct", 0.0005)?
            .set_default("strategy.sl_pct", 0.001)?
            .set_default("strategy.t_order_ms", 5_000)?
            .set_default("strategy.t_stale_ms", 10_000)?
            .set_default("strategy.t_grace_ms", 500)?
            .set_default("strategy.tick_size", 0.01)?
            .set_default("strategy.entry_offset_ticks", 0.0)?
            .set_default("strategy.safety_ticks", 1.0)?
            .set_default("strategy.chase_threshold", 50.0)?
            .set_default("strategy.close_aggression_ticks", 10.0)?
            .set_default("strategy.tick_interval_us", 1_000)?
            .set_default("venue.depth", 50)?
            .set_default("venue.category", "linear")?
            .set_default("venue.taker_time_in_force", "IOC")?
            .set_default("venue.auth_window_ms", 5_000)?
            .set_default("venue.read_timeout_ms", 50)?
            .set_default("venue.enable_trading", false)?
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("CHASER").separator("__"))
            .build()
            .context("failed to build configuration")?;

        let cfg: Config = loader
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            anyhow::bail!("symbol must not be empty");
        }
        if self.strategy.qty_base <= 0.0 {
            anyhow::bail!("strategy.qty_base must be positive");
        }
        if self.strategy.tp_pct <= 0.0 {
            anyhow::bail!("strategy.tp_pct must be positive");
        }
        if self.strategy.sl_pct <= 0.0 {
            anyhow::bail!("strategy.sl_pct must be positive (absolute magnitude)");
        }
        if self.strategy.tick_size <= 0.0 {
            anyhow::bail!("strategy.tick_size must be positive");
        }
        if self.strategy.chase_threshold <= 0.0 {
            anyhow::bail!("strategy.chase_threshold must be positive");
        }
        if self.strategy.step_max > 20 {
            anyhow::bail!(
                "strategy.step_max {} doubles size past any sane exposure",
                self.strategy.step_max
            );
        }
        if self.strategy.t_order_ms == 0 || self.strategy.t_stale_ms == 0 {
            anyhow::bail!("strategy timeouts must be positive");
        }
        for (name, url) in [
            ("venue.public_ws_url", &self.venue.public_ws_url),
            ("venue.trade_ws_url", &self.venue.trade_ws_url),
        ] {
            if !url.starts_with("wss://") && !url.starts_with("ws://") {
                anyhow::bail!("{} must be a ws:// or wss:// URL, got '{}'", name, url);
            }
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.log_level.as_str()) {
            anyhow::bail!(
                "invalid log level '{}', must be one of {:?}",
                self.logging.log_level,
                valid_levels
            );
        }
        Ok(())
    }
}
