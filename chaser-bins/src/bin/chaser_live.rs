//! Live trading binary
//!
//! Loads the configuration, wires up the engine, and runs until Ctrl-C.
//! Exits non-zero on any startup failure (bad config, missing
//! credentials, durable transport unavailable).

use anyhow::Context;
use chaser_bins::common::{init_logging, print_stats, CommonArgs};
use chaser_core::{Config, Engine};
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let args = CommonArgs::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.log_level);
    init_logging(level, config.logging.json_logs)?;

    tracing::info!(
        symbol = %config.symbol,
        qty_base = config.strategy.qty_base,
        step_max = config.strategy.step_max,
        tp_pct = config.strategy.tp_pct,
        sl_pct = config.strategy.sl_pct,
        trading = config.venue.enable_trading,
        "martingale chaser starting"
    );

    let stats = Engine::new(config).run()?;
    print_stats(&stats);
    Ok(())
}
