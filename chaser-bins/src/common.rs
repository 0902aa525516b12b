//! Common utilities for all binaries
//!
//! Shared CLI parsing, logging initialization and final statistics
//! reporting.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Common CLI arguments for all binaries
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Log level override (defaults to the configured level)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

/// Initialize tracing; JSON output when the config asks for it
pub fn init_logging(level: &str, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .init();
    }
    Ok(())
}

/// Print final statistics
pub fn print_stats(stats: &chaser_core::EngineStats) {
    tracing::info!("=== Final Statistics ===");
    tracing::info!("Feed messages: {}", stats.feed.messages_received);
    tracing::info!("Book updates:  {}", stats.feed.updates_applied);
    if let Some(gateway) = &stats.gateway {
        tracing::info!("Orders sent:   {}", gateway.orders_sent);
        tracing::info!("Cancels sent:  {}", gateway.cancels_sent);
    }
    if let Some(trading) = &stats.trading {
        tracing::info!(
            "Trades:        {} ({} wins, {:.1}% win rate)",
            trading.trades,
            trading.wins,
            trading.win_rate() * 100.0
        );
        tracing::info!("Total PnL:     {:.6}", trading.total_profit);
    }
}
