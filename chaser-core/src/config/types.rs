use crate::durable::TransportConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Martingale chaser parameters and timers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Base order quantity; the martingale ladder starts here
    pub qty_base: f64,

    /// Maximum doubling steps before a hard reset
    pub step_max: u32,

    /// Profit target as a fraction of entry price
    pub tp_pct: f64,

    /// Stop-loss threshold as a positive fraction of entry price
    pub sl_pct: f64,

    /// Acknowledgement timeout for placements and cancels (ms)
    pub t_order_ms: u64,

    /// Maximum age of a working order before a forced refresh (ms)
    pub t_stale_ms: u64,

    /// Minimum order age before chase evaluation (ms)
    pub t_grace_ms: u64,

    /// Instrument tick size used for all price offsets
    pub tick_size: f64,

    /// Inside-spread offset from mid, in ticks
    pub entry_offset_ticks: f64,

    /// Minimum distance from the far touch so a post-only entry cannot
    /// cross, in ticks
    pub safety_ticks: f64,

    /// Price distance that triggers a chase-cancel of a working order
    pub chase_threshold: f64,

    /// How far an aggressive close crosses the touch, in ticks
    pub close_aggression_ticks: f64,

    /// Strategy loop sleep between ticks (µs)
    pub tick_interval_us: u64,
}

impl StrategyConfig {
    pub fn t_order(&self) -> Duration {
        Duration::from_millis(self.t_order_ms)
    }

    pub fn t_stale(&self) -> Duration {
        Duration::from_millis(self.t_stale_ms)
    }

    pub fn t_grace(&self) -> Duration {
        Duration::from_millis(self.t_grace_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(self.tick_interval_us)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            qty_base: 0.001,
            step_max: 6,
            tp_pct: 0.0005,
            sl_pct: 0.001,
            t_order_ms: 5_000,
            t_stale_ms: 10_000,
            t_grace_ms: 500,
            tick_size: 0.01,
            entry_offset_ticks: 0.0,
            safety_ticks: 1.0,
            chase_threshold: 50.0,
            close_aggression_ticks: 10.0,
            tick_interval_us: 1_000,
        }
    }
}

/// Venue session endpoints and wire options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    /// Public market-data stream URL
    pub public_ws_url: String,

    /// Private trade stream URL
    pub trade_ws_url: String,

    /// Orderbook subscription depth (topic `orderbook.<depth>.<symbol>`)
    pub depth: u32,

    /// Product category forwarded on order requests
    pub category: String,

    /// Time-in-force for crossing (non-maker) orders
    pub taker_time_in_force: String,

    /// Validity window for the auth signature (ms)
    pub auth_window_ms: u64,

    /// Socket read timeout, doubling as the session poll cadence (ms)
    pub read_timeout_ms: u64,

    /// When false the gateway logs order requests instead of sending them
    pub enable_trading: bool,
}

impl VenueConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Durable channel wiring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableConfig {
    /// Master switch for the durable layer
    #[serde(default)]
    pub enable: bool,

    /// Stream id for book snapshots
    #[serde(default = "default_orderbook_stream")]
    pub orderbook_stream_id: i32,

    /// Stream id for trade signals and order records
    #[serde(default = "default_signal_stream")]
    pub signal_stream_id: i32,

    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_orderbook_stream() -> i32 {
    1001
}

fn default_signal_stream() -> i32 {
    1002
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            enable: false,
            orderbook_stream_id: default_orderbook_stream(),
            signal_stream_id: default_signal_stream(),
            transport: TransportConfig::default(),
        }
    }
}

/// Logging switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// Venue API credentials, environment-only
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    /// Read `BYBIT_API_KEY` / `BYBIT_API_SECRET` from the environment
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("BYBIT_API_KEY").context("BYBIT_API_KEY is not set")?;
        let api_secret =
            std::env::var("BYBIT_API_SECRET").context("BYBIT_API_SECRET is not set")?;
        Ok(Self { api_key, api_secret })
    }
}
