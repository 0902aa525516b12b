//! Chaser Core - Martingale Chaser Trading Engine
//!
//! A single-instrument automated trading engine for a crypto derivatives
//! venue. Three long-lived threads cooperate around a lock-free order
//! book:
//!
//! ```text
//!  venue feed ──▶ [ingest thread] ──▶ OrderBook (lock-free, top 10)
//!                                          │ reads
//!                                          ▼
//!  venue trade ◀─ [execution thread] ◀─ [strategy thread]
//!       │               ▲                  │
//!       └── acks/fills ─┘ status queue     └─▶ durable order buffer
//!                                              (shm stream + codec)
//! ```
//!
//! - [`orderbook`] — single-writer / multi-reader top-of-book ladder,
//!   published with release/acquire ordering on the level counts.
//! - [`strategy`] — the martingale chaser state machine: maker entries
//!   inside the spread, chase-cancel, resting take-profit, aggressive
//!   stop-loss close, and double-and-reverse escalation.
//! - [`gateway`] — request/response session over the private trade
//!   stream, correlated solely by bot-generated client ids.
//! - [`durable`] — fixed-layout binary codec and the shared-memory
//!   mirror of the active order used for crash recovery.
//! - [`engine`] — thread wiring, shutdown flag, run statistics.
//!
//! The venue's JSON shapes live entirely inside [`gateway`] and [`feed`];
//! the strategy trades through the [`gateway::ExecutionLink`] seam and
//! can be wired to any implementation of it.

pub mod config;
pub mod core;
pub mod durable;
pub mod engine;
pub mod feed;
pub mod gateway;
pub mod orderbook;
pub mod resilience;
pub mod strategy;

pub use config::Config;
pub use engine::{Engine, EngineStats};

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{Config, Credentials};
    pub use crate::core::{ClientId, Direction, OrderStatus, Side, TradeStats};
    pub use crate::engine::{Engine, EngineStats};
    pub use crate::gateway::{ExecutionLink, OrderSink, PlaceOrder};
    pub use crate::orderbook::{OrderBook, OrderBookManager, PriceLevel};
    pub use crate::strategy::{BotState, MartingaleChaser};
    pub use crate::{Error, Result};
}
