//! Engine wiring
//!
//! Spawns the three long-lived execution contexts — market ingest,
//! execution I/O, strategy tick — plus the durable layer, and owns the
//! global shutdown flag. All threads observe the flag at their poll
//! cadence and join promptly once it flips.

use crate::config::{Config, Credentials};
use crate::durable::{DurableContext, OrderBuffer};
use crate::feed::{FeedStats, MarketFeed};
use crate::gateway::{GatewayStats, TradeGateway};
use crate::orderbook::OrderBookManager;
use crate::strategy::{run_strategy, MartingaleChaser, QueueSink};
use crate::core::TradeStats;
use anyhow::{Context as _, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Queue capacities between threads
const STATUS_QUEUE_CAPACITY: usize = 1024;
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Aggregated run statistics, logged at shutdown
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub feed: FeedStats,
    pub gateway: Option<GatewayStats>,
    pub trading: Option<TradeStats>,
}

pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until the shutdown flag flips (Ctrl-C or external trigger).
    ///
    /// Startup failures (transport init, missing credentials) abort with
    /// an error before any thread is spawned; the process maps that to a
    /// non-zero exit.
    pub fn run(self) -> Result<EngineStats> {
        let config = self.config;
        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let shutdown = Arc::clone(&shutdown);
            if let Err(e) = ctrlc::set_handler(move || {
                tracing::warn!("shutdown signal received");
                shutdown.store(true, Ordering::Release);
            }) {
                tracing::warn!(error = %e, "no Ctrl-C handler, shutdown via flag only");
            }
        }

        let books = Arc::new(OrderBookManager::new());

        // Durable layer: explicit context, created before any thread so a
        // failure here aborts startup.
        let mut durable_ctx: Option<DurableContext> = None;
        let mut book_publisher = None;
        let mut buffer: Option<Arc<OrderBuffer>> = None;
        if config.durable.enable {
            let ctx = DurableContext::new(config.durable.transport.clone())
                .context("failed to open durable transport")?;
            book_publisher = Some(
                ctx.create_publisher(config.durable.orderbook_stream_id)
                    .context("failed to create book stream publisher")?,
            );
            let signal_publisher = ctx
                .create_publisher(config.durable.signal_stream_id)
                .context("failed to create signal stream publisher")?;
            let order_buffer = Arc::new(OrderBuffer::new(Some(signal_publisher)));
            match ctx.create_subscriber(config.durable.signal_stream_id) {
                Ok(subscriber) => {
                    if let Err(e) = order_buffer.restore(subscriber.as_ref()) {
                        tracing::warn!(error = %e, "durable restore failed, starting cold");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "no durable subscriber, starting cold"),
            }
            buffer = Some(order_buffer);
            durable_ctx = Some(ctx);
        }

        tracing::info!(
            symbol = %config.symbol,
            trading = config.venue.enable_trading,
            durable = config.durable.enable,
            "engine starting"
        );

        // Market ingest context.
        let feed = MarketFeed::new(
            config.symbol.clone(),
            config.venue.clone(),
            Arc::clone(&books),
            book_publisher,
        );
        let feed_handle: JoinHandle<FeedStats> = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("ingest".to_string())
                .spawn(move || feed.run(shutdown))
                .context("failed to spawn ingest thread")?
        };

        // Execution and strategy contexts, only when trading is enabled.
        let mut gateway_handle_join: Option<JoinHandle<GatewayStats>> = None;
        let mut strategy_join: Option<JoinHandle<TradeStats>> = None;
        if config.venue.enable_trading {
            let credentials =
                Credentials::from_env().context("trading enabled but credentials missing")?;
            let (sink, status_rx) = QueueSink::pair(STATUS_QUEUE_CAPACITY);
            let (link, command_rx) = TradeGateway::channel(COMMAND_QUEUE_CAPACITY);
            let gateway = TradeGateway::new(config.venue.clone(), credentials, Arc::new(sink));

            gateway_handle_join = Some({
                let shutdown = Arc::clone(&shutdown);
                std::thread::Builder::new()
                    .name("execution".to_string())
                    .spawn(move || gateway.run(command_rx, shutdown))
                    .context("failed to spawn execution thread")?
            });

            let chaser = MartingaleChaser::new(
                config.symbol.clone(),
                config.strategy.clone(),
                Arc::clone(&books),
                link,
                buffer.clone(),
                status_rx,
            );
            strategy_join = Some({
                let shutdown = Arc::clone(&shutdown);
                std::thread::Builder::new()
                    .name("strategy".to_string())
                    .spawn(move || run_strategy(chaser, shutdown))
                    .context("failed to spawn strategy thread")?
            });
        } else {
            tracing::info!("trading disabled, running market data only");
        }

        // Park until shutdown; the workers own all the work.
        while !shutdown.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(200));
        }

        tracing::info!("shutting down, joining threads");
        let mut stats = EngineStats {
            feed: join_or_default("ingest", feed_handle),
            ..EngineStats::default()
        };
        if let Some(handle) = gateway_handle_join {
            stats.gateway = Some(join_or_default("execution", handle));
        }
        if let Some(handle) = strategy_join {
            stats.trading = Some(join_or_default("strategy", handle));
        }
        drop(durable_ctx);

        tracing::info!(
            messages = stats.feed.messages_received,
            updates = stats.feed.updates_applied,
            orders = stats.gateway.map(|g| g.orders_sent).unwrap_or(0),
            trades = stats.trading.map(|t| t.trades).unwrap_or(0),
            wins = stats.trading.map(|t| t.wins).unwrap_or(0),
            "engine stopped cleanly"
        );
        Ok(stats)
    }
}

fn join_or_default<T: Default>(name: &str, handle: JoinHandle<T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(_) => {
            tracing::error!(thread = name, "thread panicked");
            T::default()
        }
    }
}
