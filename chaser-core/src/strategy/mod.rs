//! Strategy context: the martingale chaser and its thread wiring
//!
//! Order statuses cross from the execution thread into the strategy
//! through a bounded queue drained at the start of each tick, keeping the
//! strategy state single-writer without a lock around the transition
//! function.

pub mod chaser;

pub use chaser::{
    BotState, MartingaleChaser, StatusEvent, SIGNAL_ENTRY_LONG, SIGNAL_ENTRY_SHORT, SIGNAL_EXIT,
};

use crate::core::{OrderStatus, TradeStats};
use crate::gateway::{ExecutionLink, OrderSink};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Gateway-facing sink that enqueues statuses for the strategy thread
pub struct QueueSink {
    tx: Sender<StatusEvent>,
}

impl QueueSink {
    /// Create a sink and the matching receiver handed to the chaser
    pub fn pair(capacity: usize) -> (QueueSink, Receiver<StatusEvent>) {
        let (tx, rx) = bounded(capacity);
        (QueueSink { tx }, rx)
    }
}

impl OrderSink for QueueSink {
    fn on_status(&self, client_id: &str, status: OrderStatus, symbol: &str) {
        let event = StatusEvent {
            client_id: client_id.to_string(),
            status,
            symbol: symbol.to_string(),
        };
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                // The strategy drains every tick; a full queue means it
                // has stalled for thousands of statuses.
                tracing::error!(client_id = %event.client_id, status = %event.status,
                    "status queue full, dropping status");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("status queue receiver gone");
            }
        }
    }
}

/// Strategy thread body: tick until shutdown, then hand back the stats
pub fn run_strategy<L: ExecutionLink>(
    mut chaser: MartingaleChaser<L>,
    shutdown: Arc<AtomicBool>,
) -> TradeStats {
    let interval = chaser.tick_interval();
    tracing::info!("strategy loop started");
    while !shutdown.load(Ordering::Acquire) {
        chaser.tick();
        std::thread::sleep(interval);
    }
    tracing::info!("strategy loop stopped");
    chaser.into_stats()
}
