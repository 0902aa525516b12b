//! Martingale chaser state machine
//!
//! A deterministic automaton driven by two inputs: the periodic tick
//! (market data, timers) and asynchronous order statuses drained from the
//! gateway queue at the start of each tick. All state lives on the
//! strategy thread; nothing here is shared.
//!
//! Cycle shape: place a maker entry just inside the spread, chase it if
//! the market walks away, and once filled rest a maker take-profit while
//! monitoring the mark for the stop-loss. A stop-out closes aggressively,
//! then doubles size and flips direction until a win or the step cap
//! resets the ladder.

use crate::config::StrategyConfig;
use crate::core::{ActiveOrder, ClientId, Direction, OrderIntent, OrderStatus, TradeStats};
use crate::durable::{Encoder, OrderBuffer, OrderRecord};
use crate::gateway::{ExecutionLink, PlaceOrder};
use crate::orderbook::OrderBookManager;
use crossbeam_channel::Receiver;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trade-signal action codes published on the durable signal stream
pub const SIGNAL_ENTRY_LONG: u8 = 0;
pub const SIGNAL_ENTRY_SHORT: u8 = 1;
pub const SIGNAL_EXIT: u8 = 2;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CROSSED_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Strategy lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Idle,
    Placing,
    Working,
    InPosition,
    Cancelling,
    Recovering,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BotState::Idle => "Idle",
            BotState::Placing => "Placing",
            BotState::Working => "Working",
            BotState::InPosition => "InPosition",
            BotState::Cancelling => "Cancelling",
            BotState::Recovering => "Recovering",
        };
        f.write_str(name)
    }
}

/// Why the current exit order exists. A resting take-profit carries no
/// reason; only stop-loss closes are tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Stop-loss inside the step ladder; reverse and double on fill
    StopLoss,
    /// Stop-loss at the step cap; reset sizing on fill, hold direction
    StopLossCap,
}

/// One order status routed from the gateway
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub client_id: String,
    pub status: OrderStatus,
    pub symbol: String,
}

pub struct MartingaleChaser<L: ExecutionLink> {
    symbol: String,
    cfg: StrategyConfig,
    books: Arc<OrderBookManager>,
    link: L,
    buffer: Option<Arc<OrderBuffer>>,
    status_rx: Receiver<StatusEvent>,
    encoder: Encoder,

    state: BotState,
    direction: Direction,
    entry_price: f64,
    filled: bool,
    qty_current: f64,
    step: u32,
    cum_loss: f64,
    pending_reverse: bool,
    close_reason: Option<CloseReason>,
    active_entry: Option<ActiveOrder>,
    active_exit: Option<ActiveOrder>,
    state_entry_time: Instant,
    position_entry_time: Instant,
    last_heartbeat: Instant,
    last_crossed_warn: Option<Instant>,
    stats: TradeStats,
}

impl<L: ExecutionLink> MartingaleChaser<L> {
    pub fn new(
        symbol: String,
        cfg: StrategyConfig,
        books: Arc<OrderBookManager>,
        link: L,
        buffer: Option<Arc<OrderBuffer>>,
        status_rx: Receiver<StatusEvent>,
    ) -> Self {
        let now = Instant::now();
        let mut chaser = Self {
            symbol,
            qty_current: cfg.qty_base,
            cfg,
            books,
            link,
            buffer,
            status_rx,
            encoder: Encoder::new(),
            state: BotState::Idle,
            direction: Direction::Long,
            entry_price: 0.0,
            filled: false,
            step: 0,
            cum_loss: 0.0,
            pending_reverse: false,
            close_reason: None,
            active_entry: None,
            active_exit: None,
            state_entry_time: now,
            position_entry_time: now,
            last_heartbeat: now,
            last_crossed_warn: None,
            stats: TradeStats::new(),
        };
        chaser.reconcile_on_startup();
        chaser
    }

    /// Restore position intent from the durable buffer, if any
    fn reconcile_on_startup(&mut self) {
        let Some(buffer) = self.buffer.as_ref() else {
            return;
        };
        if !buffer.has_active(&self.symbol) {
            return;
        }
        let Some(record) = buffer.get(&self.symbol) else {
            return;
        };
        self.direction = match record.side() {
            crate::core::Side::Sell => Direction::Short,
            crate::core::Side::Buy => Direction::Long,
        };
        self.entry_price = record.price;
        self.qty_current = record.qty;
        self.filled = true;
        self.state = BotState::InPosition;
        self.position_entry_time = Instant::now();
        tracing::info!(
            symbol = %self.symbol,
            order_id = record.order_id(),
            direction = %self.direction,
            entry_price = self.entry_price,
            qty = self.qty_current,
            "recovered open position from durable buffer"
        );
    }

    /// One trading cycle: drain statuses, validate data, advance the
    /// automaton.
    pub fn tick(&mut self) {
        while let Ok(event) = self.status_rx.try_recv() {
            self.on_status(&event.client_id, event.status);
        }

        if !self.validate() {
            return;
        }
        self.heartbeat();

        match self.state {
            BotState::Idle => self.evaluate_entry(),
            BotState::Placing | BotState::Cancelling => self.handle_timeout(),
            BotState::Working => self.monitor_working_order(),
            BotState::InPosition => self.manage_open_position(),
            BotState::Recovering => self.apply_martingale_recovery(),
        }
    }

    // ========================================================================
    // Validation gate
    // ========================================================================

    /// Market data must be present, two-sided and uncrossed; otherwise
    /// the tick is a no-op.
    fn validate(&mut self) -> bool {
        if self.symbol.is_empty() || !self.books.is_subscribed(&self.symbol) {
            return false;
        }
        let Some(book) = self.books.get(&self.symbol) else {
            return false;
        };
        let (Some((bid, _)), Some((ask, _))) = (book.best_bid(), book.best_ask()) else {
            return false;
        };
        if bid >= ask {
            let should_warn = self
                .last_crossed_warn
                .map(|t| t.elapsed() > CROSSED_WARN_INTERVAL)
                .unwrap_or(true);
            if should_warn {
                tracing::warn!(bid, ask, "crossed market, pausing");
                self.last_crossed_warn = Some(Instant::now());
            }
            return false;
        }
        true
    }

    // ========================================================================
    // Entry
    // ========================================================================

    /// Place a maker entry just inside the spread, clamped so a post-only
    /// order cannot cross the far touch.
    fn evaluate_entry(&mut self) {
        let Some((bid, ask)) = self.touch() else {
            return;
        };
        let mid = (bid + ask) / 2.0;
        let offset = self.cfg.entry_offset_ticks * self.cfg.tick_size;
        let safety = self.cfg.safety_ticks * self.cfg.tick_size;

        let price = match self.direction {
            Direction::Long => (mid - offset).min(ask - safety),
            Direction::Short => (mid + offset).max(bid + safety),
        };
        let side = self.direction.entry_side();
        let client_id = ClientId::generate();

        let order = PlaceOrder {
            symbol: self.symbol.clone(),
            side,
            qty: self.qty_current,
            price,
            client_id: client_id.clone(),
            maker: true,
        };
        if let Err(e) = self.link.place(order) {
            tracing::warn!(error = %e, "entry placement not accepted, retrying next tick");
            return;
        }

        tracing::info!(
            state = %self.state,
            client_id = %client_id,
            direction = %self.direction,
            price,
            qty = self.qty_current,
            step = self.step,
            "opening position"
        );

        self.entry_price = price;
        self.filled = false;
        self.active_entry = Some(ActiveOrder::new(
            client_id.clone(),
            side,
            price,
            self.qty_current,
            OrderIntent::Entry,
        ));
        self.enter_state(BotState::Placing);
        self.mirror_active_order(&client_id, side, price);
        let action = match self.direction {
            Direction::Long => SIGNAL_ENTRY_LONG,
            Direction::Short => SIGNAL_ENTRY_SHORT,
        };
        self.publish_signal(action, price, self.qty_current);
    }

    // ========================================================================
    // Chase
    // ========================================================================

    /// Cancel the working entry when it went stale or the market walked
    /// past the chase threshold.
    fn monitor_working_order(&mut self) {
        let Some(entry) = self.active_entry.as_ref() else {
            // Nothing is working; the cycle restarts from Idle.
            self.enter_state(BotState::Idle);
            return;
        };
        let age = entry.age();
        if age > self.cfg.t_stale() {
            tracing::info!(client_id = %entry.client_id, age_ms = age.as_millis() as u64,
                "working order stale, refreshing");
            self.cancel_entry();
            return;
        }
        if age < self.cfg.t_grace() {
            return;
        }
        let Some((bid, ask)) = self.touch() else {
            return;
        };
        let chase_needed = match self.direction {
            Direction::Long => bid > entry.price + self.cfg.chase_threshold,
            Direction::Short => ask < entry.price - self.cfg.chase_threshold,
        };
        if chase_needed {
            tracing::info!(
                client_id = %entry.client_id,
                order_price = entry.price,
                bid,
                ask,
                "market moved away, chasing"
            );
            self.cancel_entry();
        }
    }

    fn cancel_entry(&mut self) {
        if let Some(entry) = self.active_entry.as_ref() {
            if let Err(e) = self.link.cancel(&self.symbol, &entry.client_id) {
                tracing::warn!(error = %e, "cancel not accepted, timers will retry");
            }
        }
        self.enter_state(BotState::Cancelling);
    }

    // ========================================================================
    // Position management
    // ========================================================================

    /// Mark the open position against the exit-side touch; rest the
    /// take-profit and watch for the stop threshold.
    fn manage_open_position(&mut self) {
        if !self.filled {
            return;
        }
        let Some((bid, ask)) = self.touch() else {
            return;
        };
        let mark = match self.direction {
            Direction::Long => bid,
            Direction::Short => ask,
        };
        let pnl_pct = self.direction.sign() * (mark - self.entry_price) / self.entry_price;
        let pnl_quote = pnl_pct * self.entry_price * self.qty_current;
        self.stats.mark(pnl_pct, pnl_quote);

        if self.active_exit.is_none() {
            // Re-arm whichever exit should be in flight: the resting
            // take-profit normally, the aggressive close after a stop.
            if self.close_reason.is_none() {
                self.place_take_profit();
            } else {
                self.place_aggressive_close();
            }
        }

        if pnl_pct >= self.cfg.tp_pct {
            // The resting maker exit is at the target; the fill arrives
            // on the async path.
            tracing::debug!(pnl_pct, "profit target reached, awaiting resting exit fill");
        } else if pnl_pct <= -self.cfg.sl_pct && self.close_reason.is_none() {
            self.trigger_stop_loss(pnl_pct);
        }
    }

    fn trigger_stop_loss(&mut self, pnl_pct: f64) {
        tracing::warn!(
            pnl_pct,
            step = self.step,
            qty = self.qty_current,
            "stop loss hit"
        );
        if let Some(exit) = self.active_exit.take() {
            if let Err(e) = self.link.cancel(&self.symbol, &exit.client_id) {
                tracing::warn!(error = %e, "take-profit cancel not accepted");
            }
        }
        if self.step < self.cfg.step_max {
            self.pending_reverse = true;
            self.close_reason = Some(CloseReason::StopLoss);
        } else {
            self.close_reason = Some(CloseReason::StopLossCap);
        }
        self.place_aggressive_close();
    }

    /// Cross the touch by the configured aggression so the close fills
    fn place_aggressive_close(&mut self) {
        let Some((bid, ask)) = self.touch() else {
            return;
        };
        let aggression = self.cfg.close_aggression_ticks * self.cfg.tick_size;
        let side = self.direction.exit_side();
        let price = match self.direction {
            Direction::Long => bid - aggression,
            Direction::Short => ask + aggression,
        };
        let client_id = ClientId::generate();
        let order = PlaceOrder {
            symbol: self.symbol.clone(),
            side,
            qty: self.qty_current,
            price,
            client_id: client_id.clone(),
            maker: false,
        };
        if let Err(e) = self.link.place(order) {
            tracing::warn!(error = %e, "close placement not accepted, retrying next tick");
            return;
        }
        tracing::info!(client_id = %client_id, side = %side, price, qty = self.qty_current,
            "closing position");
        self.active_exit = Some(ActiveOrder::new(
            client_id,
            side,
            price,
            self.qty_current,
            OrderIntent::Exit,
        ));
        self.enter_state(BotState::Placing);
        self.publish_signal(SIGNAL_EXIT, price, self.qty_current);
    }

    /// Rest a maker exit at the directional profit target
    fn place_take_profit(&mut self) {
        let tp_price = self.entry_price * (1.0 + self.direction.sign() * self.cfg.tp_pct);
        let side = self.direction.exit_side();
        let client_id = ClientId::generate();
        let order = PlaceOrder {
            symbol: self.symbol.clone(),
            side,
            qty: self.qty_current,
            price: tp_price,
            client_id: client_id.clone(),
            maker: true,
        };
        if let Err(e) = self.link.place(order) {
            tracing::warn!(error = %e, "take-profit placement not accepted, retrying next tick");
            return;
        }
        tracing::info!(client_id = %client_id, side = %side, price = tp_price,
            "take-profit resting");
        self.active_exit = Some(ActiveOrder::new(
            client_id,
            side,
            tp_price,
            self.qty_current,
            OrderIntent::Exit,
        ));
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// No terminal ack within the order timeout: issue a compensating
    /// cancel and re-arm.
    fn handle_timeout(&mut self) {
        let in_flight = self
            .active_entry
            .as_ref()
            .or(self.active_exit.as_ref())
            .map(|o| o.client_id.clone());
        let Some(client_id) = in_flight else {
            // Nothing in flight for this state; fall back to where the
            // position actually is.
            if self.filled {
                self.enter_state(BotState::InPosition);
            } else {
                self.enter_state(BotState::Idle);
            }
            return;
        };
        if self.state_entry_time.elapsed() > self.cfg.t_order() {
            tracing::warn!(state = %self.state, client_id = %client_id,
                "acknowledgement timeout, cancelling");
            if let Err(e) = self.link.cancel(&self.symbol, &client_id) {
                tracing::warn!(error = %e, "timeout cancel not accepted");
            }
            self.state_entry_time = Instant::now();
        }
    }

    // ========================================================================
    // Martingale escalation
    // ========================================================================

    /// A stop-out was booked: advance the ladder, double size, flip
    /// direction, and immediately re-enter. The stop-loss path only
    /// routes here below the step cap; at the cap the close carries
    /// `StopLossCap` and resets the ladder on its fill instead.
    fn apply_martingale_recovery(&mut self) {
        self.step += 1;
        self.qty_current *= 2.0;
        self.direction = self.direction.flip();
        tracing::info!(
            step = self.step,
            qty = self.qty_current,
            direction = %self.direction,
            "martingale escalation, reversing"
        );
        self.pending_reverse = false;
        self.evaluate_entry();
    }

    fn reset_sizing(&mut self) {
        self.qty_current = self.cfg.qty_base;
        self.step = 0;
        self.cum_loss = 0.0;
    }

    // ========================================================================
    // Async status handling
    // ========================================================================

    /// Apply one order status. Statuses for ids we no longer track are
    /// dropped; a `Rejected` after a perceived terminal state is ignored
    /// the same way.
    pub fn on_status(&mut self, client_id: &str, status: OrderStatus) {
        let is_entry = self
            .active_entry
            .as_ref()
            .map(|o| o.client_id.as_str() == client_id)
            .unwrap_or(false);
        let is_exit = self
            .active_exit
            .as_ref()
            .map(|o| o.client_id.as_str() == client_id)
            .unwrap_or(false);

        if is_entry {
            self.on_entry_status(status);
        } else if is_exit {
            self.on_exit_status(status);
        } else {
            tracing::debug!(client_id, status = %status, "status for unknown order dropped");
        }
    }

    fn on_entry_status(&mut self, status: OrderStatus) {
        match status {
            OrderStatus::New => {
                if self.state == BotState::Placing {
                    tracing::info!("entry acknowledged, working");
                    self.enter_state(BotState::Working);
                }
            }
            OrderStatus::Filled => {
                // Reached from Placing (fast fill), Working, or
                // Cancelling when the fill won the race.
                self.enter_position();
            }
            OrderStatus::Cancelled => {
                tracing::info!("entry cancelled, re-evaluating");
                self.active_entry = None;
                self.enter_state(BotState::Idle);
            }
            OrderStatus::Rejected => {
                if self.state == BotState::Cancelling {
                    // The cancel lost the race: the order is filled.
                    tracing::warn!("cancel rejected, treating entry as filled");
                    self.enter_position();
                } else {
                    tracing::warn!("entry rejected");
                    self.active_entry = None;
                    self.enter_state(BotState::Idle);
                }
            }
        }
    }

    fn enter_position(&mut self) {
        if let Some(entry) = self.active_entry.take() {
            self.entry_price = entry.price;
        }
        self.filled = true;
        self.position_entry_time = Instant::now();
        self.enter_state(BotState::InPosition);
        tracing::info!(
            entry_price = self.entry_price,
            direction = %self.direction,
            qty = self.qty_current,
            "entry filled, monitoring pnl"
        );
        self.place_take_profit();
    }

    fn on_exit_status(&mut self, status: OrderStatus) {
        match status {
            OrderStatus::New => {
                tracing::debug!("exit acknowledged");
            }
            OrderStatus::Filled => self.on_exit_filled(),
            OrderStatus::Cancelled => {
                self.active_exit = None;
                if self.close_reason.is_some() {
                    // The close itself was cancelled (timeout path);
                    // re-place from position management.
                    self.enter_state(BotState::InPosition);
                }
            }
            OrderStatus::Rejected => {
                // A rejected exit (post-only crossed, or a close nack)
                // is re-placed from position management.
                tracing::warn!("exit rejected, will re-place");
                self.active_exit = None;
                if self.state == BotState::Placing {
                    self.enter_state(BotState::InPosition);
                }
            }
        }
    }

    fn on_exit_filled(&mut self) {
        self.active_exit = None;
        self.filled = false;
        if let Some(buffer) = self.buffer.as_ref() {
            buffer.deactivate(&self.symbol);
        }
        match self.close_reason.take() {
            None => {
                self.stats.record_win();
                self.reset_sizing();
                self.enter_state(BotState::Idle);
                tracing::info!(
                    pnl_pct = self.stats.last_pnl_pct,
                    pnl = self.stats.last_pnl_quote,
                    "target hit, profit booked"
                );
                self.log_statistics();
            }
            Some(CloseReason::StopLoss) => {
                self.stats.record_loss();
                self.cum_loss += self.stats.last_pnl_quote.abs();
                self.enter_state(BotState::Recovering);
                tracing::warn!(
                    pnl = self.stats.last_pnl_quote,
                    cum_loss = self.cum_loss,
                    "loss booked, entering recovery"
                );
            }
            Some(CloseReason::StopLossCap) => {
                self.stats.record_loss();
                self.reset_sizing();
                self.enter_state(BotState::Idle);
                tracing::warn!("loss booked at step cap, ladder reset");
                self.log_statistics();
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn enter_state(&mut self, state: BotState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "state transition");
        }
        self.state = state;
        self.state_entry_time = Instant::now();
    }

    fn touch(&self) -> Option<(f64, f64)> {
        let book = self.books.get(&self.symbol)?;
        let (bid, _) = book.best_bid()?;
        let (ask, _) = book.best_ask()?;
        Some((bid, ask))
    }

    fn mirror_active_order(&mut self, client_id: &ClientId, side: crate::core::Side, price: f64) {
        let Some(buffer) = self.buffer.as_ref() else {
            return;
        };
        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let record = OrderRecord::new(
            client_id.as_str(),
            &self.symbol,
            side,
            price,
            self.qty_current,
            timestamp,
        );
        buffer.put(record);
    }

    fn publish_signal(&mut self, action: u8, price: f64, qty: f64) {
        let Some(buffer) = self.buffer.as_ref() else {
            return;
        };
        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
        let frame = self
            .encoder
            .encode_trade_signal(timestamp, action, price, qty, &self.symbol);
        buffer.broadcast(frame);
    }

    fn heartbeat(&mut self) {
        if self.last_heartbeat.elapsed() < HEARTBEAT_INTERVAL {
            return;
        }
        self.last_heartbeat = Instant::now();
        if self.filled {
            tracing::info!(
                state = %self.state,
                pnl_pct = self.stats.last_pnl_pct,
                pnl = self.stats.last_pnl_quote,
                "position heartbeat"
            );
        } else {
            tracing::info!(state = %self.state, step = self.step, "heartbeat");
        }
    }

    fn log_statistics(&self) {
        tracing::info!(
            wins = self.stats.wins,
            trades = self.stats.trades,
            total_pnl = self.stats.total_profit,
            "trade statistics"
        );
    }

    // Accessors used by the engine and tests.

    pub fn state(&self) -> BotState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn qty_current(&self) -> f64 {
        self.qty_current
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    pub fn pending_reverse(&self) -> bool {
        self.pending_reverse
    }

    /// Time since the current position was opened (or adopted)
    pub fn position_age(&self) -> Duration {
        self.position_entry_time.elapsed()
    }

    pub fn stats(&self) -> &TradeStats {
        &self.stats
    }

    pub fn tick_interval(&self) -> Duration {
        self.cfg.tick_interval()
    }

    pub fn active_entry_id(&self) -> Option<&str> {
        self.active_entry.as_ref().map(|o| o.client_id.as_str())
    }

    pub fn active_exit_id(&self) -> Option<&str> {
        self.active_exit.as_ref().map(|o| o.client_id.as_str())
    }

    pub fn into_stats(self) -> TradeStats {
        self.stats
    }
}
