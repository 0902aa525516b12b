//! Execution gateway
//!
//! Request/response over the private trade stream. Orders are placed and
//! cancelled by correlation id only: the bot-generated client id rides
//! out as both `reqId` and `orderLinkId` and every inbound ack or
//! execution is matched back through it. Status transitions are forwarded
//! to a single [`OrderSink`]; the strategy never sees venue JSON.
//!
//! The gateway runs on its own thread. Outbound requests arrive through a
//! bounded command channel drained between socket polls, so the WebSocket
//! has exactly one owner.

pub mod auth;
pub mod messages;
pub mod session;

pub use session::{FrameAssembler, SessionError, WsSession};

use crate::config::{Credentials, VenueConfig};
use crate::core::{ClientId, OrderStatus, Side};
use crate::resilience::ExponentialBackoff;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use messages::{
    ExecutionReport, Inbound, OrderCancelArgs, OrderCreateArgs, OP_AUTH, OP_ORDER_CANCEL,
    OP_ORDER_CREATE, OP_SUBSCRIBE, TOPIC_EXECUTION,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Capability the strategy wires in to receive status transitions
pub trait OrderSink: Send + Sync {
    fn on_status(&self, client_id: &str, status: OrderStatus, symbol: &str);
}

/// An order request as the strategy sees it
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub client_id: ClientId,
    /// Post-only when true; crossing order with the configured TIF
    /// otherwise
    pub maker: bool,
}

/// Failures surfaced to the strategy when handing work to the gateway.
/// Both are transient; timeouts drive recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Outbound command queue is full
    QueueFull,
    /// Gateway thread is gone
    Disconnected,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::QueueFull => write!(f, "gateway command queue full"),
            GatewayError::Disconnected => write!(f, "gateway is not running"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Order routing seam between the strategy and a venue. A second venue
/// implements this plus its own gateway loop; the strategy is untouched.
pub trait ExecutionLink {
    fn place(&self, order: PlaceOrder) -> Result<(), GatewayError>;
    fn cancel(&self, symbol: &str, client_id: &ClientId) -> Result<(), GatewayError>;
}

#[derive(Debug)]
pub enum GatewayCommand {
    Place(PlaceOrder),
    Cancel { symbol: String, client_id: ClientId },
}

/// Cheap cloneable handle the strategy holds
#[derive(Clone)]
pub struct GatewayHandle {
    tx: Sender<GatewayCommand>,
}

impl ExecutionLink for GatewayHandle {
    fn place(&self, order: PlaceOrder) -> Result<(), GatewayError> {
        match self.tx.try_send(GatewayCommand::Place(order)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(GatewayError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(GatewayError::Disconnected),
        }
    }

    fn cancel(&self, symbol: &str, client_id: &ClientId) -> Result<(), GatewayError> {
        let cmd = GatewayCommand::Cancel {
            symbol: symbol.to_string(),
            client_id: client_id.clone(),
        };
        match self.tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(GatewayError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(GatewayError::Disconnected),
        }
    }
}

/// Counters reported when the gateway thread exits
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayStats {
    pub orders_sent: u64,
    pub cancels_sent: u64,
    pub statuses_routed: u64,
    pub reconnects: u64,
}

/// The gateway loop state. Owned by the gateway thread.
pub struct TradeGateway {
    venue: VenueConfig,
    credentials: Credentials,
    sink: Arc<dyn OrderSink>,
    /// Correlation registry: client id -> symbol, kept until a terminal
    /// status is routed
    in_flight: HashMap<String, String>,
    authenticated: bool,
    stats: GatewayStats,
}

const AUTH_TIMEOUT: Duration = Duration::from_secs(5);

impl TradeGateway {
    pub fn new(venue: VenueConfig, credentials: Credentials, sink: Arc<dyn OrderSink>) -> Self {
        Self {
            venue,
            credentials,
            sink,
            in_flight: HashMap::new(),
            authenticated: false,
            stats: GatewayStats::default(),
        }
    }

    /// Create the command channel and handle for this gateway
    pub fn channel(capacity: usize) -> (GatewayHandle, Receiver<GatewayCommand>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (GatewayHandle { tx }, rx)
    }

    /// Drive the session until shutdown. Reconnects (and re-authenticates)
    /// with jittered backoff whenever the session dies.
    pub fn run(mut self, rx: Receiver<GatewayCommand>, shutdown: Arc<AtomicBool>) -> GatewayStats {
        let mut backoff = ExponentialBackoff::default();
        let mut session: Option<WsSession> = None;

        while !shutdown.load(Ordering::Acquire) {
            let Some(active) = session.as_mut() else {
                match self.establish() {
                    Ok(new_session) => {
                        session = Some(new_session);
                        backoff.reset();
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        tracing::error!(error = %e, retry_in_ms = delay.as_millis() as u64,
                            "trade session connect failed");
                        self.stats.reconnects += 1;
                        sleep_interruptible(delay, &shutdown);
                    }
                }
                continue;
            };

            let mut dead = false;
            while let Ok(cmd) = rx.try_recv() {
                if let Err(e) = self.send_command(active, cmd) {
                    tracing::warn!(error = %e, "outbound send failed, dropping session");
                    dead = true;
                    break;
                }
            }
            if !dead {
                match active.poll_message() {
                    Ok(Some(text)) => self.handle_frame(&text),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "trade session read failed");
                        dead = true;
                    }
                }
            }
            if dead {
                session = None;
                self.authenticated = false;
                self.stats.reconnects += 1;
            }
        }

        tracing::info!(
            orders = self.stats.orders_sent,
            cancels = self.stats.cancels_sent,
            statuses = self.stats.statuses_routed,
            "trade gateway stopped"
        );
        self.stats
    }

    /// Connect, authenticate and subscribe the private topics
    fn establish(&mut self) -> Result<WsSession, SessionError> {
        let mut session =
            WsSession::connect(&self.venue.trade_ws_url, self.venue.read_timeout())?;
        self.authenticate(&mut session)?;
        session.send_text(&messages::subscribe_request(&[TOPIC_EXECUTION]))?;
        tracing::info!(topic = TOPIC_EXECUTION, "private topics subscribed");
        Ok(session)
    }

    /// Blocking auth round-trip, bounded by [`AUTH_TIMEOUT`]
    fn authenticate(&mut self, session: &mut WsSession) -> Result<(), SessionError> {
        let expires = auth::expires_after(self.venue.auth_window_ms);
        let signature = auth::sign(&self.credentials.api_secret, expires);
        session.send_text(&messages::auth_request(
            &self.credentials.api_key,
            expires,
            &signature,
        ))?;

        self.authenticated = false;
        let deadline = Instant::now() + AUTH_TIMEOUT;
        while Instant::now() < deadline {
            if let Some(text) = session.poll_message()? {
                self.handle_frame(&text);
                if self.authenticated {
                    return Ok(());
                }
            }
        }
        Err(SessionError::Connect("authentication timed out".to_string()))
    }

    fn send_command(
        &mut self,
        session: &mut WsSession,
        cmd: GatewayCommand,
    ) -> Result<(), SessionError> {
        match cmd {
            GatewayCommand::Place(order) => {
                let time_in_force = if order.maker {
                    "PostOnly".to_string()
                } else {
                    self.venue.taker_time_in_force.clone()
                };
                let args = OrderCreateArgs {
                    symbol: order.symbol.clone(),
                    side: order.side.as_str().to_string(),
                    order_type: "Limit".to_string(),
                    qty: format_decimal(order.qty),
                    price: format_decimal(order.price),
                    time_in_force,
                    order_link_id: order.client_id.as_str().to_string(),
                    category: self.venue.category.clone(),
                };
                tracing::info!(
                    client_id = %order.client_id,
                    side = %order.side,
                    price = order.price,
                    qty = order.qty,
                    maker = order.maker,
                    "sending order.create"
                );
                self.in_flight
                    .insert(order.client_id.as_str().to_string(), order.symbol);
                session.send_text(&messages::order_create_request(&args))?;
                self.stats.orders_sent += 1;
                Ok(())
            }
            GatewayCommand::Cancel { symbol, client_id } => {
                let args = OrderCancelArgs {
                    symbol: symbol.clone(),
                    order_link_id: client_id.as_str().to_string(),
                    category: self.venue.category.clone(),
                };
                tracing::info!(client_id = %client_id, "sending order.cancel");
                // The cancel shares the order's id; make sure it is
                // correlatable even if the placement ack never arrived.
                self.in_flight
                    .entry(client_id.as_str().to_string())
                    .or_insert(symbol);
                session.send_text(&messages::order_cancel_request(&args))?;
                self.stats.cancels_sent += 1;
                Ok(())
            }
        }
    }

    /// Classify one complete inbound message and route the resulting
    /// status. Parse failures are logged and the frame is discarded.
    pub fn handle_frame(&mut self, text: &str) {
        let msg = match Inbound::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "discarding unparseable frame");
                return;
            }
        };

        if let Some(op) = msg.op.as_deref() {
            match op {
                OP_AUTH => {
                    if msg.is_ok() {
                        self.authenticated = true;
                        tracing::info!("trade session authenticated");
                    } else {
                        tracing::error!(ret_msg = ?msg.ret_msg, "authentication rejected");
                    }
                }
                OP_SUBSCRIBE => {
                    tracing::debug!(ok = msg.is_ok(), "subscription ack");
                }
                OP_ORDER_CREATE => {
                    let status = if msg.is_ok() {
                        OrderStatus::New
                    } else {
                        OrderStatus::Rejected
                    };
                    self.route_ack(&msg, status);
                }
                OP_ORDER_CANCEL => {
                    let status = if msg.is_ok() {
                        OrderStatus::Cancelled
                    } else {
                        // A rejected cancel usually means the target
                        // already filled; the strategy decides.
                        OrderStatus::Rejected
                    };
                    self.route_ack(&msg, status);
                }
                other => {
                    tracing::debug!(op = other, "ignoring op ack");
                }
            }
            return;
        }

        if msg.topic.as_deref() == Some(TOPIC_EXECUTION) {
            let Some(data) = msg.data.as_ref() else {
                return;
            };
            for report in ExecutionReport::from_data(data) {
                self.dispatch(&report.order_link_id, OrderStatus::Filled, &report.symbol);
            }
        }
    }

    fn route_ack(&mut self, msg: &Inbound, status: OrderStatus) {
        let Some(client_id) = msg.req_id.clone().or_else(|| link_id_from_data(msg)) else {
            tracing::warn!(op = ?msg.op, "ack without correlation id");
            return;
        };
        let symbol = self.in_flight.get(&client_id).cloned().unwrap_or_default();
        self.dispatch(&client_id, status, &symbol);
    }

    fn dispatch(&mut self, client_id: &str, status: OrderStatus, symbol: &str) {
        if !self.in_flight.contains_key(client_id) {
            tracing::debug!(client_id, status = %status, "dropping status for unknown id");
            return;
        }
        tracing::info!(client_id, status = %status, symbol, "order status");
        self.sink.on_status(client_id, status, symbol);
        self.stats.statuses_routed += 1;
        if status.is_terminal() {
            self.in_flight.remove(client_id);
        }
    }
}

fn link_id_from_data(msg: &Inbound) -> Option<String> {
    msg.data
        .as_ref()?
        .get("orderLinkId")?
        .as_str()
        .map(str::to_string)
}

/// Format prices and quantities the way the venue expects: plain decimal,
/// no exponent. Rust's shortest-roundtrip `Display` for `f64` does this
/// for the magnitudes an instrument trades at.
fn format_decimal(value: f64) -> String {
    format!("{}", value)
}

fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(100);
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::Acquire) {
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, OrderStatus, String)>>,
    }

    impl OrderSink for RecordingSink {
        fn on_status(&self, client_id: &str, status: OrderStatus, symbol: &str) {
            self.events
                .lock()
                .push((client_id.to_string(), status, symbol.to_string()));
        }
    }

    fn gateway_with_sink() -> (TradeGateway, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let venue = VenueConfig {
            public_ws_url: "wss://example/public".into(),
            trade_ws_url: "wss://example/trade".into(),
            depth: 50,
            category: "linear".into(),
            taker_time_in_force: "IOC".into(),
            auth_window_ms: 5_000,
            read_timeout_ms: 50,
            enable_trading: true,
        };
        let credentials = Credentials {
            api_key: "key".into(),
            api_secret: "secret".into(),
        };
        let gateway = TradeGateway::new(venue, credentials, sink.clone());
        (gateway, sink)
    }

    fn track(gateway: &mut TradeGateway, id: &str, symbol: &str) {
        gateway.in_flight.insert(id.to_string(), symbol.to_string());
    }

    #[test]
    fn test_create_ack_maps_to_new() {
        let (mut gateway, sink) = gateway_with_sink();
        track(&mut gateway, "BOT-1-0", "BTCUSDT");
        gateway.handle_frame(r#"{"op":"order.create","retCode":0,"reqId":"BOT-1-0"}"#);

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "BOT-1-0");
        assert_eq!(events[0].1, OrderStatus::New);
    }

    #[test]
    fn test_create_nack_maps_to_rejected() {
        let (mut gateway, sink) = gateway_with_sink();
        track(&mut gateway, "BOT-1-1", "BTCUSDT");
        gateway.handle_frame(
            r#"{"op":"order.create","retCode":110007,"retMsg":"no balance","reqId":"BOT-1-1"}"#,
        );

        let events = sink.events.lock();
        assert_eq!(events[0].1, OrderStatus::Rejected);
        // Terminal status retires the id.
        assert!(!gateway.in_flight.contains_key("BOT-1-1"));
    }

    #[test]
    fn test_cancel_acks() {
        let (mut gateway, sink) = gateway_with_sink();
        track(&mut gateway, "BOT-1-2", "BTCUSDT");
        gateway.handle_frame(r#"{"op":"order.cancel","retCode":0,"reqId":"BOT-1-2"}"#);
        track(&mut gateway, "BOT-1-3", "BTCUSDT");
        gateway.handle_frame(
            r#"{"op":"order.cancel","retCode":110001,"retMsg":"order not exists","reqId":"BOT-1-3"}"#,
        );

        let events = sink.events.lock();
        assert_eq!(events[0].1, OrderStatus::Cancelled);
        assert_eq!(events[1].1, OrderStatus::Rejected);
    }

    #[test]
    fn test_execution_maps_to_filled() {
        let (mut gateway, sink) = gateway_with_sink();
        track(&mut gateway, "BOT-1-4", "BTCUSDT");
        gateway.handle_frame(
            r#"{"topic":"execution","data":[{"symbol":"BTCUSDT","orderLinkId":"BOT-1-4","execQty":"0.01"}]}"#,
        );

        let events = sink.events.lock();
        assert_eq!(events[0], ("BOT-1-4".to_string(), OrderStatus::Filled, "BTCUSDT".to_string()));
    }

    #[test]
    fn test_unknown_id_dropped() {
        let (mut gateway, sink) = gateway_with_sink();
        gateway.handle_frame(
            r#"{"topic":"execution","data":[{"symbol":"BTCUSDT","orderLinkId":"NOT-OURS"}]}"#,
        );
        assert!(sink.events.lock().is_empty());
    }

    #[test]
    fn test_late_status_after_terminal_dropped() {
        let (mut gateway, sink) = gateway_with_sink();
        track(&mut gateway, "BOT-1-5", "BTCUSDT");
        gateway.handle_frame(
            r#"{"topic":"execution","data":[{"symbol":"BTCUSDT","orderLinkId":"BOT-1-5"}]}"#,
        );
        // Late reject for the same id after the fill: ignored.
        gateway.handle_frame(r#"{"op":"order.cancel","retCode":1,"reqId":"BOT-1-5"}"#);

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, OrderStatus::Filled);
    }

    #[test]
    fn test_garbage_frame_discarded() {
        let (mut gateway, sink) = gateway_with_sink();
        gateway.handle_frame("{not json");
        gateway.handle_frame("");
        assert!(sink.events.lock().is_empty());
    }

    #[test]
    fn test_auth_ack_sets_flag() {
        let (mut gateway, _sink) = gateway_with_sink();
        assert!(!gateway.authenticated);
        gateway.handle_frame(r#"{"op":"auth","retCode":0}"#);
        assert!(gateway.authenticated);
    }

    #[test]
    fn test_auth_nack_keeps_flag_clear() {
        let (mut gateway, _sink) = gateway_with_sink();
        gateway.handle_frame(r#"{"op":"auth","retCode":10003,"retMsg":"invalid api key"}"#);
        assert!(!gateway.authenticated);
    }

    #[test]
    fn test_ack_correlates_via_data_link_id() {
        let (mut gateway, sink) = gateway_with_sink();
        track(&mut gateway, "BOT-1-6", "BTCUSDT");
        gateway.handle_frame(
            r#"{"op":"order.create","retCode":0,"data":{"orderLinkId":"BOT-1-6"}}"#,
        );
        assert_eq!(sink.events.lock()[0].0, "BOT-1-6");
    }

    #[test]
    fn test_handle_place_then_cancel_queue() {
        let (handle, rx) = TradeGateway::channel(4);
        handle
            .place(PlaceOrder {
                symbol: "BTCUSDT".into(),
                side: Side::Buy,
                qty: 0.01,
                price: 100.05,
                client_id: ClientId::from("BOT-9-9"),
                maker: true,
            })
            .unwrap();
        handle.cancel("BTCUSDT", &ClientId::from("BOT-9-9")).unwrap();
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn test_queue_full_is_reported() {
        let (handle, _rx) = TradeGateway::channel(1);
        let order = PlaceOrder {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            qty: 0.01,
            price: 100.0,
            client_id: ClientId::from("BOT-0-0"),
            maker: true,
        };
        handle.place(order.clone()).unwrap();
        assert_eq!(handle.place(order), Err(GatewayError::QueueFull));
    }

    // A fill report split across three fragments is reassembled, parsed
    // once, and produces exactly one status.
    #[test]
    fn test_fragmented_fill_emits_single_status() {
        let (mut gateway, sink) = gateway_with_sink();
        track(&mut gateway, "BOT-2-0", "BTCUSDT");

        let full = r#"{"topic":"execution","data":[{"symbol":"BTCUSDT","orderLinkId":"BOT-2-0","execQty":"0.01","execPrice":"100.05"}]}"#;
        let (a, rest) = full.split_at(20);
        let (b, c) = rest.split_at(37);

        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(a.as_bytes(), false).is_none());
        assert!(assembler.push(b.as_bytes(), false).is_none());
        let message = assembler.push(c.as_bytes(), true).unwrap();
        gateway.handle_frame(&message);

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            ("BOT-2-0".to_string(), OrderStatus::Filled, "BTCUSDT".to_string())
        );
    }

    #[test]
    fn test_format_decimal_plain() {
        assert_eq!(format_decimal(100.05), "100.05");
        assert_eq!(format_decimal(0.001), "0.001");
        assert_eq!(format_decimal(50000.0), "50000");
    }
}
