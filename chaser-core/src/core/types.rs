//! Shared domain types
//!
//! Small copy types used across the orderbook, strategy, gateway and
//! durable layers. Prices and quantities are `f64` end to end, matching
//! the venue's decimal-string wire format.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

impl Side {
    /// The side that closes a position opened on `self`
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Venue wire representation ("Buy" / "Sell")
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trading direction of the strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Long = 0,
    Short = 1,
}

impl Direction {
    #[inline]
    pub fn flip(self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Side used to open a position in this direction
    #[inline]
    pub fn entry_side(self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Side used to close a position in this direction
    #[inline]
    pub fn exit_side(self) -> Side {
        self.entry_side().opposite()
    }

    /// Sign applied to price moves when computing directional PnL
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Terminal and non-terminal order statuses as classified by the gateway
///
/// For a given client id the venue emits `New` followed by exactly one of
/// the terminal statuses. A fast fill may skip `New` entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderStatus {
    New = 0,
    Filled = 1,
    Cancelled = 2,
    Rejected = 3,
}

impl OrderStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::New)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "New",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an order was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderIntent {
    /// Opens (or flips into) a position
    Entry = 0,
    /// Closes the current position (take-profit or stop-loss)
    Exit = 1,
}

impl fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderIntent::Entry => write!(f, "entry"),
            OrderIntent::Exit => write!(f, "exit"),
        }
    }
}

/// Process-wide counter feeding [`ClientId::generate`]
static CLIENT_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Bot-generated correlation id, echoed by the venue as both request id
/// and order-link id. The sole key used to match acknowledgements and
/// executions back to in-flight orders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Generate a new id, unique over the process lifetime.
    ///
    /// Format: `BOT-<unix_nanos>-<seq>`. The sequence component
    /// disambiguates ids generated within the same nanosecond tick.
    pub fn generate() -> Self {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let seq = CLIENT_ID_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("BOT-{}-{}", nanos, seq))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An order the strategy currently has in flight at the venue
#[derive(Debug, Clone)]
pub struct ActiveOrder {
    pub client_id: ClientId,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub intent: OrderIntent,
    pub placed_at: Instant,
}

impl ActiveOrder {
    pub fn new(client_id: ClientId, side: Side, price: f64, qty: f64, intent: OrderIntent) -> Self {
        Self {
            client_id,
            side,
            price,
            qty,
            intent,
            placed_at: Instant::now(),
        }
    }

    /// Age of the order since placement
    #[inline]
    pub fn age(&self) -> std::time::Duration {
        self.placed_at.elapsed()
    }
}
