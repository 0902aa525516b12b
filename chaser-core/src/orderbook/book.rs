//! Lock-free top-of-book price ladder
//!
//! Single-writer / multi-reader view of the top [`DEPTH`] levels per side.
//! The ingest thread rewrites one side and then publishes the level count
//! with a release store; readers pair it with an acquire load before
//! touching the levels, so a count of `k` guarantees the leading `k`
//! entries were written before the count was. Level fields are stored as
//! `f64` bit patterns in `AtomicU64`s, which keeps the hot path free of
//! locks and makes partial tears per field impossible; a reader that
//! races a rewrite can at worst observe a stale or mixed ladder, and any
//! level with a non-positive price or quantity is discarded on read.

use std::array;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Number of price levels kept per side
pub const DEPTH: usize = 10;

/// A single price level. Non-positive price or quantity marks an absent
/// level.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: f64,
}

impl PriceLevel {
    pub fn new(price: f64, qty: f64) -> Self {
        Self { price, qty }
    }

    /// A level is usable only when both fields are strictly positive
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.price > 0.0 && self.qty > 0.0
    }
}

struct AtomicLevel {
    price_bits: AtomicU64,
    qty_bits: AtomicU64,
}

impl AtomicLevel {
    fn new() -> Self {
        Self {
            price_bits: AtomicU64::new(0),
            qty_bits: AtomicU64::new(0),
        }
    }

    #[inline]
    fn store(&self, level: PriceLevel) {
        self.price_bits
            .store(level.price.to_bits(), Ordering::Relaxed);
        self.qty_bits.store(level.qty.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    fn load(&self) -> PriceLevel {
        PriceLevel {
            price: f64::from_bits(self.price_bits.load(Ordering::Relaxed)),
            qty: f64::from_bits(self.qty_bits.load(Ordering::Relaxed)),
        }
    }
}

/// Concurrent top-N order book for one symbol
///
/// Writer contract: exactly one writer per side. Readers are unrestricted.
/// All operations are infallible.
pub struct OrderBook {
    bids: [AtomicLevel; DEPTH],
    asks: [AtomicLevel; DEPTH],
    bid_count: AtomicUsize,
    ask_count: AtomicUsize,
    update_id: AtomicU64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: array::from_fn(|_| AtomicLevel::new()),
            asks: array::from_fn(|_| AtomicLevel::new()),
            bid_count: AtomicUsize::new(0),
            ask_count: AtomicUsize::new(0),
            update_id: AtomicU64::new(0),
        }
    }

    /// Replace the bid side with the first `min(levels.len(), DEPTH)`
    /// entries in input order (expected best-first, descending).
    ///
    /// The count is published with release semantics after the level
    /// stores; it must never be updated before the data.
    pub fn update_bids(&self, levels: &[PriceLevel]) {
        let count = levels.len().min(DEPTH);
        for (slot, level) in self.bids.iter().zip(levels.iter().take(count)) {
            slot.store(*level);
        }
        self.bid_count.store(count, Ordering::Release);
    }

    /// Replace the ask side (expected best-first, ascending). Same
    /// publication contract as [`OrderBook::update_bids`].
    pub fn update_asks(&self, levels: &[PriceLevel]) {
        let count = levels.len().min(DEPTH);
        for (slot, level) in self.asks.iter().zip(levels.iter().take(count)) {
            slot.store(*level);
        }
        self.ask_count.store(count, Ordering::Release);
    }

    /// Best bid as `(price, qty)`, `None` when the side is empty or the
    /// observed top level has a non-positive field.
    pub fn best_bid(&self) -> Option<(f64, f64)> {
        if self.bid_count.load(Ordering::Acquire) == 0 {
            return None;
        }
        let level = self.bids[0].load();
        level.is_valid().then_some((level.price, level.qty))
    }

    /// Best ask, same contract as [`OrderBook::best_bid`].
    pub fn best_ask(&self) -> Option<(f64, f64)> {
        if self.ask_count.load(Ordering::Acquire) == 0 {
            return None;
        }
        let level = self.asks[0].load();
        level.is_valid().then_some((level.price, level.qty))
    }

    /// Midpoint of the touch, defined only for an uncrossed two-sided book
    pub fn fair_price(&self) -> Option<f64> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        (bid < ask).then_some((bid + ask) / 2.0)
    }

    /// Copy up to `min(k, count, DEPTH)` currently-published bid levels,
    /// dropping any with non-positive fields.
    pub fn snapshot_bids(&self, k: usize) -> Vec<PriceLevel> {
        let count = self.bid_count.load(Ordering::Acquire).min(k).min(DEPTH);
        self.bids[..count]
            .iter()
            .map(AtomicLevel::load)
            .filter(PriceLevel::is_valid)
            .collect()
    }

    /// Ask-side counterpart of [`OrderBook::snapshot_bids`].
    pub fn snapshot_asks(&self, k: usize) -> Vec<PriceLevel> {
        let count = self.ask_count.load(Ordering::Acquire).min(k).min(DEPTH);
        self.asks[..count]
            .iter()
            .map(AtomicLevel::load)
            .filter(PriceLevel::is_valid)
            .collect()
    }

    /// Bump the monotonic update counter after an applied update
    #[inline]
    pub fn bump_update_id(&self) {
        self.update_id.fetch_add(1, Ordering::Relaxed);
    }

    /// Relaxed read of the update counter, for freshness detection
    #[inline]
    pub fn update_id(&self) -> u64 {
        self.update_id.load(Ordering::Relaxed)
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
