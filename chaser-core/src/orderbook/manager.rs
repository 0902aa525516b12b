//! Per-symbol book registry
//!
//! Books are created on first subscription and live for the process
//! lifetime; handing out `Arc`s means a book is never destroyed while a
//! reader may still hold it. The map lock is only taken on lookup, never
//! on the book's own hot path.

use super::book::OrderBook;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
pub struct OrderBookManager {
    books: Mutex<HashMap<String, Arc<OrderBook>>>,
    subscribed: Mutex<HashSet<String>>,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book for `symbol`, creating an empty one if this is the first
    /// sighting.
    pub fn get_or_create(&self, symbol: &str) -> Arc<OrderBook> {
        let mut books = self.books.lock();
        if let Some(book) = books.get(symbol) {
            return Arc::clone(book);
        }
        tracing::info!(symbol, "created orderbook");
        let book = Arc::new(OrderBook::new());
        books.insert(symbol.to_string(), Arc::clone(&book));
        book
    }

    /// Strict lookup; `None` when no book exists for `symbol` yet.
    pub fn get(&self, symbol: &str) -> Option<Arc<OrderBook>> {
        self.books.lock().get(symbol).cloned()
    }

    /// Record that a feed subscription for `symbol` was sent. Returns
    /// false when the symbol was already subscribed.
    pub fn mark_subscribed(&self, symbol: &str) -> bool {
        self.subscribed.lock().insert(symbol.to_string())
    }

    pub fn is_subscribed(&self, symbol: &str) -> bool {
        self.subscribed.lock().contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.books.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.lock().is_empty()
    }
}
