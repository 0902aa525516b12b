//! Fixed-layout durable order record
//!
//! The record crosses a process boundary through shared memory, so every
//! string field is a fixed-width byte array; it must never embed heap
//! pointers. Strings are NUL-padded and silently truncated to the field
//! width.

use crate::core::Side;

pub const ORDER_ID_LEN: usize = 64;
pub const SYMBOL_LEN: usize = 16;
pub const SIDE_LEN: usize = 8;

/// Mirror of the currently-active order for one symbol
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OrderRecord {
    pub order_id: [u8; ORDER_ID_LEN],
    pub symbol: [u8; SYMBOL_LEN],
    pub side: [u8; SIDE_LEN],
    pub price: f64,
    pub qty: f64,
    pub timestamp: i64,
    pub is_active: bool,
}

fn fill_fixed<const N: usize>(value: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = value.as_bytes();
    let len = bytes.len().min(N);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

fn read_fixed(buf: &[u8]) -> &str {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).unwrap_or("")
}

impl OrderRecord {
    pub fn new(
        order_id: &str,
        symbol: &str,
        side: Side,
        price: f64,
        qty: f64,
        timestamp: i64,
    ) -> Self {
        Self {
            order_id: fill_fixed(order_id),
            symbol: fill_fixed(symbol),
            side: fill_fixed(side.as_str()),
            price,
            qty,
            timestamp,
            is_active: true,
        }
    }

    pub fn order_id(&self) -> &str {
        read_fixed(&self.order_id)
    }

    pub fn symbol(&self) -> &str {
        read_fixed(&self.symbol)
    }

    pub fn side_str(&self) -> &str {
        read_fixed(&self.side)
    }

    /// Parsed side; defaults to Buy for a corrupt field
    pub fn side(&self) -> Side {
        if self.side_str() == "Sell" {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

impl PartialEq for OrderRecord {
    fn eq(&self, other: &Self) -> bool {
        self.order_id == other.order_id
            && self.symbol == other.symbol
            && self.side == other.side
            && self.price == other.price
            && self.qty == other.qty
            && self.timestamp == other.timestamp
            && self.is_active == other.is_active
    }
}
