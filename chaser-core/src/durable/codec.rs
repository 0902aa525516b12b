//! Fixed-layout binary codec for the durable channel
//!
//! Every message starts with an 8-byte header
//! `{block_len: u16, template_id: u16, schema_id: u16, version: u16}`
//! followed by fixed fields, repeating groups and length-prefixed
//! variable strings. All integers and floats are little-endian.
//!
//! Templates: 2 = book snapshot, 3 = trade signal, 4 = order.

use super::record::OrderRecord;
use crate::core::Side;
use std::fmt;

pub const SCHEMA_ID: u16 = 1;
pub const SCHEMA_VERSION: u16 = 0;

pub const TEMPLATE_BOOK_SNAPSHOT: u16 = 2;
pub const TEMPLATE_TRADE_SIGNAL: u16 = 3;
pub const TEMPLATE_ORDER: u16 = 4;

const BLOCK_LEN_BOOK_SNAPSHOT: u16 = 48;
const BLOCK_LEN_TRADE_SIGNAL: u16 = 32;
const BLOCK_LEN_ORDER: u16 = 64;
const GROUP_BLOCK_LEN_LEVEL: u16 = 16;

/// Decode failures. A failed decode never panics; the frame is dropped by
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer ended before the announced field
    Truncated { need: usize, have: usize },
    /// Header carried a template id this schema does not define
    UnknownTemplate(u16),
    /// Header schema id does not match ours
    SchemaMismatch { expected: u16, actual: u16 },
    /// A variable-length string was not valid UTF-8
    BadUtf8,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated { need, have } => {
                write!(f, "truncated message: need {} bytes, have {}", need, have)
            }
            CodecError::UnknownTemplate(id) => write!(f, "unknown template id {}", id),
            CodecError::SchemaMismatch { expected, actual } => {
                write!(f, "schema id mismatch: expected {}, got {}", expected, actual)
            }
            CodecError::BadUtf8 => write!(f, "variable string is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {}

// ============================================================================
// Encoder
// ============================================================================

/// Append-only encoder reused across messages. `reset` is implicit at the
/// start of each `encode_*` call; `data` borrows the finished frame.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn write_header(&mut self, block_len: u16, template_id: u16) {
        self.write_u16(block_len);
        self.write_u16(template_id);
        self.write_u16(SCHEMA_ID);
        self.write_u16(SCHEMA_VERSION);
    }

    /// Template 2: timestamped top-of-book ladder for one symbol
    pub fn encode_book_snapshot(
        &mut self,
        timestamp_ns: u64,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
        symbol: &str,
    ) -> &[u8] {
        self.reset();
        self.write_header(BLOCK_LEN_BOOK_SNAPSHOT, TEMPLATE_BOOK_SNAPSHOT);
        self.write_u64(timestamp_ns);
        self.write_u16(bids.len() as u16);
        self.write_u16(asks.len() as u16);
        self.write_group(bids);
        self.write_group(asks);
        self.write_string(symbol);
        &self.buf
    }

    /// Template 3: strategy action marker
    pub fn encode_trade_signal(
        &mut self,
        timestamp_ns: u64,
        action: u8,
        price: f64,
        qty: f64,
        symbol: &str,
    ) -> &[u8] {
        self.reset();
        self.write_header(BLOCK_LEN_TRADE_SIGNAL, TEMPLATE_TRADE_SIGNAL);
        self.write_u64(timestamp_ns);
        self.write_u8(action);
        self.write_f64(price);
        self.write_f64(qty);
        self.write_string(symbol);
        &self.buf
    }

    /// Template 4: the active-order mirror record
    pub fn encode_order(&mut self, record: &OrderRecord) -> &[u8] {
        self.reset();
        self.write_header(BLOCK_LEN_ORDER, TEMPLATE_ORDER);
        self.write_i64(record.timestamp);
        self.write_f64(record.price);
        self.write_f64(record.qty);
        self.write_u8(record.is_active as u8);
        self.write_string(record.order_id());
        self.write_string(record.symbol());
        self.write_string(record.side_str());
        &self.buf
    }

    fn write_group(&mut self, levels: &[(f64, f64)]) {
        self.write_u16(GROUP_BLOCK_LEN_LEVEL);
        self.write_u16(levels.len() as u16);
        for &(price, qty) in levels {
            self.write_f64(price);
            self.write_f64(qty);
        }
    }

    fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_string(&mut self, value: &str) {
        let len = value.len().min(u16::MAX as usize) as u16;
        self.write_u16(len);
        self.buf.extend_from_slice(&value.as_bytes()[..len as usize]);
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Decoded book snapshot (template 2)
#[derive(Debug, Clone, PartialEq)]
pub struct BookSnapshotMsg {
    pub timestamp_ns: u64,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub symbol: String,
}

/// Decoded trade signal (template 3)
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSignalMsg {
    pub timestamp_ns: u64,
    pub action: u8,
    pub price: f64,
    pub qty: f64,
    pub symbol: String,
}

/// Decoded order record (template 4)
#[derive(Debug, Clone, PartialEq)]
pub struct OrderMsg {
    pub timestamp: i64,
    pub price: f64,
    pub qty: f64,
    pub is_active: bool,
    pub order_id: String,
    pub symbol: String,
    pub side: String,
}

impl OrderMsg {
    /// Rehydrate the fixed-width mirror record
    pub fn to_record(&self) -> OrderRecord {
        let side = if self.side == "Sell" { Side::Sell } else { Side::Buy };
        let mut record = OrderRecord::new(
            &self.order_id,
            &self.symbol,
            side,
            self.price,
            self.qty,
            self.timestamp,
        );
        record.is_active = self.is_active;
        record
    }
}

/// Any message the durable channel carries
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    BookSnapshot(BookSnapshotMsg),
    TradeSignal(TradeSignalMsg),
    Order(OrderMsg),
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.buf.len() {
            return Err(CodecError::Truncated {
                need: self.pos + n,
                have: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let slice = self.take(N)?;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::BadUtf8)
    }

    fn read_group(&mut self) -> Result<Vec<(f64, f64)>, CodecError> {
        let _block_len = self.read_u16()?;
        let count = self.read_u16()? as usize;
        let mut levels = Vec::with_capacity(count);
        for _ in 0..count {
            let price = self.read_f64()?;
            let qty = self.read_f64()?;
            levels.push((price, qty));
        }
        Ok(levels)
    }
}

/// Decode one full frame. The frame must contain exactly one message.
pub fn decode(buf: &[u8]) -> Result<Message, CodecError> {
    let mut cursor = Cursor::new(buf);
    let _block_len = cursor.read_u16()?;
    let template_id = cursor.read_u16()?;
    let schema_id = cursor.read_u16()?;
    let _version = cursor.read_u16()?;

    if schema_id != SCHEMA_ID {
        return Err(CodecError::SchemaMismatch {
            expected: SCHEMA_ID,
            actual: schema_id,
        });
    }

    match template_id {
        TEMPLATE_BOOK_SNAPSHOT => {
            let timestamp_ns = cursor.read_u64()?;
            let _bid_count = cursor.read_u16()?;
            let _ask_count = cursor.read_u16()?;
            let bids = cursor.read_group()?;
            let asks = cursor.read_group()?;
            let symbol = cursor.read_string()?;
            Ok(Message::BookSnapshot(BookSnapshotMsg {
                timestamp_ns,
                bids,
                asks,
                symbol,
            }))
        }
        TEMPLATE_TRADE_SIGNAL => {
            let timestamp_ns = cursor.read_u64()?;
            let action = cursor.read_u8()?;
            let price = cursor.read_f64()?;
            let qty = cursor.read_f64()?;
            let symbol = cursor.read_string()?;
            Ok(Message::TradeSignal(TradeSignalMsg {
                timestamp_ns,
                action,
                price,
                qty,
                symbol,
            }))
        }
        TEMPLATE_ORDER => {
            let timestamp = cursor.read_i64()?;
            let price = cursor.read_f64()?;
            let qty = cursor.read_f64()?;
            let is_active = cursor.read_u8()? != 0;
            let order_id = cursor.read_string()?;
            let symbol = cursor.read_string()?;
            let side = cursor.read_string()?;
            Ok(Message::Order(OrderMsg {
                timestamp,
                price,
                qty,
                is_active,
                order_id,
                symbol,
                side,
            }))
        }
        other => Err(CodecError::UnknownTemplate(other)),
    }
}
