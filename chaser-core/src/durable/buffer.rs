//! Durable order buffer
//!
//! Mirrors the currently-active order per symbol so a restarted strategy
//! can rediscover position intent. Writes go to an in-memory map guarded
//! by a single mutex (one write per state transition, contention is
//! negligible) and are broadcast in serialized form on the durable
//! stream. Restart recovery replays the stream and keeps the last record
//! seen per symbol.

use super::codec::{decode, Encoder, Message};
use super::record::OrderRecord;
use super::transport::{Publisher, Subscriber, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Broadcast retry bound on backpressure
const BROADCAST_RETRIES: u32 = 3;
const BROADCAST_RETRY_DELAY: Duration = Duration::from_millis(1);

pub struct OrderBuffer {
    mirror: Mutex<HashMap<String, OrderRecord>>,
    encoder: Mutex<Encoder>,
    publisher: Option<Box<dyn Publisher>>,
}

impl OrderBuffer {
    pub fn new(publisher: Option<Box<dyn Publisher>>) -> Self {
        Self {
            mirror: Mutex::new(HashMap::new()),
            encoder: Mutex::new(Encoder::new()),
            publisher,
        }
    }

    /// Replay the durable stream and rebuild the mirror. Later records
    /// for a symbol replace earlier ones, so the mirror converges on the
    /// final state written before the crash.
    pub fn restore(&self, subscriber: &dyn Subscriber) -> Result<usize, TransportError> {
        let mut applied = 0usize;
        subscriber.poll(&mut |frame| match decode(frame) {
            Ok(Message::Order(msg)) => {
                let record = msg.to_record();
                self.mirror.lock().insert(record.symbol().to_string(), record);
                applied += 1;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable frame during restore");
            }
        })?;
        if applied > 0 {
            tracing::info!(records = applied, "order buffer restored from durable stream");
        }
        Ok(applied)
    }

    /// Atomic replace-by-symbol; also broadcasts the serialized record.
    pub fn put(&self, record: OrderRecord) -> bool {
        let symbol = record.symbol().to_string();
        self.mirror.lock().insert(symbol, record);
        self.broadcast_record(&record)
    }

    /// Mark the record inactive. It stays queryable for audit and the
    /// deactivation is broadcast so the stream reflects it.
    pub fn deactivate(&self, symbol: &str) -> bool {
        let updated = {
            let mut mirror = self.mirror.lock();
            match mirror.get_mut(symbol) {
                Some(record) => {
                    record.is_active = false;
                    Some(*record)
                }
                None => None,
            }
        };
        match updated {
            Some(record) => self.broadcast_record(&record),
            None => false,
        }
    }

    pub fn get(&self, symbol: &str) -> Option<OrderRecord> {
        self.mirror.lock().get(symbol).copied()
    }

    pub fn has_active(&self, symbol: &str) -> bool {
        self.mirror
            .lock()
            .get(symbol)
            .map(|r| r.is_active)
            .unwrap_or(false)
    }

    /// Best-effort publication with bounded retry on backpressure.
    /// Returns whether the frame was accepted by the transport.
    pub fn broadcast(&self, bytes: &[u8]) -> bool {
        let Some(publisher) = self.publisher.as_deref() else {
            return false;
        };
        for attempt in 0..=BROADCAST_RETRIES {
            match publisher.publish(bytes) {
                Ok(()) => return true,
                Err(TransportError::Full) if attempt < BROADCAST_RETRIES => {
                    std::thread::sleep(BROADCAST_RETRY_DELAY);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "durable broadcast failed");
                    return false;
                }
            }
        }
        tracing::warn!(retries = BROADCAST_RETRIES, "durable broadcast gave up on backpressure");
        false
    }

    fn broadcast_record(&self, record: &OrderRecord) -> bool {
        if self.publisher.is_none() {
            return false;
        }
        let frame = {
            let mut encoder = self.encoder.lock();
            encoder.encode_order(record).to_vec()
        };
        self.broadcast(&frame)
    }
}
