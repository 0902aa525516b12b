//! Market ingest context
//!
//! Owns the public WS session: subscribes to the orderbook topic, parses
//! delta/snapshot pushes and rewrites the lock-free book. Optionally
//! encodes each applied update as a template-2 book snapshot on the
//! durable book stream.
//!
//! This is the single writer for the book; the strategy only reads.

use crate::config::VenueConfig;
use crate::durable::{Encoder, Publisher};
use crate::gateway::messages::{self, Inbound, OrderbookData};
use crate::gateway::session::{SessionError, WsSession};
use crate::orderbook::{OrderBookManager, PriceLevel, DEPTH};
use crate::resilience::ExponentialBackoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counters reported when the ingest thread exits
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedStats {
    pub messages_received: u64,
    pub updates_applied: u64,
    pub snapshots_published: u64,
    pub reconnects: u64,
}

pub struct MarketFeed {
    symbol: String,
    venue: VenueConfig,
    books: Arc<OrderBookManager>,
    publisher: Option<Box<dyn Publisher>>,
    encoder: Encoder,
    stats: FeedStats,
}

impl MarketFeed {
    pub fn new(
        symbol: String,
        venue: VenueConfig,
        books: Arc<OrderBookManager>,
        publisher: Option<Box<dyn Publisher>>,
    ) -> Self {
        Self {
            symbol,
            venue,
            books,
            publisher,
            encoder: Encoder::new(),
            stats: FeedStats::default(),
        }
    }

    /// Drive the public session until shutdown, reconnecting with backoff
    pub fn run(mut self, shutdown: Arc<AtomicBool>) -> FeedStats {
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
                            "market feed connect failed");
                        self.stats.reconnects += 1;
                        sleep_interruptible(delay, &shutdown);
                    }
                }
                continue;
            };

            match active.poll_message() {
                Ok(Some(text)) => self.handle_message(&text),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "market feed read failed");
                    session = None;
                    self.stats.reconnects += 1;
                }
            }
        }

        tracing::info!(
            messages = self.stats.messages_received,
            updates = self.stats.updates_applied,
            "market feed stopped"
        );
        self.stats
    }

    /// Connect and subscribe the orderbook topic. The book is created
    /// before the subscription is sent so readers never race creation.
    fn establish(&mut self) -> Result<WsSession, SessionError> {
        let mut session =
            WsSession::connect(&self.venue.public_ws_url, self.venue.read_timeout())?;
        self.books.get_or_create(&self.symbol);

        let topic = messages::orderbook_topic(self.venue.depth, &self.symbol);
        session.send_text(&messages::subscribe_request(&[topic.as_str()]))?;
        self.books.mark_subscribed(&self.symbol);
        tracing::info!(topic, "orderbook subscribed");
        Ok(session)
    }

    /// Parse one complete inbound message and apply it to the book
    pub fn handle_message(&mut self, text: &str) {
        self.stats.messages_received += 1;

        let msg = match Inbound::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unparseable feed frame");
                return;
            }
        };

        if let Some(success) = msg.success {
            if success {
                tracing::info!("subscription confirmed by venue");
            } else {
                tracing::error!(ret_msg = ?msg.ret_msg, "subscription failed");
            }
            return;
        }

        let Some(topic) = msg.topic.as_deref() else {
            return;
        };
        if !topic.starts_with("orderbook.") {
            return;
        }
        let Some(symbol) = topic.rsplit('.').next() else {
            return;
        };
        let Some(data) = msg.data else {
            tracing::warn!(topic, "orderbook push without data");
            return;
        };
        let payload: OrderbookData = match serde_json::from_value(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "malformed orderbook payload");
                return;
            }
        };

        let bids = parse_levels(&payload.b);
        let asks = parse_levels(&payload.a);
        if bids.is_empty() && asks.is_empty() {
            return;
        }

        let book = self.books.get_or_create(symbol);
        // A delta for one side must not wipe the other.
        if !bids.is_empty() {
            book.update_bids(&bids);
        }
        if !asks.is_empty() {
            book.update_asks(&asks);
        }
        book.bump_update_id();
        self.stats.updates_applied += 1;

        if self.stats.updates_applied % 500 == 0 {
            tracing::debug!(
                symbol,
                updates = self.stats.updates_applied,
                update_id = book.update_id(),
                "orderbook update"
            );
        }

        if let Some(publisher) = self.publisher.as_deref() {
            let bids = levels_to_pairs(&book.snapshot_bids(DEPTH));
            let asks = levels_to_pairs(&book.snapshot_asks(DEPTH));
            let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
            let frame = self
                .encoder
                .encode_book_snapshot(timestamp, &bids, &asks, symbol);
            match publisher.publish(frame) {
                Ok(()) => self.stats.snapshots_published += 1,
                Err(e) => tracing::debug!(error = %e, "book snapshot publish failed"),
            }
        }
    }

    pub fn stats(&self) -> FeedStats {
        self.stats
    }
}

/// Parse `[price, qty]` string pairs, dropping entries that fail to
/// parse or carry a non-positive field (a zero qty is a delta removal).
fn parse_levels(raw: &[Vec<String>]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|entry| {
            let price: f64 = entry.first()?.parse().ok()?;
            let qty: f64 = entry.get(1)?.parse().ok()?;
            let level = PriceLevel::new(price, qty);
            level.is_valid().then_some(level)
        })
        .collect()
}

fn levels_to_pairs(levels: &[PriceLevel]) -> Vec<(f64, f64)> {
    levels.iter().map(|l| (l.price, l.qty)).collect()
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
    use crate::durable::{decode, ChannelStream, Message};

    fn feed_with_publisher() -> (MarketFeed, crate::durable::transport::ChannelSubscriber) {
        let stream = ChannelStream::new(1001, 64);
        let publisher = stream.publisher();
        let subscriber = stream.subscriber();
        let venue = VenueConfig {
            public_ws_url: "wss://example/public".into(),
            trade_ws_url: "wss://example/trade".into(),
            depth: 50,
            category: "linear".into(),
            taker_time_in_force: "IOC".into(),
            auth_window_ms: 5_000,
            read_timeout_ms: 50,
            enable_trading: false,
        };
        let feed = MarketFeed::new(
            "BTCUSDT".into(),
            venue,
            Arc::new(OrderBookManager::new()),
            Some(Box::new(publisher)),
        );
        (feed, subscriber)
    }

    fn book_push(bids: &str, asks: &str) -> String {
        format!(
            r#"{{"topic":"orderbook.50.BTCUSDT","type":"delta","data":{{"s":"BTCUSDT","b":{},"a":{},"u":7}}}}"#,
            bids, asks
        )
    }

    #[test]
    fn test_update_applied_to_book() {
        let (mut feed, _sub) = feed_with_publisher();
        feed.handle_message(&book_push(
            r#"[["100.00","1.0"],["99.90","2.0"]]"#,
            r#"[["100.10","1.5"]]"#,
        ));

        let book = feed.books.get("BTCUSDT").unwrap();
        assert_eq!(book.best_bid(), Some((100.0, 1.0)));
        assert_eq!(book.best_ask(), Some((100.1, 1.5)));
        assert_eq!(book.update_id(), 1);
    }

    #[test]
    fn test_one_sided_delta_preserves_other_side() {
        let (mut feed, _sub) = feed_with_publisher();
        feed.handle_message(&book_push(
            r#"[["100.00","1.0"]]"#,
            r#"[["100.10","1.0"]]"#,
        ));
        feed.handle_message(&book_push(r#"[["100.05","2.0"]]"#, "[]"));

        let book = feed.books.get("BTCUSDT").unwrap();
        assert_eq!(book.best_bid(), Some((100.05, 2.0)));
        assert_eq!(book.best_ask(), Some((100.1, 1.0)));
        assert_eq!(book.update_id(), 2);
    }

    #[test]
    fn test_zero_qty_levels_dropped() {
        let (mut feed, _sub) = feed_with_publisher();
        feed.handle_message(&book_push(
            r#"[["100.00","0"],["99.90","1.0"]]"#,
            "[]",
        ));

        let book = feed.books.get("BTCUSDT").unwrap();
        assert_eq!(book.best_bid(), Some((99.9, 1.0)));
    }

    #[test]
    fn test_empty_push_is_noop() {
        let (mut feed, _sub) = feed_with_publisher();
        feed.handle_message(&book_push("[]", "[]"));
        let book = feed.books.get("BTCUSDT");
        assert!(book.is_none() || book.unwrap().update_id() == 0);
    }

    #[test]
    fn test_garbage_and_unrelated_messages_ignored() {
        let (mut feed, _sub) = feed_with_publisher();
        feed.handle_message("{broken");
        feed.handle_message(r#"{"topic":"tickers.BTCUSDT","data":{}}"#);
        feed.handle_message(r#"{"success":true,"op":"subscribe"}"#);
        assert_eq!(feed.stats().updates_applied, 0);
        assert_eq!(feed.stats().messages_received, 3);
    }

    #[test]
    fn test_snapshot_published_on_update() {
        let (mut feed, subscriber) = feed_with_publisher();
        feed.handle_message(&book_push(
            r#"[["100.00","1.0"]]"#,
            r#"[["100.10","1.5"]]"#,
        ));

        use crate::durable::Subscriber;
        let mut frames = Vec::new();
        subscriber
            .poll(&mut |data| frames.push(data.to_vec()))
            .unwrap();
        assert_eq!(frames.len(), 1);
        match decode(&frames[0]).unwrap() {
            Message::BookSnapshot(snap) => {
                assert_eq!(snap.symbol, "BTCUSDT");
                assert_eq!(snap.bids, vec![(100.0, 1.0)]);
                assert_eq!(snap.asks, vec![(100.1, 1.5)]);
            }
            other => panic!("wrong template: {:?}", other),
        }
        assert_eq!(feed.stats().snapshots_published, 1);
    }

    #[test]
    fn test_parse_levels_rejects_malformed() {
        let raw = vec![
            vec!["100.0".to_string(), "1.0".to_string()],
            vec!["oops".to_string(), "1.0".to_string()],
            vec!["99.0".to_string()],
            vec!["-1.0".to_string(), "1.0".to_string()],
        ];
        let levels = parse_levels(&raw);
        assert_eq!(levels, vec![PriceLevel::new(100.0, 1.0)]);
    }
}
