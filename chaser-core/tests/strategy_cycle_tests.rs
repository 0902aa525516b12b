//! End-to-end strategy cycles driven through a mock execution link
//!
//! Each test walks the state machine with a scripted book and scripted
//! order statuses, asserting the transitions and the orders that go out.

use chaser_core::config::StrategyConfig;
use chaser_core::core::{ClientId, Direction, OrderStatus, Side};
use chaser_core::gateway::{ExecutionLink, GatewayError, PlaceOrder};
use chaser_core::orderbook::{OrderBookManager, PriceLevel};
use chaser_core::strategy::{BotState, MartingaleChaser, QueueSink};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Call {
    Place(PlaceOrder),
    Cancel(String),
}

#[derive(Clone, Default)]
struct MockLink {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MockLink {
    fn places(&self) -> Vec<PlaceOrder> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Place(p) => Some(p.clone()),
                Call::Cancel(_) => None,
            })
            .collect()
    }

    fn cancels(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::Cancel(id) => Some(id.clone()),
                Call::Place(_) => None,
            })
            .collect()
    }

    fn last_place(&self) -> PlaceOrder {
        self.places().last().expect("no order placed").clone()
    }
}

impl ExecutionLink for MockLink {
    fn place(&self, order: PlaceOrder) -> Result<(), GatewayError> {
        self.calls.lock().push(Call::Place(order));
        Ok(())
    }

    fn cancel(&self, _symbol: &str, client_id: &ClientId) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .push(Call::Cancel(client_id.as_str().to_string()));
        Ok(())
    }
}

struct Harness {
    chaser: MartingaleChaser<MockLink>,
    link: MockLink,
    books: Arc<OrderBookManager>,
}

impl Harness {
    fn new(cfg: StrategyConfig) -> Self {
        let books = Arc::new(OrderBookManager::new());
        books.get_or_create("BTCUSDT");
        books.mark_subscribed("BTCUSDT");
        let link = MockLink::default();
        let (_sink, status_rx) = QueueSink::pair(64);
        let chaser = MartingaleChaser::new(
            "BTCUSDT".to_string(),
            cfg,
            Arc::clone(&books),
            link.clone(),
            None,
            status_rx,
        );
        Self { chaser, link, books }
    }

    fn set_book(&self, bid: (f64, f64), ask: (f64, f64)) {
        let book = self.books.get("BTCUSDT").unwrap();
        book.update_bids(&[PriceLevel::new(bid.0, bid.1)]);
        book.update_asks(&[PriceLevel::new(ask.0, ask.1)]);
        book.bump_update_id();
    }

    fn entry_id(&self) -> String {
        self.chaser.active_entry_id().unwrap().to_string()
    }

    fn exit_id(&self) -> String {
        self.chaser.active_exit_id().unwrap().to_string()
    }
}

fn cfg() -> StrategyConfig {
    StrategyConfig {
        qty_base: 0.01,
        tp_pct: 0.0005,
        sl_pct: 0.001,
        ..StrategyConfig::default()
    }
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

// S1: happy-path long win.
#[test]
fn test_happy_path_long_win() {
    let mut h = Harness::new(cfg());
    h.set_book((100.00, 1.0), (100.10, 1.0));

    // Idle -> Placing: maker entry at the mid.
    h.chaser.tick();
    assert_eq!(h.chaser.state(), BotState::Placing);
    let entry = h.link.last_place();
    assert_eq!(entry.side, Side::Buy);
    assert!(entry.maker);
    assert_close(entry.price, 100.05);
    assert_close(entry.qty, 0.01);

    // Placing -> Working on the ack.
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::New);
    assert_eq!(h.chaser.state(), BotState::Working);

    // Working -> InPosition on the fill; take-profit rests.
    h.chaser.on_status(&entry_id, OrderStatus::Filled);
    assert_eq!(h.chaser.state(), BotState::InPosition);
    assert!(h.chaser.is_filled());
    assert_close(h.chaser.entry_price(), 100.05);
    let tp = h.link.last_place();
    assert_eq!(tp.side, Side::Sell);
    assert!(tp.maker);
    assert_close(tp.price, 100.05 * 1.0005); // 100.10005

    // Market moves through the target; the resting exit fills.
    h.set_book((100.11, 1.0), (100.12, 1.0));
    h.chaser.tick();
    let exit_id = h.exit_id();
    h.chaser.on_status(&exit_id, OrderStatus::Filled);

    assert_eq!(h.chaser.state(), BotState::Idle);
    assert!(!h.chaser.is_filled());
    assert_eq!(h.chaser.step(), 0);
    assert_close(h.chaser.qty_current(), 0.01);
    assert_eq!(h.chaser.stats().trades, 1);
    assert_eq!(h.chaser.stats().wins, 1);
}

// S2: stop-loss, aggressive close, reverse and double.
#[test]
fn test_stop_loss_reverse_and_double() {
    let mut h = Harness::new(cfg());
    h.set_book((100.00, 1.0), (100.10, 1.0));

    h.chaser.tick();
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::New);
    h.chaser.on_status(&entry_id, OrderStatus::Filled);
    let tp_id = h.exit_id();

    // Mark drops below the stop threshold.
    h.set_book((99.89, 1.0), (99.99, 1.0));
    h.chaser.tick();

    // Resting exit cancelled, aggressive crossing close placed.
    assert_eq!(h.link.cancels(), vec![tp_id]);
    let close = h.link.last_place();
    assert_eq!(close.side, Side::Sell);
    assert!(!close.maker);
    assert_close(close.price, 99.89 - 0.1); // bid minus 10 ticks
    assert!(h.chaser.pending_reverse());
    assert_eq!(h.chaser.state(), BotState::Placing);

    // Close fills: loss booked, recovery pending.
    let close_id = h.exit_id();
    h.chaser.on_status(&close_id, OrderStatus::Filled);
    assert_eq!(h.chaser.state(), BotState::Recovering);
    assert_eq!(h.chaser.stats().trades, 1);
    assert_eq!(h.chaser.stats().wins, 0);

    // Next tick escalates and re-enters reversed at doubled size.
    h.chaser.tick();
    assert_eq!(h.chaser.state(), BotState::Placing);
    assert_eq!(h.chaser.direction(), Direction::Short);
    assert_eq!(h.chaser.step(), 1);
    assert_close(h.chaser.qty_current(), 0.02);
    assert!(!h.chaser.pending_reverse());
    let reentry = h.link.last_place();
    assert_eq!(reentry.side, Side::Sell);
    assert_close(reentry.qty, 0.02);
}

// S3: the market walks away from a working entry; chase re-places it.
#[test]
fn test_chase_on_price_move() {
    let mut h = Harness::new(StrategyConfig {
        chase_threshold: 0.1,
        t_grace_ms: 0,
        ..cfg()
    });
    h.set_book((100.00, 1.0), (100.10, 1.0));

    h.chaser.tick();
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::New);
    assert_eq!(h.chaser.state(), BotState::Working);

    // Bid advances past the threshold.
    h.set_book((100.20, 1.0), (100.30, 1.0));
    h.chaser.tick();
    assert_eq!(h.chaser.state(), BotState::Cancelling);
    assert_eq!(h.link.cancels(), vec![entry_id.clone()]);

    // Cancel ack returns the cycle to Idle; re-placed at the new mid.
    h.chaser.on_status(&entry_id, OrderStatus::Cancelled);
    assert_eq!(h.chaser.state(), BotState::Idle);
    h.chaser.tick();
    assert_eq!(h.chaser.state(), BotState::Placing);
    let replaced = h.link.last_place();
    assert_close(replaced.price, 100.25);
}

// S4: cancel loses the race with a fill.
#[test]
fn test_cancel_rejected_means_filled() {
    let mut h = Harness::new(StrategyConfig {
        t_stale_ms: 0,
        ..cfg()
    });
    h.set_book((100.00, 1.0), (100.10, 1.0));

    h.chaser.tick();
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::New);

    // Zero stale timeout forces an immediate refresh cancel.
    h.chaser.tick();
    assert_eq!(h.chaser.state(), BotState::Cancelling);

    // Venue rejects the cancel: the order is already filled.
    h.chaser.on_status(&entry_id, OrderStatus::Rejected);
    assert_eq!(h.chaser.state(), BotState::InPosition);
    assert!(h.chaser.is_filled());
    assert_close(h.chaser.entry_price(), 100.05);
    // Take-profit placed for the adopted position.
    let tp = h.link.last_place();
    assert_eq!(tp.side, Side::Sell);
    assert!(tp.maker);
}

// A fill that beats the New ack still opens the position.
#[test]
fn test_fast_fill_without_new() {
    let mut h = Harness::new(cfg());
    h.set_book((100.00, 1.0), (100.10, 1.0));

    h.chaser.tick();
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::Filled);
    assert_eq!(h.chaser.state(), BotState::InPosition);
    assert!(h.chaser.is_filled());
}

// Entry rejected while placing: back to Idle, next tick retries.
#[test]
fn test_entry_rejected_returns_to_idle() {
    let mut h = Harness::new(cfg());
    h.set_book((100.00, 1.0), (100.10, 1.0));

    h.chaser.tick();
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::Rejected);
    assert_eq!(h.chaser.state(), BotState::Idle);
    assert!(h.chaser.active_entry_id().is_none());

    h.chaser.tick();
    assert_eq!(h.chaser.state(), BotState::Placing);
    assert_eq!(h.link.places().len(), 2);
}

// At the step cap a loss resets sizing and holds direction.
#[test]
fn test_step_cap_resets_ladder() {
    let mut h = Harness::new(StrategyConfig {
        step_max: 0,
        ..cfg()
    });
    h.set_book((100.00, 1.0), (100.10, 1.0));

    h.chaser.tick();
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::Filled);

    h.set_book((99.89, 1.0), (99.99, 1.0));
    h.chaser.tick();
    assert!(!h.chaser.pending_reverse());

    let close_id = h.exit_id();
    h.chaser.on_status(&close_id, OrderStatus::Filled);
    assert_eq!(h.chaser.state(), BotState::Idle);
    assert_eq!(h.chaser.step(), 0);
    assert_close(h.chaser.qty_current(), 0.01);
    assert_eq!(h.chaser.direction(), Direction::Long);
    assert_eq!(h.chaser.stats().trades, 1);
    assert_eq!(h.chaser.stats().wins, 0);
}

// Unsolicited statuses for unknown ids are dropped without effect.
#[test]
fn test_unknown_client_id_dropped() {
    let mut h = Harness::new(cfg());
    h.set_book((100.00, 1.0), (100.10, 1.0));

    h.chaser.tick();
    let state_before = h.chaser.state();
    h.chaser.on_status("NOT-OURS-1", OrderStatus::Filled);
    h.chaser.on_status("NOT-OURS-2", OrderStatus::Rejected);
    assert_eq!(h.chaser.state(), state_before);
    assert_eq!(h.link.places().len(), 1);
}

// Validation gate: no order goes out against bad books.
#[test]
fn test_validation_blocks_bad_books() {
    let mut h = Harness::new(cfg());

    // Empty book.
    h.chaser.tick();
    assert_eq!(h.chaser.state(), BotState::Idle);
    assert!(h.link.places().is_empty());

    // Single-sided book.
    let book = h.books.get("BTCUSDT").unwrap();
    book.update_bids(&[PriceLevel::new(100.0, 1.0)]);
    h.chaser.tick();
    assert!(h.link.places().is_empty());

    // Crossed book (bid == ask).
    book.update_asks(&[PriceLevel::new(100.0, 1.0)]);
    h.chaser.tick();
    assert!(h.link.places().is_empty());

    // Zero-quantity top level.
    book.update_bids(&[PriceLevel::new(99.0, 0.0)]);
    book.update_asks(&[PriceLevel::new(100.0, 1.0)]);
    h.chaser.tick();
    assert!(h.link.places().is_empty());
}

#[test]
fn test_unsubscribed_symbol_is_noop() {
    let books = Arc::new(OrderBookManager::new());
    let book = books.get_or_create("BTCUSDT");
    book.update_bids(&[PriceLevel::new(100.0, 1.0)]);
    book.update_asks(&[PriceLevel::new(100.1, 1.0)]);
    // No mark_subscribed call.
    let link = MockLink::default();
    let (_sink, status_rx) = QueueSink::pair(8);
    let mut chaser = MartingaleChaser::new(
        "BTCUSDT".to_string(),
        cfg(),
        books,
        link.clone(),
        None,
        status_rx,
    );
    chaser.tick();
    assert!(link.places().is_empty());
}

// Placement acknowledgement timeout triggers a compensating cancel and
// stays in Placing.
#[test]
fn test_ack_timeout_issues_cancel() {
    let mut h = Harness::new(StrategyConfig {
        t_order_ms: 0,
        ..cfg()
    });
    h.set_book((100.00, 1.0), (100.10, 1.0));

    h.chaser.tick();
    let entry_id = h.entry_id();
    assert_eq!(h.chaser.state(), BotState::Placing);

    h.chaser.tick();
    assert_eq!(h.chaser.state(), BotState::Placing);
    assert_eq!(h.link.cancels(), vec![entry_id]);
}

// The short side mirrors the long entry policy around the mid, with the
// safety clamp keeping a post-only order off the far touch.
#[test]
fn test_short_entry_price_clamped() {
    let mut h = Harness::new(StrategyConfig {
        entry_offset_ticks: 20.0,
        safety_ticks: 1.0,
        ..cfg()
    });
    // Long entry: mid - 0.2 = 99.85, far below ask - safety.
    h.set_book((100.00, 1.0), (100.10, 1.0));
    h.chaser.tick();
    let entry = h.link.last_place();
    assert_close(entry.price, 99.85);
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::Filled);

    // Stop out to flip into the short direction.
    h.set_book((99.70, 1.0), (99.80, 1.0));
    h.chaser.tick();
    let close_id = h.exit_id();
    h.chaser.on_status(&close_id, OrderStatus::Filled);
    h.chaser.tick();

    assert_eq!(h.chaser.direction(), Direction::Short);
    let entry = h.link.last_place();
    assert_eq!(entry.side, Side::Sell);
    // Short target = mid + 0.2 = 99.95, above the bid + 1 tick floor.
    assert_close(entry.price, 99.95);
}

// An offset pushing the short entry through the bid is clamped to the
// safety floor.
#[test]
fn test_entry_safety_clamp() {
    let mut h = Harness::new(StrategyConfig {
        entry_offset_ticks: -20.0, // offset toward the wrong side
        safety_ticks: 2.0,
        ..cfg()
    });
    // Long entry target mid + 0.2 = 100.25 is capped at ask - 2 ticks.
    h.set_book((100.00, 1.0), (100.10, 1.0));
    h.chaser.tick();
    let entry = h.link.last_place();
    assert_close(entry.price, 100.08);
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::Filled);

    // Stop out (entry 100.08, mark 99.89 is -0.19%).
    h.set_book((99.89, 1.0), (99.99, 1.0));
    h.chaser.tick();
    let close_id = h.exit_id();
    h.chaser.on_status(&close_id, OrderStatus::Filled);
    h.chaser.tick();

    assert_eq!(h.chaser.direction(), Direction::Short);
    let entry = h.link.last_place();
    // Short target = mid - 0.2 = 99.74, clamped up to bid + 2 ticks.
    assert_close(entry.price, 99.91);
}

// Two consecutive losses keep doubling; a win then resets the ladder.
#[test]
fn test_full_martingale_sequence() {
    let mut h = Harness::new(cfg());

    for expected_step in 1..=2u32 {
        h.set_book((100.00, 1.0), (100.10, 1.0));
        h.chaser.tick();
        let entry_id = h.entry_id();
        h.chaser.on_status(&entry_id, OrderStatus::Filled);

        // Adverse move for whichever direction we are in.
        match h.chaser.direction() {
            Direction::Long => h.set_book((99.80, 1.0), (99.90, 1.0)),
            Direction::Short => h.set_book((100.20, 1.0), (100.30, 1.0)),
        }
        h.chaser.tick();
        let close_id = h.exit_id();
        h.chaser.on_status(&close_id, OrderStatus::Filled);
        h.chaser.tick();
        assert_eq!(h.chaser.step(), expected_step);
    }
    assert_close(h.chaser.qty_current(), 0.04);
    assert_eq!(h.chaser.direction(), Direction::Long); // flipped twice

    // Win the recovery trade: ladder resets.
    let entry_id = h.entry_id();
    h.chaser.on_status(&entry_id, OrderStatus::Filled);
    let exit_id = h.exit_id();
    h.chaser.on_status(&exit_id, OrderStatus::Filled);
    assert_eq!(h.chaser.step(), 0);
    assert_close(h.chaser.qty_current(), 0.01);
    assert_eq!(h.chaser.stats().trades, 3);
    assert_eq!(h.chaser.stats().wins, 1);
}
