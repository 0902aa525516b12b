//! Codec and transport working together across the public API
//!
//! Frames of all three templates ride the shared-memory stream and come
//! back intact, in order, across separate subscriber instances.

use chaser_core::core::Side;
use chaser_core::durable::{
    decode, DurableContext, Encoder, Message, OrderRecord, Publisher as _, Subscriber as _,
    TransportConfig, TransportKind,
};

fn shm_context(dir: &std::path::Path) -> DurableContext {
    DurableContext::new(TransportConfig {
        kind: TransportKind::Shm,
        channel_dir: dir.to_path_buf(),
        capacity: 64,
    })
    .unwrap()
}

#[test]
fn test_mixed_templates_roundtrip_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = shm_context(dir.path());
    let publisher = ctx.create_publisher(1001).unwrap();

    let mut encoder = Encoder::new();
    let bids = vec![(100.0, 1.0), (99.9, 0.5)];
    let asks = vec![(100.1, 2.0)];
    publisher
        .publish(encoder.encode_book_snapshot(11, &bids, &asks, "BTCUSDT"))
        .unwrap();
    publisher
        .publish(encoder.encode_trade_signal(22, 1, 100.05, 0.01, "BTCUSDT"))
        .unwrap();
    let record = OrderRecord::new("BOT-5-5", "BTCUSDT", Side::Buy, 100.05, 0.01, 33);
    publisher.publish(encoder.encode_order(&record)).unwrap();

    let subscriber = ctx.create_subscriber(1001).unwrap();
    let mut messages = Vec::new();
    let count = subscriber
        .poll(&mut |frame| messages.push(decode(frame).unwrap()))
        .unwrap();
    assert_eq!(count, 3);

    match &messages[0] {
        Message::BookSnapshot(snap) => {
            assert_eq!(snap.timestamp_ns, 11);
            assert_eq!(snap.bids, bids);
            assert_eq!(snap.asks, asks);
            assert_eq!(snap.symbol, "BTCUSDT");
        }
        other => panic!("expected book snapshot, got {:?}", other),
    }
    match &messages[1] {
        Message::TradeSignal(sig) => {
            assert_eq!(sig.action, 1);
            assert_eq!(sig.price, 100.05);
        }
        other => panic!("expected trade signal, got {:?}", other),
    }
    match &messages[2] {
        Message::Order(order) => {
            assert_eq!(order.to_record(), record);
        }
        other => panic!("expected order, got {:?}", other),
    }
}

// A second subscriber attached later replays the full stream history.
#[test]
fn test_late_subscriber_replays_history() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = shm_context(dir.path());
    let publisher = ctx.create_publisher(1002).unwrap();

    let mut encoder = Encoder::new();
    for i in 0..5u64 {
        publisher
            .publish(encoder.encode_trade_signal(i, 0, 100.0 + i as f64, 0.01, "BTCUSDT"))
            .unwrap();
    }

    let subscriber = ctx.create_subscriber(1002).unwrap();
    let mut timestamps = Vec::new();
    subscriber
        .poll(&mut |frame| {
            if let Ok(Message::TradeSignal(sig)) = decode(frame) {
                timestamps.push(sig.timestamp_ns);
            }
        })
        .unwrap();
    assert_eq!(timestamps, vec![0, 1, 2, 3, 4]);
}

// Corrupt bytes on the stream decode to errors, not panics.
#[test]
fn test_corrupt_frame_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = shm_context(dir.path());
    let publisher = ctx.create_publisher(9).unwrap();
    publisher.publish(&[0xde, 0xad, 0xbe, 0xef]).unwrap();

    let subscriber = ctx.create_subscriber(9).unwrap();
    let mut decoded = 0;
    let mut errors = 0;
    subscriber
        .poll(&mut |frame| match decode(frame) {
            Ok(_) => decoded += 1,
            Err(_) => errors += 1,
        })
        .unwrap();
    assert_eq!(decoded, 0);
    assert_eq!(errors, 1);
}
