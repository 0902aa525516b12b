//! Durable stream spy
//!
//! Attaches to a shared-memory stream file and pretty-prints every
//! decoded message. Useful for watching book snapshots and order records
//! from outside the trading process.

use anyhow::Result;
use chaser_core::durable::{
    decode, DurableContext, Message, Subscriber as _, TransportConfig, TransportKind,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory holding the stream files
    #[arg(short, long, default_value = "/dev/shm/chaser")]
    dir: PathBuf,

    /// Stream id to tail (1001 = book snapshots, 1002 = signals/orders)
    #[arg(short, long, default_value = "1002")]
    stream_id: i32,

    /// Replay the whole stream, then keep following
    #[arg(short, long)]
    follow: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let context = DurableContext::new(TransportConfig {
        kind: TransportKind::Shm,
        channel_dir: args.dir.clone(),
        capacity: 1024,
    })?;
    let subscriber = context.create_subscriber(args.stream_id)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))?;
    }

    tracing::info!(dir = %args.dir.display(), stream = args.stream_id, "spy attached");
    let mut total = 0usize;
    loop {
        let count = subscriber.poll(&mut |frame| print_frame(frame))?;
        total += count;
        if !args.follow && count == 0 && total > 0 {
            break;
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    tracing::info!(messages = total, "spy detached");
    Ok(())
}

fn print_frame(frame: &[u8]) {
    match decode(frame) {
        Ok(Message::BookSnapshot(snap)) => {
            let bid = snap.bids.first().map(|l| l.0).unwrap_or(0.0);
            let ask = snap.asks.first().map(|l| l.0).unwrap_or(0.0);
            println!(
                "BOOK  {:>10}  bid {:>12.4} ask {:>12.4}  depth {}x{}  ts {}",
                snap.symbol,
                bid,
                ask,
                snap.bids.len(),
                snap.asks.len(),
                snap.timestamp_ns
            );
        }
        Ok(Message::TradeSignal(sig)) => {
            println!(
                "SIG   {:>10}  action {}  px {:>12.4}  qty {:.6}  ts {}",
                sig.symbol, sig.action, sig.price, sig.qty, sig.timestamp_ns
            );
        }
        Ok(Message::Order(order)) => {
            println!(
                "ORDER {:>10}  {}  px {:>12.4}  qty {:.6}  active {}  id {}",
                order.symbol, order.side, order.price, order.qty, order.is_active, order.order_id
            );
        }
        Err(e) => {
            eprintln!("undecodable frame ({} bytes): {}", frame.len(), e);
        }
    }
}
