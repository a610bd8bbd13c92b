//! Live depth sync - keeps local replicas of a few books in sync with the
//! exchange's diff stream and prints them as they change.
//!
//! Usage:
//!   cargo run --example live_depth
//!
//! Optional:
//!   DEPTH_SYNC_SEGMENT=linear_futures  # Segment to follow (default: spot)
//!   DEPTH_SYNC_PAIRS=BTC/USDT,ETH/USDT # Pairs to follow (default: BTC/USDT)
//!   DEPTH_SYNC_TESTNET=1               # Use testnet endpoints
//!   RUST_LOG=depth_sync=debug          # See buffering and stale skips

use std::time::{Duration, Instant};

use depth_sync::config::Environment;
use depth_sync::orderbook::Orderbook;
use depth_sync::types::{InstrumentKey, Segment};
use depth_sync::{Config, SyncClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("depth_sync=info".parse()?),
        )
        .init();

    let segment: Segment = std::env::var("DEPTH_SYNC_SEGMENT")
        .unwrap_or_else(|_| "spot".to_string())
        .parse()?;
    let environment = if std::env::var("DEPTH_SYNC_TESTNET").is_ok() {
        Environment::Testnet
    } else {
        Environment::Production
    };

    let keys: Vec<InstrumentKey> = std::env::var("DEPTH_SYNC_PAIRS")
        .unwrap_or_else(|_| "BTC/USDT".to_string())
        .split(',')
        .filter_map(|pair| pair.trim().split_once('/'))
        .map(|(base, quote)| InstrumentKey::new(base, quote, segment))
        .collect();
    if keys.is_empty() {
        return Err("DEPTH_SYNC_PAIRS has no BASE/QUOTE pairs".into());
    }

    println!("=== Live Depth Sync ({}) ===\n", segment);

    let config = Config::new()
        .with_environment(environment)
        .with_default_depth(100);
    let (client, mut faults) = SyncClient::new(config)?;

    tokio::spawn(async move {
        while let Some(fault) = faults.recv().await {
            println!("[FAULT] {} | {}", fault.key, fault.error);
        }
    });

    let mut stream = client.connect(segment).await?;
    println!("Connected!\n");

    let feed = client.feed(segment);
    for key in &keys {
        feed.track(key)?;
        client
            .subscribe_depth(&*stream.writer(), key)
            .await?;
        println!("Subscribed to {}", key);
    }

    println!("\n=== Streaming Live Data ===");
    println!("(Press Ctrl+C to stop)\n");

    let mut message_count = 0u64;
    let start_time = Instant::now();
    let mut last_print = Instant::now();

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                println!("[ERROR] {}", e);
                break;
            }
        };
        message_count += 1;

        if let Err(e) = feed.handle(msg) {
            println!("[ERROR] {}", e);
        }

        if last_print.elapsed() >= Duration::from_secs(2) {
            last_print = Instant::now();
            for key in &keys {
                match client.books().orderbook(key) {
                    Some(book) if !client.updates().is_resyncing(key) => print_book_summary(&book),
                    _ => println!("  {} | syncing ({} buffered)", key, client.updates().buffered_len(key)),
                }
            }
            let elapsed = start_time.elapsed().as_secs_f64();
            println!(
                "--- {} messages in {:.1}s ({:.1} msg/s) ---\n",
                message_count,
                elapsed,
                message_count as f64 / elapsed
            );
        }
    }

    client.shutdown().await;
    println!("\nStream closed after {} messages", message_count);
    Ok(())
}

fn print_book_summary(book: &Orderbook) {
    let (bid_levels, ask_levels) = book.num_levels();
    let fmt_level = |level: Option<(rust_decimal::Decimal, rust_decimal::Decimal)>| {
        level.map_or_else(|| "-".to_string(), |(price, qty)| format!("{} x {}", qty, price))
    };
    println!(
        "  {} | bid {} | ask {} | spread {} | levels {}/{} | id {}",
        book.key(),
        fmt_level(book.best_bid()),
        fmt_level(book.best_ask()),
        book.spread().map_or_else(|| "-".to_string(), |s| s.to_string()),
        bid_levels,
        ask_levels,
        book.last_update_id()
    );
}
