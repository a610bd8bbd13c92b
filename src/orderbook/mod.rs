//! Order book replicas.
//!
//! This module provides the replica data structure and its store:
//!
//! - [`book`] - a single book with sorted levels and sequence tracking
//! - [`store`] - the [`ReplicaStore`] seam and the in-memory [`BookStore`]
//! - [`alias`] - which segments mirror another segment's book
//!
//! # Example
//!
//! ```rust
//! use depth_sync::orderbook::Orderbook;
//! use depth_sync::types::{InstrumentKey, PendingDiff, Segment, Snapshot};
//! use rust_decimal::Decimal;
//!
//! let key = InstrumentKey::new("BTC", "USDT", Segment::Spot);
//! let mut book = Orderbook::from_snapshot(
//!     &Snapshot::new(key, 100).bid(Decimal::from(99), Decimal::ONE),
//! );
//!
//! book.apply_diff(&PendingDiff::new(101, 101).ask(Decimal::from(101), Decimal::TWO))?;
//!
//! if let Some((price, qty)) = book.best_bid() {
//!     println!("Best bid: {} @ {}", qty, price);
//! }
//! # Ok::<(), depth_sync::Error>(())
//! ```

pub mod alias;
pub mod book;
pub mod store;

pub use book::Orderbook;
pub use store::{BookHeader, BookStore, ReplicaStore};
