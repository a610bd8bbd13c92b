//! Order book replica data structure.
//!
//! This implementation uses `BTreeMap` for sorted price levels, providing:
//!
//! - O(log n) insertion, deletion, and lookup
//! - O(1) access to best bid/ask (via `first_key_value` / `last_key_value`)
//! - Ordered iteration for depth-of-book queries

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::Error;
use crate::types::{now_ms, InstrumentKey, Level, PendingDiff, Price, Quantity, Snapshot, TimestampMs};

/// Local replica of one exchange order book.
///
/// # Design Decisions
///
/// 1. **Decimal prices**: Prices and sizes stay exact `Decimal`s, so a level
///    removal in a diff always finds the level it refers to.
///
/// 2. **BTreeMap**: Provides sorted price levels with O(log n) operations.
///    Best bid/ask are O(1) via `last_key_value()` / `first_key_value()`.
///
/// 3. **Sequence tracking**: `last_update_id` is the last feed sequence id
///    folded into the book. Diffs never move it backwards; a snapshot load
///    may.
///
/// # Thread Safety
///
/// This struct is `Send + Sync` but not internally synchronized. For
/// concurrent access, keep it in a [`BookStore`](super::BookStore).
#[derive(Debug, Clone)]
pub struct Orderbook {
    /// Book identity
    key: InstrumentKey,

    /// Bid levels: price -> quantity
    /// Sorted ascending by price (best bid = highest = last)
    bids: BTreeMap<Price, Quantity>,

    /// Ask levels: price -> quantity
    /// Sorted ascending by price (best ask = lowest = first)
    asks: BTreeMap<Price, Quantity>,

    /// Last sequence id applied
    last_update_id: u64,

    /// Local time of the last snapshot load or diff
    last_updated: TimestampMs,

    /// Server emission time of the last diff (latency accounting)
    last_pushed: TimestampMs,

    /// Depth limit of the snapshot this book was loaded from
    max_depth: u32,
}

impl Orderbook {
    /// Create a new empty book for the given instrument
    #[must_use]
    pub fn new(key: InstrumentKey) -> Self {
        Self {
            key,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            last_updated: 0,
            last_pushed: 0,
            max_depth: 0,
        }
    }

    /// Build a book straight from a snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut book = Self::new(snapshot.key.clone());
        book.load_snapshot(snapshot);
        book
    }

    /// Get the instrument key
    #[must_use]
    pub fn key(&self) -> &InstrumentKey {
        &self.key
    }

    /// Get the last applied sequence id
    #[must_use]
    pub const fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Local time of the last change
    #[must_use]
    pub const fn last_updated(&self) -> TimestampMs {
        self.last_updated
    }

    /// Server push time of the last applied diff
    #[must_use]
    pub const fn last_pushed(&self) -> TimestampMs {
        self.last_pushed
    }

    /// Depth limit of the loaded snapshot
    #[must_use]
    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Replace the entire book with a snapshot.
    ///
    /// The sequence id is reset to the snapshot's, even if that is lower
    /// than the previous one.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) {
        self.bids.clear();
        self.asks.clear();

        for level in &snapshot.bids {
            if level.quantity > Decimal::ZERO {
                self.bids.insert(level.price, level.quantity);
            }
        }
        for level in &snapshot.asks {
            if level.quantity > Decimal::ZERO {
                self.asks.insert(level.price, level.quantity);
            }
        }

        self.last_update_id = snapshot.last_update_id;
        self.last_updated = snapshot.update_time;
        self.max_depth = snapshot.max_depth;
    }

    /// Apply an incremental diff.
    ///
    /// Sizes are absolute: a level with quantity zero removes the price,
    /// anything else replaces it. Sequence continuity is the caller's
    /// concern; this only refuses empty diffs not flagged `allow_empty`.
    pub fn apply_diff(&mut self, diff: &PendingDiff) -> Result<(), Error> {
        if diff.is_empty() && !diff.allow_empty {
            return Err(Error::EmptyUpdate(self.key.clone()));
        }

        for level in &diff.bids {
            Self::set(&mut self.bids, level);
        }
        for level in &diff.asks {
            Self::set(&mut self.asks, level);
        }

        self.last_update_id = self.last_update_id.max(diff.last_update_id);
        self.last_updated = now_ms();
        if diff.push_time > 0 {
            self.last_pushed = diff.push_time;
        }
        Ok(())
    }

    fn set(side: &mut BTreeMap<Price, Quantity>, level: &Level) {
        if level.quantity.is_zero() {
            side.remove(&level.price);
        } else {
            side.insert(level.price, level.quantity);
        }
    }

    /// Get the best bid (highest bid)
    ///
    /// Returns `(price, quantity)` or `None` if no bids.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Price, Quantity)> {
        self.bids.last_key_value().map(|(&p, &q)| (p, q))
    }

    /// Get the best ask (lowest ask)
    ///
    /// Returns `(price, quantity)` or `None` if no asks.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Price, Quantity)> {
        self.asks.first_key_value().map(|(&p, &q)| (p, q))
    }

    /// Get the mid price, or `None` if either side is empty
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Get the spread
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
            _ => None,
        }
    }

    /// Check if the book is crossed (best bid >= best ask)
    ///
    /// This shouldn't happen in a healthy replica but is useful for validation.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// Get all bid levels, sorted by price descending (best first)
    pub fn bids(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.bids.iter().rev().map(|(&p, &q)| (p, q))
    }

    /// Get all ask levels, sorted by price ascending (best first)
    pub fn asks(&self) -> impl Iterator<Item = (Price, Quantity)> + '_ {
        self.asks.iter().map(|(&p, &q)| (p, q))
    }

    /// Get the top N bid levels
    #[must_use]
    pub fn top_bids(&self, n: usize) -> Vec<(Price, Quantity)> {
        self.bids().take(n).collect()
    }

    /// Get the top N ask levels
    #[must_use]
    pub fn top_asks(&self, n: usize) -> Vec<(Price, Quantity)> {
        self.asks().take(n).collect()
    }

    /// Check if the book has no levels
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Get the number of price levels as `(bids, asks)`
    #[must_use]
    pub fn num_levels(&self) -> (usize, usize) {
        (self.bids.len(), self.asks.len())
    }
}
