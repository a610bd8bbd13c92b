//! Order book payloads: levels, incremental diffs and full snapshots.

use serde::{Deserialize, Serialize};

use super::instrument::InstrumentKey;
use super::{Price, Quantity, TimestampMs};

/// A single price level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Level price
    pub price: Price,
    /// Resting size; zero in a diff removes the price
    pub quantity: Quantity,
}

impl Level {
    /// Create a level
    pub fn new(price: Price, quantity: Quantity) -> Self {
        Self { price, quantity }
    }
}

impl From<(Price, Quantity)> for Level {
    fn from((price, quantity): (Price, Quantity)) -> Self {
        Self { price, quantity }
    }
}

/// An incremental order book update covering the sequence range
/// `first_update_id..=last_update_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDiff {
    /// First sequence id covered by this diff
    pub first_update_id: u64,
    /// Last sequence id covered by this diff
    pub last_update_id: u64,
    /// Bid level changes
    pub bids: Vec<Level>,
    /// Ask level changes
    pub asks: Vec<Level>,
    /// Server emission time
    pub push_time: TimestampMs,
    /// An empty diff is a valid no-op rather than an error
    pub allow_empty: bool,
}

impl PendingDiff {
    /// Create a diff with no level changes
    pub fn new(first_update_id: u64, last_update_id: u64) -> Self {
        Self {
            first_update_id,
            last_update_id,
            bids: Vec::new(),
            asks: Vec::new(),
            push_time: 0,
            allow_empty: false,
        }
    }

    /// Add a bid change
    #[must_use]
    pub fn bid(mut self, price: Price, quantity: Quantity) -> Self {
        self.bids.push(Level::new(price, quantity));
        self
    }

    /// Add an ask change
    #[must_use]
    pub fn ask(mut self, price: Price, quantity: Quantity) -> Self {
        self.asks.push(Level::new(price, quantity));
        self
    }

    /// Set the server push time
    #[must_use]
    pub fn pushed_at(mut self, push_time: TimestampMs) -> Self {
        self.push_time = push_time;
        self
    }

    /// Accept this diff even if it carries no level changes
    #[must_use]
    pub fn allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }

    /// True if the diff carries no level changes
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Full order book state fetched on demand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Book the snapshot belongs to
    pub key: InstrumentKey,
    /// Sequence id the snapshot is consistent with
    pub last_update_id: u64,
    /// Bid levels
    pub bids: Vec<Level>,
    /// Ask levels
    pub asks: Vec<Level>,
    /// Exchange time of the snapshot (or local receive time if absent)
    pub update_time: TimestampMs,
    /// Depth limit the snapshot was requested with
    pub max_depth: u32,
}

impl Snapshot {
    /// Create an empty snapshot at the given sequence id
    pub fn new(key: InstrumentKey, last_update_id: u64) -> Self {
        Self {
            key,
            last_update_id,
            bids: Vec::new(),
            asks: Vec::new(),
            update_time: 0,
            max_depth: 0,
        }
    }

    /// Add a bid level
    #[must_use]
    pub fn bid(mut self, price: Price, quantity: Quantity) -> Self {
        self.bids.push(Level::new(price, quantity));
        self
    }

    /// Add an ask level
    #[must_use]
    pub fn ask(mut self, price: Price, quantity: Quantity) -> Self {
        self.asks.push(Level::new(price, quantity));
        self
    }

    /// Same snapshot re-targeted at another book (segment alias install)
    #[must_use]
    pub fn for_key(&self, key: InstrumentKey) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }
}
