//! Replica store holding every tracked order book.
//!
//! [`ReplicaStore`] is the seam the synchronization engine writes through;
//! [`BookStore`] is the in-memory implementation.
//!
//! # Design
//!
//! The store uses a `parking_lot::RwLock` around the key map, taken for write
//! only when a book is first inserted, and a `RwLock` per book, allowing
//! concurrent reads while ensuring exclusive write access during updates.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::types::{InstrumentKey, PendingDiff, Price, Quantity, Snapshot, TimestampMs};

use super::Orderbook;

/// Cheap summary of a replica, enough to drive sequencing decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookHeader {
    /// Book identity
    pub key: InstrumentKey,
    /// Last applied sequence id
    pub last_update_id: u64,
    /// Local time of the last change
    pub last_updated: TimestampMs,
    /// Server push time of the last applied diff
    pub last_pushed: TimestampMs,
    /// Depth limit of the loaded snapshot
    pub max_depth: u32,
    /// Number of bid levels
    pub bid_levels: usize,
    /// Number of ask levels
    pub ask_levels: usize,
}

impl BookHeader {
    fn of(book: &Orderbook) -> Self {
        let (bid_levels, ask_levels) = book.num_levels();
        Self {
            key: book.key().clone(),
            last_update_id: book.last_update_id(),
            last_updated: book.last_updated(),
            last_pushed: book.last_pushed(),
            max_depth: book.max_depth(),
            bid_levels,
            ask_levels,
        }
    }

    /// True if the book holds at least one level
    pub fn has_levels(&self) -> bool {
        self.bid_levels > 0 || self.ask_levels > 0
    }
}

/// Authoritative in-memory books, keyed by instrument.
///
/// Implementations do their own locking; the engine never holds one of
/// their locks across calls.
pub trait ReplicaStore: Send + Sync {
    /// Header of the replica for `key`, or [`Error::BookNotFound`]
    fn get(&self, key: &InstrumentKey) -> Result<BookHeader, Error>;

    /// Replace (or create) the replica for `snapshot.key`
    fn load_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error>;

    /// Apply a diff to an existing replica; fails with
    /// [`Error::BookNotFound`] if no baseline was loaded for `key`
    fn apply_diff(&self, key: &InstrumentKey, diff: &PendingDiff) -> Result<(), Error>;
}

/// Thread-safe container of order book replicas.
///
/// # Example
///
/// ```rust
/// use depth_sync::orderbook::{BookStore, ReplicaStore};
/// use depth_sync::types::{InstrumentKey, PendingDiff, Segment, Snapshot};
/// use rust_decimal::Decimal;
///
/// let store = BookStore::new();
/// let key = InstrumentKey::new("BTC", "USDT", Segment::Spot);
///
/// store
///     .load_snapshot(&Snapshot::new(key.clone(), 10).bid(Decimal::from(100), Decimal::ONE))
///     .unwrap();
/// store
///     .apply_diff(&key, &PendingDiff::new(11, 12).ask(Decimal::from(101), Decimal::ONE))
///     .unwrap();
///
/// assert_eq!(store.get(&key).unwrap().last_update_id, 12);
/// assert_eq!(store.best_ask(&key), Some((Decimal::from(101), Decimal::ONE)));
/// ```
#[derive(Debug, Default)]
pub struct BookStore {
    /// Books by instrument
    books: RwLock<FxHashMap<InstrumentKey, RwLock<Orderbook>>>,
}

impl BookStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            books: RwLock::new(FxHashMap::default()),
        }
    }

    /// Get a copy of a book
    ///
    /// Returns a cloned copy of the book for safe reading without holding locks.
    pub fn orderbook(&self, key: &InstrumentKey) -> Option<Orderbook> {
        let books = self.books.read();
        books.get(key).map(|b| b.read().clone())
    }

    /// Get best bid for a book
    pub fn best_bid(&self, key: &InstrumentKey) -> Option<(Price, Quantity)> {
        let books = self.books.read();
        books.get(key).and_then(|b| b.read().best_bid())
    }

    /// Get best ask for a book
    pub fn best_ask(&self, key: &InstrumentKey) -> Option<(Price, Quantity)> {
        let books = self.books.read();
        books.get(key).and_then(|b| b.read().best_ask())
    }

    /// Remove a book from the store
    pub fn remove(&self, key: &InstrumentKey) -> Option<Orderbook> {
        self.books.write().remove(key).map(RwLock::into_inner)
    }

    /// Get number of stored books
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    /// Check if the store holds no books
    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// Get all stored keys
    pub fn keys(&self) -> Vec<InstrumentKey> {
        self.books.read().keys().cloned().collect()
    }
}

impl ReplicaStore for BookStore {
    fn get(&self, key: &InstrumentKey) -> Result<BookHeader, Error> {
        let books = self.books.read();
        books
            .get(key)
            .map(|b| BookHeader::of(&b.read()))
            .ok_or_else(|| Error::BookNotFound(key.clone()))
    }

    fn load_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error> {
        {
            let books = self.books.read();
            if let Some(book) = books.get(&snapshot.key) {
                book.write().load_snapshot(snapshot);
                return Ok(());
            }
        }

        let mut books = self.books.write();
        books
            .entry(snapshot.key.clone())
            .or_insert_with(|| RwLock::new(Orderbook::new(snapshot.key.clone())))
            .get_mut()
            .load_snapshot(snapshot);
        Ok(())
    }

    fn apply_diff(&self, key: &InstrumentKey, diff: &PendingDiff) -> Result<(), Error> {
        let books = self.books.read();
        let book = books
            .get(key)
            .ok_or_else(|| Error::BookNotFound(key.clone()))?;
        let result = book.write().apply_diff(diff);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Segment;
    use rust_decimal::Decimal;

    fn key(segment: Segment) -> InstrumentKey {
        InstrumentKey::new("ETH", "USDT", segment)
    }

    #[test]
    fn test_get_missing_book() {
        let store = BookStore::new();
        let err = store.get(&key(Segment::Spot)).unwrap_err();
        assert!(matches!(err, Error::BookNotFound(_)));
    }

    #[test]
    fn test_apply_diff_requires_baseline() {
        let store = BookStore::new();
        let diff = PendingDiff::new(1, 1).bid(Decimal::ONE, Decimal::ONE);
        let err = store.apply_diff(&key(Segment::Spot), &diff).unwrap_err();
        assert!(matches!(err, Error::BookNotFound(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_and_header() {
        let store = BookStore::new();
        let mut snapshot = Snapshot::new(key(Segment::LinearFutures), 7)
            .bid(Decimal::from(10), Decimal::ONE)
            .ask(Decimal::from(11), Decimal::ONE)
            .ask(Decimal::from(12), Decimal::TWO);
        snapshot.max_depth = 20;
        store.load_snapshot(&snapshot).unwrap();

        let header = store.get(&key(Segment::LinearFutures)).unwrap();
        assert_eq!(header.last_update_id, 7);
        assert_eq!(header.max_depth, 20);
        assert_eq!((header.bid_levels, header.ask_levels), (1, 2));
        assert!(header.has_levels());

        // The same pair on spot is a different book
        assert!(store.get(&key(Segment::Spot)).is_err());
    }

    #[test]
    fn test_reload_replaces_book() {
        let store = BookStore::new();
        store
            .load_snapshot(&Snapshot::new(key(Segment::Spot), 50).bid(Decimal::TEN, Decimal::ONE))
            .unwrap();
        store
            .load_snapshot(&Snapshot::new(key(Segment::Spot), 40))
            .unwrap();

        let header = store.get(&key(Segment::Spot)).unwrap();
        assert_eq!(header.last_update_id, 40);
        assert!(!header.has_levels());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = BookStore::new();
        store
            .load_snapshot(&Snapshot::new(key(Segment::Spot), 1))
            .unwrap();
        assert!(store.remove(&key(Segment::Spot)).is_some());
        assert!(store.keys().is_empty());
    }
}
