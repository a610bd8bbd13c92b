//! Domain and wire types for the depth synchronization engine.
//!
//! - [`instrument`] - Market segments and the [`InstrumentKey`] identifying one book
//! - [`depth`] - Price levels, pending diffs and full snapshots
//! - [`messages`] - Stream and REST wire shapes

pub mod depth;
pub mod instrument;
pub mod messages;

pub use depth::{Level, PendingDiff, Snapshot};
pub use instrument::{InstrumentKey, Segment};
pub use messages::StreamMessage;

/// Price of a level, kept exact as the exchange transmits it.
///
/// Exchanges send prices as decimal strings; parsing them into
/// `Decimal` gives exact comparisons and a total order usable as a
/// `BTreeMap` key.
pub type Price = rust_decimal::Decimal;

/// Resting size at a price level. Zero in a diff removes the level.
pub type Quantity = rust_decimal::Decimal;

/// Timestamp in milliseconds since Unix epoch
pub type TimestampMs = u64;

/// Current wall-clock time in milliseconds since Unix epoch
pub(crate) fn now_ms() -> TimestampMs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as TimestampMs)
        .unwrap_or(0)
}
