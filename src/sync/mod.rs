//! Order book synchronization engine.
//!
//! - [`manager`] - routes diffs, buffers across gaps, runs snapshot resyncs
//! - [`resubscribe`] - re-issues stale feed subscriptions, one per book at a time
//! - [`sink`] - where background failures are reported
//!
//! The per-book buffering unit and its sequencing rule live in `cache`;
//! [`classify`] is exported for callers that want the same rule.

mod cache;
pub mod manager;
pub mod resubscribe;
pub mod sink;

pub use cache::{classify, Disposition};
pub use manager::{SnapshotFetcher, UpdateManager};
pub use resubscribe::ResubscriptionCoordinator;
pub use sink::{FaultReceiver, FaultSink, SyncFault};
