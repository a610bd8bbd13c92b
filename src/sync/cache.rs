//! Per-instrument update cache.
//!
//! One [`UpdateCache`] exists per tracked book. Its lock serializes every
//! decision about that book: direct application, buffering, and the
//! snapshot install + drain of a resync.

use std::collections::VecDeque;

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::types::PendingDiff;

/// How a diff relates to a replica whose next expected id is `next_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Entirely older than the replica; skip it
    Stale,
    /// Covers the next expected id; apply it
    Apply,
    /// Starts beyond the next expected id; the replica cannot absorb it
    Gap,
}

/// Classify `diff` against the next sequence id a replica expects.
///
/// A diff starting at or before `next_id` is contiguous. Of those, one
/// ending before `next_id` adds nothing and is stale.
///
/// ```rust
/// use depth_sync::sync::{classify, Disposition};
/// use depth_sync::types::PendingDiff;
///
/// assert_eq!(classify(101, &PendingDiff::new(101, 105)), Disposition::Apply);
/// assert_eq!(classify(101, &PendingDiff::new(95, 103)), Disposition::Apply);
/// assert_eq!(classify(101, &PendingDiff::new(100, 100)), Disposition::Stale);
/// assert_eq!(classify(101, &PendingDiff::new(102, 110)), Disposition::Gap);
/// ```
pub fn classify(next_id: u64, diff: &PendingDiff) -> Disposition {
    if diff.first_update_id > next_id {
        Disposition::Gap
    } else if diff.last_update_id < next_id {
        Disposition::Stale
    } else {
        Disposition::Apply
    }
}

/// Buffer and resync flag of one book
#[derive(Debug, Default)]
pub(crate) struct CacheState {
    /// Diffs received while resyncing, in arrival order
    pub(crate) buffer: VecDeque<PendingDiff>,
    /// A resync task owns this book
    pub(crate) resyncing: bool,
}

impl CacheState {
    /// Append `diff`, dropping the oldest buffered diffs beyond `cap`
    pub(crate) fn buffer_diff(&mut self, diff: PendingDiff, cap: usize) {
        while self.buffer.len() >= cap.max(1) {
            if let Some(dropped) = self.buffer.pop_front() {
                warn!(
                    first_update_id = dropped.first_update_id,
                    last_update_id = dropped.last_update_id,
                    cap,
                    "update buffer full, dropping oldest diff"
                );
            }
        }
        self.buffer.push_back(diff);
    }
}

#[derive(Debug, Default)]
pub(crate) struct UpdateCache {
    state: Mutex<CacheState>,
}

impl UpdateCache {
    pub(crate) fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock()
    }

    pub(crate) fn is_resyncing(&self) -> bool {
        self.state.lock().resyncing
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }
}
