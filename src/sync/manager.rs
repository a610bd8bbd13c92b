//! Update manager: keeps every replica contiguous with the diff stream.
//!
//! Each book is either synced, with diffs applied as they arrive, or
//! resyncing, with diffs buffered while a detached task fetches a snapshot.
//! A diff that cannot follow the replica (no replica yet, or a sequence gap)
//! flips the book into resyncing and spawns that task. The task waits a grace
//! delay so the snapshot endpoint can catch up with the stream, fetches,
//! installs the snapshot and drains the buffer under the book's lock.
//!
//! # Design
//!
//! The key -> cache map sits behind a coarse lock, read for lookups and
//! written only to insert a cache on first sight of a key. Everything else
//! happens under the per-key cache lock, so books never contend with each
//! other and a slow resync on one book never delays updates to another.
//! `apply_update` never awaits.
//!
//! Failures inside a resync are not returned to anyone; they go to the
//! [`FaultSink`]. The book is then left not resyncing, so the next diff
//! re-detects the gap and starts another resync.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::orderbook::alias::fan_out;
use crate::orderbook::ReplicaStore;
use crate::types::{InstrumentKey, PendingDiff, Segment, Snapshot};

use super::cache::{classify, Disposition, UpdateCache};
use super::sink::FaultSink;

/// Source of full order book snapshots.
///
/// The snapshot's `last_update_id` must be comparable with the sequence ids
/// of the diff stream for the same book.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch a snapshot of `key` holding at most `depth_limit` levels per side
    async fn fetch(&self, key: &InstrumentKey, depth_limit: u32) -> Result<Snapshot, Error>;
}

/// What a finished drain did
#[derive(Debug, Default)]
struct DrainStats {
    applied: usize,
    skipped: usize,
}

/// State shared with detached resync tasks
struct Shared {
    store: Arc<dyn ReplicaStore>,
    fetcher: Arc<dyn SnapshotFetcher>,
    sink: FaultSink,
    permits: Arc<Semaphore>,
    resync_delay: Duration,
    enabled_segments: Vec<Segment>,
}

impl Shared {
    /// Apply `diff` to `key` and to every enabled alias of its segment
    fn apply_fan_out(&self, key: &InstrumentKey, diff: &PendingDiff) -> Result<(), Error> {
        for segment in fan_out(key.segment(), &self.enabled_segments) {
            if segment == key.segment() {
                self.store.apply_diff(key, diff)?;
            } else {
                self.store.apply_diff(&key.with_segment(segment), diff)?;
            }
        }
        Ok(())
    }

    /// Install `snapshot` as the baseline of `key` and every enabled alias
    fn install_fan_out(&self, key: &InstrumentKey, snapshot: &Snapshot) -> Result<(), Error> {
        for segment in fan_out(key.segment(), &self.enabled_segments) {
            self.store
                .load_snapshot(&snapshot.for_key(key.with_segment(segment)))?;
        }
        Ok(())
    }

    /// Install the snapshot and drain the buffer, all under the book's lock.
    ///
    /// The buffer is emptied and the resync flag cleared whatever the
    /// outcome. Diffs left behind after a gap are discarded.
    fn complete_resync(
        &self,
        key: &InstrumentKey,
        cache: &UpdateCache,
        snapshot: Snapshot,
    ) -> Result<DrainStats, Error> {
        let mut state = cache.lock();
        let buffered = std::mem::take(&mut state.buffer);
        let outcome = self.install_and_drain(key, &snapshot, buffered);
        state.resyncing = false;
        outcome
    }

    fn install_and_drain(
        &self,
        key: &InstrumentKey,
        snapshot: &Snapshot,
        buffered: VecDeque<PendingDiff>,
    ) -> Result<DrainStats, Error> {
        self.install_fan_out(key, snapshot)?;

        let mut stats = DrainStats::default();
        for diff in buffered {
            let next_id = self.store.get(key)?.last_update_id + 1;
            match classify(next_id, &diff) {
                Disposition::Gap => {
                    return Err(Error::SequenceGap {
                        key: key.clone(),
                        expected: next_id,
                        got: diff.first_update_id,
                    });
                }
                Disposition::Stale => stats.skipped += 1,
                Disposition::Apply => {
                    self.apply_fan_out(key, &diff)?;
                    stats.applied += 1;
                }
            }
        }
        Ok(stats)
    }
}

/// Clears the resync flag if a resync task ends without draining
/// (fetch failure, shutdown, abort or panic). The buffer is kept.
struct ResyncGuard {
    cache: Arc<UpdateCache>,
    armed: bool,
}

impl ResyncGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ResyncGuard {
    fn drop(&mut self) {
        if self.armed {
            self.cache.lock().resyncing = false;
        }
    }
}

async fn resync(
    shared: Arc<Shared>,
    key: InstrumentKey,
    cache: Arc<UpdateCache>,
    depth_limit: u32,
) {
    let guard = ResyncGuard {
        cache: Arc::clone(&cache),
        armed: true,
    };

    if !shared.resync_delay.is_zero() {
        tokio::time::sleep(shared.resync_delay).await;
    }

    let Ok(permit) = Arc::clone(&shared.permits).acquire_owned().await else {
        debug!(key = %key, "update manager shut down, abandoning resync");
        return;
    };

    info!(key = %key, depth_limit, "fetching order book snapshot");
    let fetched = shared.fetcher.fetch(&key, depth_limit).await;
    drop(permit);

    let snapshot = match fetched {
        Ok(snapshot) => snapshot,
        Err(error) => {
            shared.sink.report(key, error);
            return;
        }
    };

    let snapshot_id = snapshot.last_update_id;
    let outcome = shared.complete_resync(&key, &cache, snapshot);
    guard.disarm();

    match outcome {
        Ok(stats) => info!(
            key = %key,
            snapshot_id,
            applied = stats.applied,
            skipped = stats.skipped,
            "order book resynced"
        ),
        Err(error) => shared.sink.report(key, error),
    }
}

/// Routes diffs into per-book update caches and runs resyncs.
///
/// Construct one per client and share it (it is `Send + Sync`); it must be
/// created inside a Tokio runtime, which resync tasks are spawned onto.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use depth_sync::client::RestClient;
/// use depth_sync::orderbook::BookStore;
/// use depth_sync::sync::{FaultSink, UpdateManager};
/// use depth_sync::types::{InstrumentKey, PendingDiff, Segment};
/// use depth_sync::Config;
///
/// # async fn example() -> depth_sync::Result<()> {
/// let config = Config::new();
/// let store = Arc::new(BookStore::new());
/// let fetcher = Arc::new(RestClient::new(&config)?);
/// let (sink, mut faults) = FaultSink::channel();
/// let manager = UpdateManager::new(&config, store.clone(), fetcher, sink)?;
///
/// let key = InstrumentKey::new("BTC", "USDT", Segment::Spot);
/// // First diff for a key: buffered, snapshot fetched in the background
/// manager.apply_update(&key, PendingDiff::new(157, 160), config.depth_for(&key))?;
/// assert!(manager.is_resyncing(&key));
/// # Ok(())
/// # }
/// ```
pub struct UpdateManager {
    caches: RwLock<FxHashMap<InstrumentKey, Arc<UpdateCache>>>,
    shared: Arc<Shared>,
    max_buffered: usize,
    tasks: Mutex<JoinSet<()>>,
    runtime: Handle,
    closed: AtomicBool,
}

impl std::fmt::Debug for UpdateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateManager")
            .field("tracked", &self.caches.read().len())
            .field("resync_delay", &self.shared.resync_delay)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl UpdateManager {
    /// Create a manager writing into `store` and resyncing through `fetcher`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] when called outside a Tokio runtime.
    pub fn new(
        config: &Config,
        store: Arc<dyn ReplicaStore>,
        fetcher: Arc<dyn SnapshotFetcher>,
        sink: FaultSink,
    ) -> Result<Self, Error> {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        Ok(Self {
            caches: RwLock::new(FxHashMap::default()),
            shared: Arc::new(Shared {
                store,
                fetcher,
                sink,
                permits: Arc::new(Semaphore::new(config.max_concurrent_resyncs())),
                resync_delay: config.resync_delay(),
                enabled_segments: config.enabled_segments().to_vec(),
            }),
            max_buffered: config.max_buffered_updates(),
            tasks: Mutex::new(JoinSet::new()),
            runtime,
            closed: AtomicBool::new(false),
        })
    }

    /// Feed one diff for `key` into the replica.
    ///
    /// Applies the diff immediately when it follows the replica, skips it
    /// when it is entirely stale, and otherwise buffers it and launches a
    /// resync fetching `depth_limit` levels. While a resync is in flight
    /// every diff is buffered in arrival order, up to the configured cap;
    /// beyond it the oldest buffered diff is dropped. Never waits on the
    /// network.
    ///
    /// # Errors
    ///
    /// Errors from applying a contiguous diff to the store (for example
    /// [`Error::EmptyUpdate`]), or [`Error::Runtime`] if a resync was needed
    /// after [`shutdown`](Self::shutdown). Such a diff is not buffered.
    pub fn apply_update(
        &self,
        key: &InstrumentKey,
        diff: PendingDiff,
        depth_limit: u32,
    ) -> Result<(), Error> {
        let cache = self.cache(key);
        let mut state = cache.lock();

        if state.resyncing {
            debug!(
                key = %key,
                first_update_id = diff.first_update_id,
                last_update_id = diff.last_update_id,
                "buffering update during resync"
            );
            state.buffer_diff(diff, self.max_buffered);
            return Ok(());
        }

        let next_id = match self.shared.store.get(key) {
            Ok(header) => Some(header.last_update_id + 1),
            Err(Error::BookNotFound(_)) => None,
            Err(e) => return Err(e),
        };

        match next_id.map(|next| (next, classify(next, &diff))) {
            Some((_, Disposition::Apply)) => self.shared.apply_fan_out(key, &diff),
            Some((next, Disposition::Stale)) => {
                debug!(
                    key = %key,
                    last_update_id = diff.last_update_id,
                    expected = next,
                    "skipping stale update"
                );
                Ok(())
            }
            Some((_, Disposition::Gap)) | None => {
                if self.closed.load(Ordering::SeqCst) {
                    return Err(Error::Runtime("update manager is shut down".to_string()));
                }
                debug!(
                    key = %key,
                    expected = ?next_id,
                    got = diff.first_update_id,
                    "update does not follow replica, resyncing"
                );
                state.resyncing = true;
                state.buffer_diff(diff, self.max_buffered);
                drop(state);

                if let Err(e) = self.spawn_resync(key.clone(), Arc::clone(&cache), depth_limit) {
                    cache.lock().resyncing = false;
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    /// Whether a resync is in flight for `key`
    pub fn is_resyncing(&self, key: &InstrumentKey) -> bool {
        self.existing(key).is_some_and(|cache| cache.is_resyncing())
    }

    /// Number of diffs buffered for `key`
    pub fn buffered_len(&self, key: &InstrumentKey) -> usize {
        self.existing(key).map_or(0, |cache| cache.buffered_len())
    }

    /// Keys that have seen at least one diff
    pub fn tracked_keys(&self) -> Vec<InstrumentKey> {
        self.caches.read().keys().cloned().collect()
    }

    /// Wait until every resync task spawned so far, and any spawned while
    /// waiting, has finished.
    pub async fn quiesce(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "resync task panicked");
                    }
                }
            }
        }
    }

    /// Stop accepting new resyncs and wait for in-flight ones.
    ///
    /// Tasks still in their grace delay give up without fetching; their
    /// books are left not resyncing.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.permits.close();
        self.quiesce().await;
        info!("update manager shut down");
    }

    fn cache(&self, key: &InstrumentKey) -> Arc<UpdateCache> {
        if let Some(cache) = self.existing(key) {
            return cache;
        }
        let mut caches = self.caches.write();
        Arc::clone(caches.entry(key.clone()).or_default())
    }

    fn existing(&self, key: &InstrumentKey) -> Option<Arc<UpdateCache>> {
        self.caches.read().get(key).cloned()
    }

    fn spawn_resync(
        &self,
        key: InstrumentKey,
        cache: Arc<UpdateCache>,
        depth_limit: u32,
    ) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Runtime("update manager is shut down".to_string()));
        }

        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(
            resync(Arc::clone(&self.shared), key, cache, depth_limit),
            &self.runtime,
        );
        Ok(())
    }
}
