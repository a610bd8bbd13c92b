//! End-to-end tests of the synchronization engine.
//!
//! Everything runs in memory: replicas live in a `BookStore`, snapshots come
//! from a scripted fetcher and subscription commands go to a recording
//! transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;

use depth_sync::client::subscription::{
    ChannelKey, Subscription, SubscriptionRegistry, SubscriptionStore, Transport,
};
use depth_sync::orderbook::{BookHeader, BookStore, ReplicaStore};
use depth_sync::sync::{FaultReceiver, FaultSink, ResubscriptionCoordinator, SnapshotFetcher, UpdateManager};
use depth_sync::types::{InstrumentKey, PendingDiff, Segment, Snapshot};
use depth_sync::{Config, Error, SyncClient};

/// Snapshot source with per-key scripted ids and an optional gate
#[derive(Default)]
struct ScriptedFetcher {
    ids: Mutex<Vec<(InstrumentKey, VecDeque<u64>)>>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn script(self, key: &InstrumentKey, ids: &[u64]) -> Self {
        self.ids
            .lock()
            .push((key.clone(), ids.iter().copied().collect()));
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotFetcher for ScriptedFetcher {
    async fn fetch(&self, key: &InstrumentKey, depth_limit: u32) -> Result<Snapshot, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let id = self
            .ids
            .lock()
            .iter_mut()
            .find(|(k, _)| k == key)
            .and_then(|(_, ids)| ids.pop_front())
            .ok_or(Error::Timeout)?;
        let mut snapshot = Snapshot::new(key.clone(), id)
            .bid(Decimal::from(100), Decimal::from(5))
            .ask(Decimal::from(101), Decimal::from(5));
        snapshot.max_depth = depth_limit;
        Ok(snapshot)
    }
}

/// Replica store counting how often each diff range is applied
#[derive(Default)]
struct CountingStore {
    inner: BookStore,
    applied: Mutex<Vec<(u64, u64)>>,
}

impl CountingStore {
    fn applied(&self) -> Vec<(u64, u64)> {
        self.applied.lock().clone()
    }
}

impl ReplicaStore for CountingStore {
    fn get(&self, key: &InstrumentKey) -> Result<BookHeader, Error> {
        self.inner.get(key)
    }

    fn load_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error> {
        self.inner.load_snapshot(snapshot)
    }

    fn apply_diff(&self, key: &InstrumentKey, diff: &PendingDiff) -> Result<(), Error> {
        self.inner.apply_diff(key, diff)?;
        self.applied
            .lock()
            .push((diff.first_update_id, diff.last_update_id));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn subscribe(&self, streams: &[String]) -> Result<(), Error> {
        self.sent.lock().push(format!("SUBSCRIBE {}", streams.join(",")));
        Ok(())
    }

    async fn unsubscribe(&self, streams: &[String]) -> Result<(), Error> {
        self.sent
            .lock()
            .push(format!("UNSUBSCRIBE {}", streams.join(",")));
        Ok(())
    }
}

fn btc() -> InstrumentKey {
    InstrumentKey::new("BTC", "USDT", Segment::Spot)
}

fn eth() -> InstrumentKey {
    InstrumentKey::new("ETH", "USDT", Segment::Spot)
}

fn diff(first: u64, last: u64) -> PendingDiff {
    PendingDiff::new(first, last).bid(Decimal::from(99), Decimal::from(last as i64))
}

fn config() -> Config {
    Config::new().with_resync_delay(Duration::ZERO)
}

fn engine(
    store: &Arc<CountingStore>,
    fetcher: &Arc<ScriptedFetcher>,
) -> (UpdateManager, FaultReceiver) {
    let (sink, faults) = FaultSink::channel();
    let manager = UpdateManager::new(&config(), store.clone(), fetcher.clone(), sink).unwrap();
    (manager, faults)
}

fn store_at(key: &InstrumentKey, id: u64) -> Arc<CountingStore> {
    let store = Arc::new(CountingStore::default());
    store.load_snapshot(&Snapshot::new(key.clone(), id)).unwrap();
    store
}

#[tokio::test]
async fn contiguous_diff_advances_replica_without_buffering() {
    let store = store_at(&btc(), 100);
    let fetcher = Arc::new(ScriptedFetcher::default());
    let (manager, _faults) = engine(&store, &fetcher);

    manager.apply_update(&btc(), diff(101, 104), 100).unwrap();

    assert_eq!(store.get(&btc()).unwrap().last_update_id, 104);
    assert_eq!(manager.buffered_len(&btc()), 0);
    assert!(!manager.is_resyncing(&btc()));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn straddling_diff_is_applied() {
    let store = store_at(&btc(), 100);
    let fetcher = Arc::new(ScriptedFetcher::default());
    let (manager, _faults) = engine(&store, &fetcher);

    manager.apply_update(&btc(), diff(95, 103), 100).unwrap();

    assert_eq!(store.get(&btc()).unwrap().last_update_id, 103);
    assert_eq!(store.applied(), vec![(95, 103)]);
}

#[tokio::test]
async fn gap_buffers_and_leaves_replica_unchanged() {
    let store = store_at(&btc(), 100);
    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(ScriptedFetcher::gated(gate.clone()).script(&btc(), &[103]));
    let (manager, _faults) = engine(&store, &fetcher);

    manager.apply_update(&btc(), diff(103, 105), 100).unwrap();
    manager.apply_update(&btc(), diff(106, 106), 100).unwrap();

    assert!(manager.is_resyncing(&btc()));
    assert_eq!(manager.buffered_len(&btc()), 2);
    assert_eq!(store.get(&btc()).unwrap().last_update_id, 100);
    assert!(store.applied().is_empty());

    gate.notify_one();
    manager.quiesce().await;

    assert!(!manager.is_resyncing(&btc()));
    assert_eq!(store.get(&btc()).unwrap().last_update_id, 106);
    assert_eq!(store.applied(), vec![(103, 105), (106, 106)]);
}

#[tokio::test]
async fn drain_skips_stale_and_stops_at_gap() {
    let store = store_at(&btc(), 100);
    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(ScriptedFetcher::gated(gate.clone()).script(&btc(), &[110]));
    let (manager, mut faults) = engine(&store, &fetcher);

    // d1 stale against 110, d2 straddles, d3 leaves a hole, d4 is never tried
    manager.apply_update(&btc(), diff(102, 108), 100).unwrap();
    manager.apply_update(&btc(), diff(109, 112), 100).unwrap();
    manager.apply_update(&btc(), diff(115, 116), 100).unwrap();
    manager.apply_update(&btc(), diff(117, 118), 100).unwrap();

    gate.notify_one();
    manager.quiesce().await;

    assert_eq!(store.applied(), vec![(109, 112)]);
    assert_eq!(store.get(&btc()).unwrap().last_update_id, 112);

    let fault = faults.try_recv().unwrap();
    assert_eq!(fault.key, btc());
    assert!(matches!(
        fault.error,
        Error::SequenceGap {
            expected: 113,
            got: 115,
            ..
        }
    ));
    assert!(faults.try_recv().is_err());
    assert_eq!(manager.buffered_len(&btc()), 0);
    assert!(!manager.is_resyncing(&btc()));
}

#[tokio::test]
async fn no_diff_is_applied_twice() {
    let store = Arc::new(CountingStore::default());
    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(ScriptedFetcher::gated(gate.clone()).script(&btc(), &[20]));
    let (manager, _faults) = engine(&store, &fetcher);

    manager.apply_update(&btc(), diff(18, 21), 100).unwrap();
    manager.apply_update(&btc(), diff(22, 23), 100).unwrap();
    gate.notify_one();
    manager.quiesce().await;

    // Redelivery of everything already applied, then fresh data
    manager.apply_update(&btc(), diff(18, 21), 100).unwrap();
    manager.apply_update(&btc(), diff(22, 23), 100).unwrap();
    manager.apply_update(&btc(), diff(24, 24), 100).unwrap();

    assert_eq!(store.applied(), vec![(18, 21), (22, 23), (24, 24)]);
    assert_eq!(store.get(&btc()).unwrap().last_update_id, 24);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn already_applied_diff_is_noop() {
    let store = store_at(&btc(), 100);
    let fetcher = Arc::new(ScriptedFetcher::default());
    let (manager, mut faults) = engine(&store, &fetcher);

    manager.apply_update(&btc(), diff(100, 100), 100).unwrap();

    assert!(store.applied().is_empty());
    assert_eq!(store.get(&btc()).unwrap().last_update_id, 100);
    assert!(!manager.is_resyncing(&btc()));
    assert!(faults.try_recv().is_err());
}

#[tokio::test]
async fn buffered_diff_straddling_snapshot_is_applied() {
    let store = store_at(&btc(), 100);
    let fetcher = Arc::new(ScriptedFetcher::default().script(&btc(), &[108]));
    let (manager, mut faults) = engine(&store, &fetcher);

    manager.apply_update(&btc(), diff(105, 110), 100).unwrap();
    assert!(manager.is_resyncing(&btc()));
    manager.quiesce().await;

    assert_eq!(store.get(&btc()).unwrap().last_update_id, 110);
    assert_eq!(store.applied(), vec![(105, 110)]);
    assert!(faults.try_recv().is_err());
}

#[tokio::test]
async fn resync_on_one_book_does_not_block_another() {
    let store = store_at(&eth(), 500);
    let gate = Arc::new(Notify::new());
    let fetcher = Arc::new(ScriptedFetcher::gated(gate.clone()).script(&btc(), &[10]));
    let (manager, _faults) = engine(&store, &fetcher);
    let manager = Arc::new(manager);

    manager.apply_update(&btc(), diff(9, 11), 100).unwrap();
    assert!(manager.is_resyncing(&btc()));

    let other = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager.apply_update(&btc(), diff(12, 12), 100).unwrap();
            manager.apply_update(&eth(), diff(501, 502), 100).unwrap();
        })
    };
    tokio::time::timeout(Duration::from_secs(1), other)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(store.get(&eth()).unwrap().last_update_id, 502);
    assert!(manager.is_resyncing(&btc()));
    assert_eq!(manager.buffered_len(&btc()), 2);

    gate.notify_one();
    manager.quiesce().await;
    assert_eq!(store.get(&btc()).unwrap().last_update_id, 12);
}

fn resubscription_setup() -> (
    Arc<BookStore>,
    Arc<SubscriptionRegistry>,
    ResubscriptionCoordinator,
) {
    let books = Arc::new(BookStore::new());
    let registry = Arc::new(SubscriptionRegistry::new());
    let coordinator = ResubscriptionCoordinator::new(books.clone(), registry.clone());
    (books, registry, coordinator)
}

#[tokio::test]
async fn resubscribing_flag_follows_lifecycle() {
    let (books, registry, coordinator) = resubscription_setup();
    let transport = RecordingTransport::default();
    books
        .load_snapshot(&Snapshot::new(btc(), 7).ask(Decimal::from(101), Decimal::ONE))
        .unwrap();
    registry
        .add(&transport, Subscription::depth(btc(), Duration::from_millis(100)))
        .await
        .unwrap();

    assert!(!coordinator.is_resubscribing(&btc()));
    coordinator.resubscribe(&btc(), &transport).await.unwrap();
    assert!(coordinator.is_resubscribing(&btc()));
    assert!(!coordinator.is_resubscribing(&eth()));

    // Derived from the replica's level count when no depth is recorded
    let fresh = registry.find(&ChannelKey::depth(btc())).unwrap();
    assert_eq!(fresh.levels, 1);
    assert_eq!(
        transport.sent.lock().last().map(String::as_str),
        Some("SUBSCRIBE btcusdt@depth@100ms")
    );

    coordinator.completed_resubscribe(&btc());
    assert!(!coordinator.is_resubscribing(&btc()));
}

#[tokio::test]
async fn resubscribe_preconditions_leave_key_unmarked() {
    let (books, registry, coordinator) = resubscription_setup();
    let transport = RecordingTransport::default();

    registry
        .add(&transport, Subscription::depth(btc(), Duration::from_millis(100)))
        .await
        .unwrap();
    let err = coordinator.resubscribe(&btc(), &transport).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, Error::BookNotFound(_)));

    books
        .load_snapshot(&Snapshot::new(eth(), 3).bid(Decimal::ONE, Decimal::ONE))
        .unwrap();
    let err = coordinator.resubscribe(&eth(), &transport).await.unwrap_err();
    assert!(matches!(err, Error::SubscriptionNotFound(_)));

    assert!(coordinator.pending().is_empty());
}

#[tokio::test]
async fn client_wires_feed_to_replicas() {
    let fetcher = Arc::new(ScriptedFetcher::default().script(&btc(), &[41]));
    let (client, mut faults) = SyncClient::with_fetcher(config(), fetcher.clone()).unwrap();
    let feed = client.feed(Segment::Spot);
    feed.track(&btc()).unwrap();

    let msg = serde_json::from_str(
        r#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":40,"u":42,"b":[["100","3"]],"a":[]}}"#,
    )
    .unwrap();
    assert_eq!(feed.handle(msg).unwrap(), Some(btc()));
    client.updates().quiesce().await;

    let book = client.books().orderbook(&btc()).unwrap();
    assert_eq!(book.last_update_id(), 42);
    assert_eq!(book.best_bid(), Some((Decimal::from(100), Decimal::from(3))));
    assert!(faults.try_recv().is_err());

    client.shutdown().await;
}
