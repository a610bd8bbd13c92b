//! Routes depth stream messages into the update manager.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Error;
use crate::sync::{ResubscriptionCoordinator, UpdateManager};
use crate::types::messages::DepthUpdateEvent;
use crate::types::{InstrumentKey, Segment, StreamMessage};

use super::subscription::{SubscriptionRegistry, SubscriptionStore};
use super::websocket::StreamClient;

/// Handler for one segment's diff stream.
///
/// Stream events only carry the exchange symbol, so books must be
/// [`track`](Self::track)ed before their diffs are routed. Events for
/// untracked symbols are ignored.
pub struct FeedHandler<S: SubscriptionStore = SubscriptionRegistry> {
    segment: Segment,
    config: Config,
    updates: Arc<UpdateManager>,
    resubscriptions: Arc<ResubscriptionCoordinator<S>>,
    symbols: RwLock<FxHashMap<String, InstrumentKey>>,
}

impl<S: SubscriptionStore> std::fmt::Debug for FeedHandler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedHandler")
            .field("segment", &self.segment)
            .field("tracked", &self.symbols.read().len())
            .finish()
    }
}

impl<S: SubscriptionStore> FeedHandler<S> {
    /// Create a handler for `segment`
    pub fn new(
        segment: Segment,
        config: Config,
        updates: Arc<UpdateManager>,
        resubscriptions: Arc<ResubscriptionCoordinator<S>>,
    ) -> Self {
        Self {
            segment,
            config,
            updates,
            resubscriptions,
            symbols: RwLock::new(FxHashMap::default()),
        }
    }

    /// Segment this handler serves
    pub fn segment(&self) -> Segment {
        self.segment
    }

    /// Route diffs for `key` from now on
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `key` belongs to another segment.
    pub fn track(&self, key: &InstrumentKey) -> Result<(), Error> {
        if key.segment() != self.segment {
            return Err(Error::Config(format!(
                "{} cannot be tracked on the {} feed",
                key, self.segment
            )));
        }
        self.symbols.write().insert(key.symbol(), key.clone());
        Ok(())
    }

    /// Stop routing diffs for `key`
    pub fn untrack(&self, key: &InstrumentKey) {
        self.symbols.write().remove(&key.symbol());
    }

    /// Book a stream symbol maps to, if tracked
    pub fn resolve(&self, symbol: &str) -> Option<InstrumentKey> {
        self.symbols.read().get(symbol).cloned()
    }

    /// Handle one stream message.
    ///
    /// Depth updates for tracked books go to
    /// [`UpdateManager::apply_update`]; the first one seen for a book with a
    /// resubscription outstanding completes that resubscription.
    ///
    /// # Returns
    ///
    /// The key the message was routed to, or `None` if it was not a depth
    /// update for a tracked book.
    pub fn handle(&self, msg: StreamMessage) -> Result<Option<InstrumentKey>, Error> {
        let Some(event) = into_depth_update(msg) else {
            return Ok(None);
        };
        let Some(key) = self.resolve(&event.symbol) else {
            debug!(symbol = %event.symbol, "depth update for untracked symbol");
            return Ok(None);
        };

        let diff = event.into_diff(self.allows_empty());
        self.updates
            .apply_update(&key, diff, self.config.depth_for(&key))?;

        if self.resubscriptions.is_resubscribing(&key) {
            self.resubscriptions.completed_resubscribe(&key);
        }
        Ok(Some(key))
    }

    /// Drive `stream` until it closes.
    ///
    /// Errors handling a single message are logged and skipped. Transport
    /// errors end the loop.
    pub async fn run(&self, stream: &mut StreamClient) -> Result<(), Error> {
        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(Error::Json(e)) => {
                    warn!(segment = %self.segment, error = %e, "undecodable stream message");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Err(e) = self.handle(msg) {
                warn!(segment = %self.segment, error = %e, "failed to apply depth update");
            }
        }
        Ok(())
    }

    // Futures streams push updates with no level changes
    fn allows_empty(&self) -> bool {
        matches!(
            self.segment,
            Segment::LinearFutures | Segment::InverseFutures
        )
    }
}

fn into_depth_update(msg: StreamMessage) -> Option<DepthUpdateEvent> {
    match msg {
        StreamMessage::DepthUpdate(event) => Some(event),
        StreamMessage::Combined(combined) => into_depth_update(*combined.data),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::{BookStore, ReplicaStore};
    use crate::sync::{FaultSink, SnapshotFetcher};
    use crate::types::Snapshot;
    use async_trait::async_trait;

    struct NoFetch;

    #[async_trait]
    impl SnapshotFetcher for NoFetch {
        async fn fetch(&self, _key: &InstrumentKey, _depth_limit: u32) -> Result<Snapshot, Error> {
            Err(Error::Timeout)
        }
    }

    fn key(segment: Segment) -> InstrumentKey {
        InstrumentKey::new("BTC", "USDT", segment)
    }

    fn handler(segment: Segment, store: &Arc<BookStore>) -> FeedHandler {
        let config = Config::new();
        let updates = Arc::new(
            UpdateManager::new(&config, store.clone(), Arc::new(NoFetch), FaultSink::log_only())
                .unwrap(),
        );
        let resubscriptions = Arc::new(ResubscriptionCoordinator::new(
            store.clone(),
            Arc::new(SubscriptionRegistry::new()),
        ));
        FeedHandler::new(segment, config, updates, resubscriptions)
    }

    fn depth_update(symbol: &str, first: u64, last: u64, bids: &str) -> StreamMessage {
        serde_json::from_str(&format!(
            r#"{{"e":"depthUpdate","E":1700000000000,"s":"{symbol}","U":{first},"u":{last},"b":{bids},"a":[]}}"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_routes_tracked_symbol() {
        let store = Arc::new(BookStore::new());
        store.load_snapshot(&Snapshot::new(key(Segment::Spot), 10)).unwrap();
        let feed = handler(Segment::Spot, &store);
        feed.track(&key(Segment::Spot)).unwrap();

        let routed = feed
            .handle(depth_update("BTCUSDT", 11, 12, r#"[["100.5","2"]]"#))
            .unwrap();
        assert_eq!(routed, Some(key(Segment::Spot)));
        assert_eq!(store.get(&key(Segment::Spot)).unwrap().last_update_id, 12);

        let ignored = feed
            .handle(depth_update("ETHUSDT", 1, 2, r#"[["1","1"]]"#))
            .unwrap();
        assert_eq!(ignored, None);
    }

    #[tokio::test]
    async fn test_track_rejects_other_segment() {
        let store = Arc::new(BookStore::new());
        let feed = handler(Segment::Spot, &store);
        let err = feed.track(&key(Segment::LinearFutures)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_futures_feed_accepts_empty_updates() {
        let store = Arc::new(BookStore::new());
        let futures = key(Segment::LinearFutures);
        store.load_snapshot(&Snapshot::new(futures.clone(), 10)).unwrap();
        let feed = handler(Segment::LinearFutures, &store);
        feed.track(&futures).unwrap();

        feed.handle(depth_update("BTCUSDT", 11, 11, "[]")).unwrap();
        assert_eq!(store.get(&futures).unwrap().last_update_id, 11);
    }

    #[tokio::test]
    async fn test_spot_feed_rejects_empty_updates() {
        let store = Arc::new(BookStore::new());
        store.load_snapshot(&Snapshot::new(key(Segment::Spot), 10)).unwrap();
        let feed = handler(Segment::Spot, &store);
        feed.track(&key(Segment::Spot)).unwrap();

        let err = feed.handle(depth_update("BTCUSDT", 11, 11, "[]")).unwrap_err();
        assert!(matches!(err, Error::EmptyUpdate(_)));
    }
}
