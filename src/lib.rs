//! # depth-sync
//!
//! A Rust client keeping local order book replicas in sync with an
//! exchange's incremental depth stream.
//!
//! ## Features
//!
//! - **Diff Stream Sync** - Contiguous diffs are applied as they arrive, stale ones skipped
//! - **Snapshot Resync** - Gaps are buffered across a background REST snapshot fetch
//! - **Feed Resubscription** - Stale depth subscriptions are swapped once per book
//! - **Segment Aliases** - Spot updates fan out to enabled margin books
//! - **Async/Await** - Built on Tokio; applying a diff never waits on the network
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use depth_sync::types::{InstrumentKey, Segment};
//! use depth_sync::{Config, SyncClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), depth_sync::Error> {
//!     let (client, mut faults) = SyncClient::new(Config::new())?;
//!     let key = InstrumentKey::new("BTC", "USDT", Segment::Spot);
//!
//!     let mut stream = client.connect(Segment::Spot).await?;
//!     let feed = client.feed(Segment::Spot);
//!     feed.track(&key)?;
//!     client.subscribe_depth(&*stream.writer(), &key).await?;
//!
//!     tokio::spawn(async move {
//!         while let Some(fault) = faults.recv().await {
//!             eprintln!("{}: {}", fault.key, fault.error);
//!         }
//!     });
//!
//!     feed.run(&mut stream).await
//! }
//! ```
//!
//! ## Sequencing
//!
//! Every diff carries the range `[first_update_id, last_update_id]` of
//! exchange sequence numbers it covers. Against a replica at id `n` a diff
//! is applied when its range contains `n + 1`, skipped when it ends at or
//! before `n`, and treated as a gap when it starts after `n + 1`.
//!
//! ## Architecture
//!
//! This crate is organized into several modules:
//!
//! - [`client`] - REST and WebSocket clients, subscriptions and feed routing
//! - [`sync`] - Update manager, resync tasks and resubscription coordinator
//! - [`orderbook`] - Order book replicas and the store holding them
//! - [`types`] - Instruments, diffs, snapshots and wire messages
//! - [`config`] - Configuration
//! - [`error`] - Error types for the crate
//!
//! ## Performance
//!
//! - Exact `Decimal` prices as `BTreeMap` keys for sorted levels
//! - `FxHashMap` for faster hashing of small keys
//! - `parking_lot` mutexes (faster than std)
//! - One lock per book, so books never contend with each other

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod orderbook;
pub mod sync;
pub mod types;

use std::sync::Arc;

// Re-export main types at crate root for convenience
pub use config::Config;
pub use error::Error;

use client::subscription::{Subscription, SubscriptionRegistry, SubscriptionStore, Transport};
use client::{FeedHandler, RestClient, StreamClient};
use orderbook::BookStore;
use sync::{FaultReceiver, FaultSink, ResubscriptionCoordinator, SnapshotFetcher, UpdateManager};
use types::{InstrumentKey, Segment};

/// Result type alias using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// The depth synchronization client
///
/// Owns one replica store, one update manager, one resubscription
/// coordinator and one subscription registry. Create as many clients as
/// needed; nothing is global.
///
/// # Example
///
/// ```rust,no_run
/// use depth_sync::types::{InstrumentKey, Segment};
/// use depth_sync::{Config, SyncClient};
///
/// # async fn example() -> depth_sync::Result<()> {
/// let (client, _faults) = SyncClient::new(Config::new())?;
/// let key = InstrumentKey::new("ETH", "USDT", Segment::Spot);
///
/// if let Some(book) = client.books().orderbook(&key) {
///     println!("best bid {:?}, best ask {:?}", book.best_bid(), book.best_ask());
/// }
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SyncClient {
    config: Config,
    books: Arc<BookStore>,
    updates: Arc<UpdateManager>,
    resubscriptions: Arc<ResubscriptionCoordinator>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl SyncClient {
    /// Create a client fetching snapshots over REST
    ///
    /// Background resync failures arrive on the returned receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized or no Tokio
    /// runtime is running.
    pub fn new(config: Config) -> Result<(Self, FaultReceiver)> {
        let fetcher = Arc::new(RestClient::new(&config)?);
        Self::with_fetcher(config, fetcher)
    }

    /// Create a client fetching snapshots through `fetcher`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] when called outside a Tokio runtime.
    pub fn with_fetcher(
        config: Config,
        fetcher: Arc<dyn SnapshotFetcher>,
    ) -> Result<(Self, FaultReceiver)> {
        let (sink, faults) = FaultSink::channel();
        let books = Arc::new(BookStore::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let updates = Arc::new(UpdateManager::new(&config, books.clone(), fetcher, sink)?);
        let resubscriptions = Arc::new(ResubscriptionCoordinator::new(
            books.clone(),
            subscriptions.clone(),
        ));

        Ok((
            Self {
                config,
                books,
                updates,
                resubscriptions,
                subscriptions,
            },
            faults,
        ))
    }

    /// Replica store
    pub fn books(&self) -> &Arc<BookStore> {
        &self.books
    }

    /// Update manager
    pub fn updates(&self) -> &Arc<UpdateManager> {
        &self.updates
    }

    /// Resubscription coordinator
    pub fn resubscriptions(&self) -> &Arc<ResubscriptionCoordinator> {
        &self.resubscriptions
    }

    /// Active subscriptions
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a stream connection for `segment`
    pub async fn connect(&self, segment: Segment) -> Result<StreamClient> {
        StreamClient::connect(self.config.environment().websocket_url(segment)).await
    }

    /// Feed handler routing `segment`'s stream into this client
    pub fn feed(&self, segment: Segment) -> FeedHandler {
        FeedHandler::new(
            segment,
            self.config.clone(),
            self.updates.clone(),
            self.resubscriptions.clone(),
        )
    }

    /// Subscribe `conn` to the depth stream of `key`
    pub async fn subscribe_depth(
        &self,
        conn: &(dyn Transport + 'static),
        key: &InstrumentKey,
    ) -> Result<()> {
        let subscription = Subscription::depth(key.clone(), self.config.update_interval())
            .with_levels(self.config.depth_for(key));
        self.subscriptions.add(conn, subscription).await
    }

    /// Replace the depth subscription of `key` on `conn`
    ///
    /// See [`ResubscriptionCoordinator::resubscribe`].
    pub async fn resubscribe(
        &self,
        key: &InstrumentKey,
        conn: &(dyn Transport + 'static),
    ) -> Result<()> {
        self.resubscriptions.resubscribe(key, conn).await
    }

    /// Stop starting resyncs and wait for those in flight
    pub async fn shutdown(&self) {
        self.updates.shutdown().await;
    }
}
