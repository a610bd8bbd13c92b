//! Feed resubscription coordinator.
//!
//! Replaces a book's depth subscription with a fresh one built from the
//! current replica, and remembers which books have a resubscription
//! outstanding until the caller reports fresh data.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::{info, warn};

use crate::client::subscription::{ChannelKey, SubscriptionRegistry, SubscriptionStore};
use crate::error::Error;
use crate::orderbook::ReplicaStore;
use crate::types::InstrumentKey;

/// Tracks and drives depth feed resubscriptions.
///
/// A key moves to resubscribing only after a successful
/// [`resubscribe`](Self::resubscribe) and back only through
/// [`completed_resubscribe`](Self::completed_resubscribe). The coordinator
/// does not know when the new feed has caught up; the caller does.
pub struct ResubscriptionCoordinator<S: SubscriptionStore = SubscriptionRegistry> {
    books: Arc<dyn ReplicaStore>,
    subscriptions: Arc<S>,
    lookup: Mutex<FxHashSet<InstrumentKey>>,
}

impl<S: SubscriptionStore> std::fmt::Debug for ResubscriptionCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResubscriptionCoordinator")
            .field("pending", &self.lookup.lock().len())
            .finish()
    }
}

impl<S: SubscriptionStore> ResubscriptionCoordinator<S> {
    /// Create a coordinator reading replicas from `books` and swapping
    /// subscriptions in `subscriptions`
    pub fn new(books: Arc<dyn ReplicaStore>, subscriptions: Arc<S>) -> Self {
        Self {
            books,
            subscriptions,
            lookup: Mutex::new(FxHashSet::default()),
        }
    }

    /// Whether a resubscription is outstanding for `key`
    pub fn is_resubscribing(&self, key: &InstrumentKey) -> bool {
        self.lookup.lock().contains(key)
    }

    /// Keys with a resubscription outstanding
    pub fn pending(&self) -> Vec<InstrumentKey> {
        self.lookup.lock().iter().cloned().collect()
    }

    /// Replace the depth subscription of `key` on `conn`.
    ///
    /// The stale subscription is removed and a fresh one, sized from the
    /// replica's depth, added in its place. If the add fails the stale
    /// subscription is restored on a best-effort basis. The key is marked
    /// only when both halves succeed.
    ///
    /// # Errors
    ///
    /// - [`Error::BookNotFound`] if no replica with at least one level exists
    /// - [`Error::SubscriptionNotFound`] if no depth subscription exists
    /// - any error from the subscription store
    pub async fn resubscribe(&self, key: &InstrumentKey, conn: &S::Connection) -> Result<(), Error> {
        let header = self.books.get(key)?;
        if !header.has_levels() {
            return Err(Error::BookNotFound(key.clone()));
        }

        let channel = ChannelKey::depth(key.clone());
        let stale = self
            .subscriptions
            .find(&channel)
            .ok_or_else(|| Error::SubscriptionNotFound(channel.clone()))?;

        let levels = if header.max_depth > 0 {
            header.max_depth
        } else {
            header.bid_levels.max(header.ask_levels) as u32
        };
        let fresh = stale.with_levels(levels);

        self.subscriptions.remove(conn, &stale).await?;
        if let Err(e) = self.subscriptions.add(conn, fresh).await {
            if let Err(restore) = self.subscriptions.add(conn, stale).await {
                warn!(key = %key, error = %restore, "failed to restore depth subscription");
            }
            return Err(e);
        }

        self.lookup.lock().insert(key.clone());
        info!(key = %key, levels, "resubscribed depth feed");
        Ok(())
    }

    /// Clear the resubscribing mark for `key`; a no-op if absent
    pub fn completed_resubscribe(&self, key: &InstrumentKey) {
        if self.lookup.lock().remove(key) {
            info!(key = %key, "depth feed resubscription completed");
        }
    }
}
