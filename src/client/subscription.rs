//! Channel subscriptions and the seams they are managed through.
//!
//! - [`Transport`] sends subscribe/unsubscribe commands on a connection
//! - [`SubscriptionStore`] tracks which subscriptions are active
//! - [`SubscriptionRegistry`] is the in-memory store used by the client

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::Error;
use crate::types::InstrumentKey;

/// Channel carrying incremental depth updates
pub const DEPTH_CHANNEL: &str = "depth";

/// Identity of a subscription: channel plus instrument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Channel name
    pub channel: String,
    /// Instrument the channel is scoped to
    pub instrument: InstrumentKey,
}

impl ChannelKey {
    /// Depth channel of an instrument
    pub fn depth(instrument: InstrumentKey) -> Self {
        Self {
            channel: DEPTH_CHANNEL.to_string(),
            instrument,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel, self.instrument)
    }
}

/// An active (or requested) channel subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Channel name
    pub channel: String,
    /// Instrument the channel is scoped to
    pub instrument: InstrumentKey,
    /// Book depth the subscriber maintains.
    ///
    /// Local bookkeeping only: the stream name and subscribe frame carry no
    /// depth, so a change of levels re-issues the same stream.
    pub levels: u32,
    /// Update speed
    pub interval: Duration,
}

impl Subscription {
    /// Depth diff subscription for an instrument
    pub fn depth(instrument: InstrumentKey, interval: Duration) -> Self {
        Self {
            channel: DEPTH_CHANNEL.to_string(),
            instrument,
            levels: 0,
            interval,
        }
    }

    /// Same subscription with a different depth
    #[must_use]
    pub fn with_levels(&self, levels: u32) -> Self {
        Self {
            levels,
            ..self.clone()
        }
    }

    /// Key identifying this subscription
    pub fn key(&self) -> ChannelKey {
        ChannelKey {
            channel: self.channel.clone(),
            instrument: self.instrument.clone(),
        }
    }

    /// Stream name used on the wire, e.g. `btcusdt@depth@100ms`
    pub fn stream_name(&self) -> String {
        format!(
            "{}@{}@{}ms",
            self.instrument.symbol().to_lowercase(),
            self.channel,
            self.interval.as_millis()
        )
    }
}

/// A connection able to carry subscribe/unsubscribe commands
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to the given stream names
    async fn subscribe(&self, streams: &[String]) -> Result<(), Error>;

    /// Unsubscribe from the given stream names
    async fn unsubscribe(&self, streams: &[String]) -> Result<(), Error>;
}

/// Set of active subscriptions
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Connection handle passed through to the transport
    type Connection: ?Sized + Send + Sync;

    /// Subscribe on `conn` and record the subscription
    async fn add(&self, conn: &Self::Connection, subscription: Subscription) -> Result<(), Error>;

    /// Unsubscribe on `conn` and forget the subscription
    async fn remove(&self, conn: &Self::Connection, subscription: &Subscription) -> Result<(), Error>;

    /// Active subscription for a channel, if any
    fn find(&self, key: &ChannelKey) -> Option<Subscription>;
}

/// In-memory subscription store over any [`Transport`]
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: Mutex<FxHashMap<ChannelKey, Subscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// All active subscriptions
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.active.lock().values().cloned().collect()
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    /// Check if no subscription is active
    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }

    /// Forget every subscription without sending anything (connection lost)
    pub fn clear(&self) {
        self.active.lock().clear();
    }
}

#[async_trait]
impl SubscriptionStore for SubscriptionRegistry {
    type Connection = dyn Transport;

    async fn add(&self, conn: &Self::Connection, subscription: Subscription) -> Result<(), Error> {
        let stream = subscription.stream_name();
        conn.subscribe(std::slice::from_ref(&stream)).await?;
        debug!(stream = %stream, "subscribed");
        self.active.lock().insert(subscription.key(), subscription);
        Ok(())
    }

    async fn remove(&self, conn: &Self::Connection, subscription: &Subscription) -> Result<(), Error> {
        let key = subscription.key();
        if !self.active.lock().contains_key(&key) {
            return Err(Error::SubscriptionNotFound(key));
        }
        let stream = subscription.stream_name();
        conn.unsubscribe(std::slice::from_ref(&stream)).await?;
        debug!(stream = %stream, "unsubscribed");
        self.active.lock().remove(&key);
        Ok(())
    }

    fn find(&self, key: &ChannelKey) -> Option<Subscription> {
        self.active.lock().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Segment;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn subscribe(&self, _streams: &[String]) -> Result<(), Error> {
            Ok(())
        }

        async fn unsubscribe(&self, _streams: &[String]) -> Result<(), Error> {
            Ok(())
        }
    }

    fn sub() -> Subscription {
        Subscription::depth(
            InstrumentKey::new("BTC", "USD", Segment::InverseFutures),
            Duration::from_millis(250),
        )
    }

    #[test]
    fn test_stream_name() {
        assert_eq!(sub().stream_name(), "btcusd_perp@depth@250ms");
        assert_eq!(sub().key().to_string(), "depth:BTC-USD/inverse_futures");
    }

    #[test]
    fn test_levels_not_in_stream_name() {
        let deeper = sub().with_levels(1000);
        assert_eq!(deeper.stream_name(), sub().stream_name());
        assert_eq!(deeper.key(), sub().key());
        assert_ne!(deeper, sub());
    }

    #[tokio::test]
    async fn test_add_find_remove() {
        let registry = SubscriptionRegistry::new();
        registry.add(&NullTransport, sub()).await.unwrap();
        assert_eq!(registry.find(&sub().key()), Some(sub()));
        assert_eq!(registry.len(), 1);

        registry.remove(&NullTransport, &sub()).await.unwrap();
        assert!(registry.find(&sub().key()).is_none());

        let err = registry.remove(&NullTransport, &sub()).await.unwrap_err();
        assert!(matches!(err, Error::SubscriptionNotFound(_)));
    }

    #[test]
    fn test_add_replaces_same_channel() {
        let registry = SubscriptionRegistry::new();
        tokio_test::block_on(registry.add(&NullTransport, sub())).unwrap();
        tokio_test::block_on(registry.add(&NullTransport, sub().with_levels(20))).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find(&sub().key()).unwrap().levels, 20);

        registry.clear();
        assert!(registry.is_empty());
    }
}
