//! Configuration for the depth synchronization client.
//!
//! This module provides the [`Config`] struct for endpoint selection, snapshot
//! depth, resync pacing and segment aliasing.

use std::time::Duration;

use rustc_hash::FxHashMap;

use crate::types::{InstrumentKey, Segment};

/// Exchange environment (production or testnet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production environment
    #[default]
    Production,
    /// Testnet (paper trading)
    Testnet,
}

impl Environment {
    /// Base URL of the REST API serving a segment
    pub fn rest_base_url(&self, segment: Segment) -> &'static str {
        match (self, segment) {
            (Environment::Production, Segment::LinearFutures) => "https://fapi.binance.com",
            (Environment::Production, Segment::InverseFutures) => "https://dapi.binance.com",
            (Environment::Production, Segment::Options) => "https://eapi.binance.com",
            (Environment::Production, _) => "https://api.binance.com",
            (Environment::Testnet, Segment::LinearFutures) => "https://testnet.binancefuture.com",
            (Environment::Testnet, Segment::InverseFutures) => "https://testnet.binancefuture.com",
            (Environment::Testnet, Segment::Options) => "https://testnet.binanceops.com",
            (Environment::Testnet, _) => "https://testnet.binance.vision",
        }
    }

    /// Path of the depth snapshot endpoint for a segment
    pub fn depth_path(segment: Segment) -> &'static str {
        match segment {
            Segment::LinearFutures => "/fapi/v1/depth",
            Segment::InverseFutures => "/dapi/v1/depth",
            Segment::Options => "/eapi/v1/depth",
            _ => "/api/v3/depth",
        }
    }

    /// Stream URL for a segment's diff feed
    pub fn websocket_url(&self, segment: Segment) -> &'static str {
        match (self, segment) {
            (Environment::Production, Segment::LinearFutures) => "wss://fstream.binance.com/ws",
            (Environment::Production, Segment::InverseFutures) => "wss://dstream.binance.com/ws",
            (Environment::Production, Segment::Options) => "wss://nbstream.binance.com/eoptions/ws",
            (Environment::Production, _) => "wss://stream.binance.com:9443/ws",
            (Environment::Testnet, Segment::LinearFutures) => "wss://stream.binancefuture.com/ws",
            (Environment::Testnet, Segment::InverseFutures) => "wss://dstream.binancefuture.com/ws",
            (Environment::Testnet, Segment::Options) => "wss://testnet.binanceops.com/ws",
            (Environment::Testnet, _) => "wss://stream.testnet.binance.vision/ws",
        }
    }
}

/// Configuration for the depth synchronization client
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use depth_sync::config::{Config, Environment};
/// use depth_sync::types::Segment;
///
/// let config = Config::new()
///     .with_environment(Environment::Testnet)
///     .with_default_depth(500)
///     .with_segment_depth(Segment::LinearFutures, 1000)
///     .enable_segment(Segment::Margin)
///     .with_resync_delay(Duration::from_millis(500));
///
/// assert_eq!(config.default_depth(), 500);
/// assert!(config.is_segment_enabled(Segment::Margin));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Exchange environment
    environment: Environment,

    /// HTTP request timeout
    timeout: Duration,

    /// Grace delay between gap detection and snapshot fetch
    resync_delay: Duration,

    /// Snapshot depth limit used when no segment override exists
    default_depth: u32,

    /// Per-segment snapshot depth limits
    segment_depth: FxHashMap<Segment, u32>,

    /// Segments receiving updates (alias segments only get fan-out when enabled)
    enabled_segments: Vec<Segment>,

    /// Upper bound on snapshot fetches in flight at once
    max_concurrent_resyncs: usize,

    /// Diff stream update speed
    update_interval: Duration,

    /// Per-book cap on diffs buffered during a resync (oldest dropped first)
    max_buffered_updates: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Create a configuration with production endpoints and default pacing
    pub fn new() -> Self {
        Self {
            environment: Environment::default(),
            timeout: Duration::from_secs(10),
            resync_delay: Duration::from_secs(1),
            default_depth: 1000,
            segment_depth: FxHashMap::default(),
            enabled_segments: vec![Segment::Spot],
            max_concurrent_resyncs: 8,
            update_interval: Duration::from_millis(100),
            max_buffered_updates: 10_000,
        }
    }

    /// Set the exchange environment
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the HTTP request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the grace delay applied before each snapshot fetch
    #[must_use]
    pub fn with_resync_delay(mut self, delay: Duration) -> Self {
        self.resync_delay = delay;
        self
    }

    /// Set the default snapshot depth limit
    #[must_use]
    pub fn with_default_depth(mut self, depth: u32) -> Self {
        self.default_depth = depth;
        self
    }

    /// Override the snapshot depth limit for one segment
    #[must_use]
    pub fn with_segment_depth(mut self, segment: Segment, depth: u32) -> Self {
        self.segment_depth.insert(segment, depth);
        self
    }

    /// Enable a segment, making it eligible for alias fan-out
    #[must_use]
    pub fn enable_segment(mut self, segment: Segment) -> Self {
        if !self.enabled_segments.contains(&segment) {
            self.enabled_segments.push(segment);
        }
        self
    }

    /// Set the maximum number of concurrent snapshot fetches (at least 1)
    #[must_use]
    pub fn with_max_concurrent_resyncs(mut self, max: usize) -> Self {
        self.max_concurrent_resyncs = max.max(1);
        self
    }

    /// Set the diff stream update speed
    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Set the per-book cap on buffered diffs (at least 1)
    #[must_use]
    pub fn with_max_buffered_updates(mut self, max: usize) -> Self {
        self.max_buffered_updates = max.max(1);
        self
    }

    /// Get the environment
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Get the timeout duration
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the resync grace delay
    pub fn resync_delay(&self) -> Duration {
        self.resync_delay
    }

    /// Get the default snapshot depth limit
    pub fn default_depth(&self) -> u32 {
        self.default_depth
    }

    /// Snapshot depth limit for a book
    pub fn depth_for(&self, key: &InstrumentKey) -> u32 {
        self.segment_depth
            .get(&key.segment())
            .copied()
            .unwrap_or(self.default_depth)
    }

    /// Segments enabled for this client
    pub fn enabled_segments(&self) -> &[Segment] {
        &self.enabled_segments
    }

    /// Whether a segment is enabled
    pub fn is_segment_enabled(&self, segment: Segment) -> bool {
        self.enabled_segments.contains(&segment)
    }

    /// Get the maximum number of concurrent snapshot fetches
    pub fn max_concurrent_resyncs(&self) -> usize {
        self.max_concurrent_resyncs
    }

    /// Get the diff stream update speed
    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Get the per-book cap on buffered diffs
    pub fn max_buffered_updates(&self) -> usize {
        self.max_buffered_updates
    }
}
