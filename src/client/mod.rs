//! Exchange connectivity.
//!
//! This module contains:
//!
//! - [`rest`] - HTTP client fetching depth snapshots
//! - [`websocket`] - WebSocket client for the diff stream
//! - [`subscription`] - Channel subscriptions, the transport seam and the registry
//! - [`feed`] - Routing of stream messages into the update manager

pub mod feed;
pub mod rest;
pub mod subscription;
pub mod websocket;

pub use feed::FeedHandler;
pub use rest::RestClient;
pub use subscription::{Subscription, SubscriptionRegistry};
pub use websocket::{StreamClient, StreamWriter};
