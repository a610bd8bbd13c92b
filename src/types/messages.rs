//! Stream and REST wire types.
//!
//! This module contains the command frames sent on the diff stream, the
//! messages received from it, and the REST depth snapshot body.

use serde::{Deserialize, Serialize};

use super::depth::{Level, PendingDiff, Snapshot};
use super::instrument::InstrumentKey;
use super::{now_ms, Price, Quantity, TimestampMs};

/// Command method sent on the stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamMethod {
    /// Subscribe to stream names
    Subscribe,
    /// Unsubscribe from stream names
    Unsubscribe,
}

/// Command frame sent to the stream server
#[derive(Debug, Clone, Serialize)]
pub struct StreamCommand {
    /// Command method
    pub method: StreamMethod,
    /// Stream names the command applies to
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    /// Request id echoed back in the acknowledgement
    pub id: u64,
}

/// Message received from the stream server
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    /// Event wrapped by a combined-stream endpoint
    Combined(CombinedEvent),
    /// Incremental depth update
    DepthUpdate(DepthUpdateEvent),
    /// Command rejected
    CommandError(CommandErrorMsg),
    /// Command acknowledged
    CommandAck(CommandAckMsg),
    /// Anything else (trades, tickers, ...) is passed through untouched
    Other(serde_json::Value),
}

impl StreamMessage {
    /// The depth update carried by this message, unwrapping combined streams
    pub fn depth_update(&self) -> Option<&DepthUpdateEvent> {
        match self {
            StreamMessage::DepthUpdate(event) => Some(event),
            StreamMessage::Combined(combined) => combined.data.depth_update(),
            _ => None,
        }
    }
}

/// Combined-stream envelope
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedEvent {
    /// Stream name the event belongs to
    pub stream: String,
    /// Wrapped event
    pub data: Box<StreamMessage>,
}

/// Incremental depth update event
#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdateEvent {
    /// Event type (`depthUpdate`)
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time
    #[serde(rename = "E")]
    pub event_time: TimestampMs,
    /// Matching engine time (futures only)
    #[serde(rename = "T", default)]
    pub transaction_time: Option<TimestampMs>,
    /// Exchange symbol
    #[serde(rename = "s")]
    pub symbol: String,
    /// First update id in event
    #[serde(rename = "U")]
    pub first_update_id: u64,
    /// Final update id in event
    #[serde(rename = "u")]
    pub last_update_id: u64,
    /// Final update id of the previous event (futures only)
    #[serde(rename = "pu", default)]
    pub previous_update_id: Option<u64>,
    /// Bid changes as `[price, quantity]`
    #[serde(rename = "b")]
    pub bids: Vec<(Price, Quantity)>,
    /// Ask changes as `[price, quantity]`
    #[serde(rename = "a")]
    pub asks: Vec<(Price, Quantity)>,
}

impl DepthUpdateEvent {
    /// Convert into the engine's diff representation
    pub fn into_diff(self, allow_empty: bool) -> PendingDiff {
        PendingDiff {
            first_update_id: self.first_update_id,
            last_update_id: self.last_update_id,
            bids: self.bids.into_iter().map(Level::from).collect(),
            asks: self.asks.into_iter().map(Level::from).collect(),
            push_time: self.transaction_time.unwrap_or(self.event_time),
            allow_empty,
        }
    }
}

/// Command acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct CommandAckMsg {
    /// Result payload (`null` for subscribe/unsubscribe)
    pub result: Option<serde_json::Value>,
    /// Request id
    pub id: u64,
}

/// Command rejection
#[derive(Debug, Clone, Deserialize)]
pub struct CommandErrorMsg {
    /// Error details
    pub error: ErrorDetails,
    /// Request id, if the server could parse it
    pub id: Option<u64>,
}

/// Error details returned by the exchange (REST and stream)
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetails {
    /// Exchange error code
    pub code: i64,
    /// Error message
    pub msg: String,
}

/// REST depth snapshot body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshotResponse {
    /// Sequence id the snapshot is consistent with
    pub last_update_id: u64,
    /// Message output time (futures only)
    #[serde(rename = "E", default)]
    pub event_time: Option<TimestampMs>,
    /// Matching engine time (futures only)
    #[serde(rename = "T", default)]
    pub transaction_time: Option<TimestampMs>,
    /// Bid levels as `[price, quantity]`
    pub bids: Vec<(Price, Quantity)>,
    /// Ask levels as `[price, quantity]`
    pub asks: Vec<(Price, Quantity)>,
}

impl DepthSnapshotResponse {
    /// Convert into a [`Snapshot`] for the given book
    pub fn into_snapshot(self, key: InstrumentKey, max_depth: u32) -> Snapshot {
        Snapshot {
            key,
            last_update_id: self.last_update_id,
            bids: self.bids.into_iter().map(Level::from).collect(),
            asks: self.asks.into_iter().map(Level::from).collect(),
            update_time: self
                .transaction_time
                .or(self.event_time)
                .unwrap_or_else(now_ms),
            max_depth,
        }
    }
}
