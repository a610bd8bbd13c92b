//! Fault reporting for background resyncs.
//!
//! Resync tasks run detached from the caller that triggered them, so their
//! failures are pushed onto an unbounded channel instead of being returned.
//! Reporting never blocks and needs no acknowledgement.

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::Error;
use crate::types::InstrumentKey;

/// A failure observed while keeping one book in sync
#[derive(Debug)]
pub struct SyncFault {
    /// Book the failure belongs to
    pub key: InstrumentKey,
    /// What went wrong
    pub error: Error,
}

/// Receiving half of the fault channel
pub type FaultReceiver = mpsc::UnboundedReceiver<SyncFault>;

/// Fire-and-forget fault reporter.
///
/// Every report is logged; if a receiver is attached it is forwarded too.
/// A dropped receiver silently turns the sink into log-only.
#[derive(Debug, Clone, Default)]
pub struct FaultSink {
    tx: Option<mpsc::UnboundedSender<SyncFault>>,
}

impl FaultSink {
    /// Create a sink and the receiver its reports are delivered to
    pub fn channel() -> (Self, FaultReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that only logs
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    /// Report a fault for `key`
    pub fn report(&self, key: InstrumentKey, error: Error) {
        warn!(key = %key, error = %error, "order book sync fault");
        if let Some(tx) = &self.tx {
            let _ = tx.send(SyncFault { key, error });
        }
    }
}
