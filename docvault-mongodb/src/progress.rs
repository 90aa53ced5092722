//! Push-style progress reporting and cooperative cancellation.
//!
//! Engines call [`ProgressSink::emit`] after every committed batch. Sinks
//! must return immediately: a slow renderer may miss events but never
//! slows the pipeline down.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

/// Pipeline stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Listing collections and counts.
    Enumerate,
    /// Streaming a collection into an artifact.
    Export,
    /// Dropping the destination before a restore.
    Drop,
    /// Inserting documents from an artifact.
    Import,
    /// A collection finished (successfully or not).
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enumerate => "enumerate",
            Self::Export => "export",
            Self::Drop => "drop",
            Self::Import => "import",
            Self::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// One progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Pipeline stage.
    pub phase: Phase,
    /// Collection being processed.
    pub collection: String,
    /// Documents processed so far in this collection.
    pub processed: u64,
    /// Expected total, when known.
    pub total: Option<u64>,
}

impl ProgressEvent {
    /// Create an event.
    pub fn new(phase: Phase, collection: impl Into<String>, processed: u64, total: Option<u64>) -> Self {
        Self {
            phase,
            collection: collection.into(),
            processed,
            total,
        }
    }

    /// Completion ratio in `0.0..=1.0`, when the total is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.processed as f64 / total as f64).min(1.0)),
        }
    }
}

/// Receiver of progress events. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    /// Deliver an event (fire-and-forget).
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Forwards events into a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: mpsc::Sender<ProgressEvent>,
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        // Full or closed channels lose the event.
        let _ = self.sender.try_send(event);
    }
}

/// Create a channel sink and the receiver a renderer drains.
pub fn channel(capacity: usize) -> (ChannelProgress, mpsc::Receiver<ProgressEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ChannelProgress { sender }, receiver)
}

/// Cooperative cancellation shared between the caller and running engines.
///
/// Engines check it after each committed batch and before starting a
/// collection; work already committed stays consistent.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
