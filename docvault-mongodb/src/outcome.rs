//! Per-collection results and the overall run status.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BackupError;

/// Error text recorded for collections a run never started.
pub const NOT_ATTEMPTED: &str = "not attempted";

/// Outcome of exporting or importing one collection.
///
/// For exports `written` counts records written and `skipped` documents
/// that could not be encoded. For imports `written` counts inserted
/// documents, `skipped` records that could not be decoded and `rejected`
/// documents the destination refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionResult {
    /// Collection name.
    pub name: String,
    /// Documents (or records) the engine looked at.
    pub attempted: u64,
    /// Documents committed.
    pub written: u64,
    /// Documents left out by the codec.
    pub skipped: u64,
    /// Documents refused by the destination.
    pub rejected: u64,
    /// The collection did not complete.
    pub failed: bool,
    /// The collection stopped early on request.
    pub cancelled: bool,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Artifact read or written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// Wall-clock time spent.
    pub duration_ms: u64,
}

impl CollectionResult {
    /// Empty result for a collection about to be processed.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attempted: 0,
            written: 0,
            skipped: 0,
            rejected: 0,
            failed: false,
            cancelled: false,
            error: None,
            artifact: None,
            duration_ms: 0,
        }
    }

    /// Result for a collection the run gave up on before starting it.
    pub fn not_attempted(name: impl Into<String>, reason: &str) -> Self {
        let mut result = Self::new(name);
        result.failed = true;
        result.error = Some(format!("{}: {}", NOT_ATTEMPTED, reason));
        result
    }

    /// Result for a collection skipped because the run was cancelled first.
    pub fn cancelled_before_start(name: impl Into<String>) -> Self {
        let mut result = Self::new(name);
        result.cancelled = true;
        result.error = Some(format!("{}: cancelled", NOT_ATTEMPTED));
        result
    }

    /// Mark the collection failed.
    pub fn fail(&mut self, error: &BackupError) {
        self.failed = true;
        self.error = Some(error.to_string());
    }

    /// Record elapsed time.
    pub fn finish(&mut self, elapsed: Duration) {
        self.duration_ms = elapsed.as_millis() as u64;
    }

    /// Check if the collection completed without failure or cancellation.
    pub fn is_complete(&self) -> bool {
        !self.failed && !self.cancelled
    }
}

/// Machine-checkable outcome of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Skeleton state before the run is finalised.
    Running,
    /// Every collection completed.
    Succeeded,
    /// At least one collection failed.
    Partial,
    /// The session was lost or the run was cancelled.
    Aborted,
}

impl RunStatus {
    /// Derive the status from collection results and an optional abort reason.
    pub fn from_results<'a>(
        results: impl IntoIterator<Item = &'a CollectionResult>,
        abort_reason: Option<&str>,
    ) -> Self {
        if abort_reason.is_some() {
            return Self::Aborted;
        }
        if results.into_iter().any(|r| r.failed) {
            Self::Partial
        } else {
            Self::Succeeded
        }
    }

    /// Process exit code: 0 succeeded, 2 partial, 1 otherwise.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Succeeded => 0,
            Self::Partial => 2,
            Self::Running | Self::Aborted => 1,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
