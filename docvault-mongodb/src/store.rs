//! The storage seam the export and import engines are written against.
//!
//! [`MongoClient`](crate::client::MongoClient) implements these traits for a
//! live server and [`MemoryStore`](crate::memory::MemoryStore) implements
//! them in-process.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Document, RawDocumentBuf};

use crate::error::{BackupError, BackupResult};

/// Documents per batch fetch or insert unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: u32 = 1000;

/// Deadline for a single store operation unless configured otherwise.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Run one store operation under a deadline; an elapsed deadline is a
/// [`BackupError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, operation: F) -> BackupResult<T>
where
    F: Future<Output = BackupResult<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(BackupError::Timeout(limit.as_millis() as u64)),
    }
}

/// One batch pulled from a cursor.
#[derive(Debug, Default)]
pub struct Batch {
    /// Raw documents in natural storage order.
    pub documents: Vec<RawDocumentBuf>,
    /// No further batches will be produced.
    pub exhausted: bool,
}

impl Batch {
    /// Number of documents in the batch.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if the batch holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// A single document the destination refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedDocument {
    /// Position of the document in the submitted batch.
    pub index: usize,
    /// Server error code (11000 for duplicate keys).
    pub code: i32,
    /// Server message.
    pub message: String,
}

/// Outcome of one unordered batch insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Documents the destination accepted.
    pub inserted: u64,
    /// Documents the destination refused individually.
    pub rejected: Vec<RejectedDocument>,
}

/// Forward-only cursor over a collection.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Fetch the next batch. Each call is exactly one batch fetch.
    async fn next_batch(&mut self) -> BackupResult<Batch>;
}

/// Operations the pipeline needs from a document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the database this store is bound to.
    fn database_name(&self) -> &str;

    /// `host:port` (or another label) identifying the server.
    fn source_label(&self) -> String;

    /// Deadline for calls made outside a configured export or import,
    /// such as listing and counting collections.
    fn operation_timeout(&self) -> Duration {
        DEFAULT_OPERATION_TIMEOUT
    }

    /// Lightweight round-trip proving the session is still usable.
    async fn ping(&self) -> BackupResult<()>;

    /// Names of the real collections in the database (no views, no `system.*`).
    async fn collection_names(&self) -> BackupResult<Vec<String>>;

    /// Cheap, metadata-based document count.
    async fn estimated_count(&self, collection: &str) -> BackupResult<u64>;

    /// Open a cursor in natural order that yields batches of `batch_size`.
    async fn open_cursor(
        &self,
        collection: &str,
        batch_size: u32,
    ) -> BackupResult<Box<dyn DocumentCursor>>;

    /// Drop a collection. Dropping a missing collection succeeds.
    async fn drop_collection(&self, collection: &str) -> BackupResult<()>;

    /// Insert with unordered semantics: one refused document does not stop the rest.
    ///
    /// Per-document refusals are reported in the outcome; an `Err` means the
    /// batch as a whole could not be submitted.
    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> BackupResult<InsertOutcome>;

    /// Rename `from` to `to`, replacing `to` if it exists.
    async fn rename_collection(&self, from: &str, to: &str) -> BackupResult<()>;
}
