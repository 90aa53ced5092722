//! Export engine: stream one collection into an artifact, batch by batch.

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactMetadata, ArtifactWriter, metadata_path};
use crate::codec;
use crate::error::{BackupError, BackupResult};
use crate::outcome::CollectionResult;
use crate::progress::{CancelFlag, Phase, ProgressEvent, ProgressSink};
use crate::store::{DEFAULT_BATCH_SIZE, DocumentStore, bounded};

/// Export configuration.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Documents per batch fetch.
    pub batch_size: u32,
    /// Deadline for each batch fetch.
    pub operation_timeout: Duration,
    /// Database recorded in artifact metadata.
    pub source_database: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            operation_timeout: Duration::from_secs(30),
            source_database: String::new(),
        }
    }
}

impl ExportOptions {
    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the per-fetch deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the source database name.
    pub fn with_source_database(mut self, database: impl Into<String>) -> Self {
        self.source_database = database.into();
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> BackupResult<()> {
        if self.batch_size == 0 {
            return Err(BackupError::config("batch size must be at least 1"));
        }
        if self.operation_timeout.is_zero() {
            return Err(BackupError::config("operation timeout must be positive"));
        }
        Ok(())
    }
}

/// Export `collection` into `<dest_dir>/<collection>/`.
///
/// Never returns an error: failures are recorded in the result together
/// with the counts reached before the failure. Metadata is written for
/// completed and cancelled exports, not for failed ones.
pub async fn export_collection<S>(
    store: &S,
    collection: &str,
    dest_dir: &Path,
    options: &ExportOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> CollectionResult
where
    S: DocumentStore + ?Sized,
{
    let started = Instant::now();
    let mut result = CollectionResult::new(collection);

    if let Err(e) = export_into(store, collection, dest_dir, options, progress, cancel, &mut result).await {
        let err = BackupError::ExportAborted {
            collection: collection.to_string(),
            written: result.written,
            reason: e.to_string(),
        };
        warn!(collection = %collection, written = result.written, error = %e, "Export failed");
        result.fail(&err);
    }

    result.finish(started.elapsed());
    progress.emit(ProgressEvent::new(
        Phase::Complete,
        collection,
        result.written,
        Some(result.written),
    ));
    result
}

async fn export_into<S>(
    store: &S,
    collection: &str,
    dest_dir: &Path,
    options: &ExportOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
    result: &mut CollectionResult,
) -> BackupResult<()>
where
    S: DocumentStore + ?Sized,
{
    options.validate()?;

    let total = match bounded(options.operation_timeout, store.estimated_count(collection)).await {
        Ok(count) => Some(count),
        Err(e) => {
            debug!(collection = %collection, error = %e, "No estimate for export");
            None
        }
    };

    let mut writer = ArtifactWriter::create(dest_dir, collection).await?;
    result.artifact = Some(writer.path().to_path_buf());

    let source_database = if options.source_database.is_empty() {
        store.database_name()
    } else {
        options.source_database.as_str()
    };
    let mut metadata = ArtifactMetadata::new(collection, source_database);

    info!(collection = %collection, estimated = ?total, batch_size = options.batch_size, "Exporting collection");
    progress.emit(ProgressEvent::new(Phase::Export, collection, 0, total));

    let mut cursor = bounded(
        options.operation_timeout,
        store.open_cursor(collection, options.batch_size),
    )
    .await?;

    loop {
        let batch = bounded(options.operation_timeout, cursor.next_batch()).await?;

        let mut records = Vec::with_capacity(batch.len());
        for raw in &batch.documents {
            result.attempted += 1;
            match codec::materialize(raw) {
                Ok(document) => {
                    metadata.schema_hints.observe(&document);
                    records.push(codec::encode(&document));
                }
                Err(e) => {
                    result.skipped += 1;
                    warn!(
                        collection = %collection,
                        position = result.attempted,
                        error = %e,
                        "Skipping document that cannot be encoded"
                    );
                }
            }
        }

        writer.append_batch(&records).await?;
        result.written = writer.records();
        debug!(collection = %collection, batch = records.len(), written = result.written, "Batch committed");
        progress.emit(ProgressEvent::new(Phase::Export, collection, result.written, total));

        if batch.exhausted {
            break;
        }
        if cancel.is_cancelled() {
            info!(collection = %collection, written = result.written, "Export cancelled");
            metadata.complete = false;
            result.cancelled = true;
            break;
        }
    }

    writer.finish().await?;

    metadata.document_count = result.written;
    metadata.skipped_count = result.skipped;
    metadata.exported_at = Utc::now();
    metadata.write(&metadata_path(dest_dir, collection)).await?;

    info!(
        collection = %collection,
        written = result.written,
        skipped = result.skipped,
        "Export finished"
    );
    Ok(())
}
