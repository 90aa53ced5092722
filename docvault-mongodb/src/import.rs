//! Import engine: stream an artifact back into a collection.

use std::path::Path;
use std::time::{Duration, Instant};

use bson::Document;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactMetadata, ArtifactReader, METADATA_FILE_NAME};
use crate::codec;
use crate::error::{BackupError, BackupResult};
use crate::outcome::CollectionResult;
use crate::progress::{CancelFlag, Phase, ProgressEvent, ProgressSink};
use crate::store::{DEFAULT_BATCH_SIZE, DocumentStore, bounded};

/// Suffix of the collection a staged swap inserts into.
pub const STAGING_SUFFIX: &str = ".docvault_staging";

/// How an existing destination is replaced when `drop_existing` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
    /// Drop the target, then insert straight into it.
    #[default]
    DropThenInsert,
    /// Insert into a staging collection and rename it over the target.
    StagedSwap,
}

/// Import configuration.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Replace the destination collection. Never implied.
    pub drop_existing: bool,
    /// Documents per insert.
    pub batch_size: u32,
    /// Deadline for each insert.
    pub operation_timeout: Duration,
    /// Replacement policy, used only with `drop_existing`.
    pub replace_strategy: ReplaceStrategy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            drop_existing: false,
            batch_size: DEFAULT_BATCH_SIZE,
            operation_timeout: Duration::from_secs(30),
            replace_strategy: ReplaceStrategy::default(),
        }
    }
}

impl ImportOptions {
    /// Drop (or swap out) the destination before inserting.
    pub fn with_drop_existing(mut self, drop_existing: bool) -> Self {
        self.drop_existing = drop_existing;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the per-insert deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the replacement policy.
    pub fn with_replace_strategy(mut self, strategy: ReplaceStrategy) -> Self {
        self.replace_strategy = strategy;
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

/// Name of the staging collection for `target`.
pub fn staging_name(target: &str) -> String {
    format!("{}{}", target, STAGING_SUFFIX)
}

/// Import the records in `artifact_path` into `target`.
///
/// Never returns an error: failures are recorded in the result with the
/// number of documents inserted before the failure.
pub async fn import_collection<S>(
    store: &S,
    artifact_path: &Path,
    target: &str,
    options: &ImportOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> CollectionResult
where
    S: DocumentStore + ?Sized,
{
    let started = Instant::now();
    let mut result = CollectionResult::new(target);
    result.artifact = Some(artifact_path.to_path_buf());

    let staged = options.drop_existing && options.replace_strategy == ReplaceStrategy::StagedSwap;
    let destination = if staged {
        staging_name(target)
    } else {
        target.to_string()
    };

    let outcome = import_into(
        store,
        artifact_path,
        target,
        &destination,
        options,
        progress,
        cancel,
        &mut result,
    )
    .await;

    match outcome {
        Ok(()) if staged && result.cancelled => {
            // The target is untouched; discard what was staged.
            discard_staging(store, &destination).await;
            result.written = 0;
        }
        Ok(()) if staged && result.written == 0 && result.rejected == 0 => {
            // Nothing reached staging, so there is no collection to swap in.
            match bounded(options.operation_timeout, store.drop_collection(target)).await {
                Ok(()) => debug!(target = %target, "Replaced target with an empty collection"),
                Err(e) => fail(&mut result, target, e),
            }
        }
        Ok(()) if staged => {
            if let Err(e) = store.rename_collection(&destination, target).await {
                fail(&mut result, target, e);
                discard_staging(store, &destination).await;
            } else {
                debug!(staging = %destination, target = %target, "Swapped staging collection in");
            }
        }
        Ok(()) => {}
        Err(e) => {
            fail(&mut result, target, e);
            if staged {
                discard_staging(store, &destination).await;
            }
        }
    }

    result.finish(started.elapsed());
    progress.emit(ProgressEvent::new(
        Phase::Complete,
        target,
        result.written,
        Some(result.written),
    ));
    result
}

fn fail(result: &mut CollectionResult, target: &str, cause: BackupError) {
    let err = match cause {
        e @ BackupError::UnsupportedFormat { .. } => e,
        e => BackupError::RestoreAborted {
            collection: target.to_string(),
            inserted: result.written,
            reason: e.to_string(),
        },
    };
    warn!(collection = %target, inserted = result.written, error = %err, "Restore failed");
    result.fail(&err);
}

async fn discard_staging<S>(store: &S, staging: &str)
where
    S: DocumentStore + ?Sized,
{
    if let Err(e) = store.drop_collection(staging).await {
        warn!(staging = %staging, error = %e, "Could not drop staging collection");
    }
}

#[allow(clippy::too_many_arguments)]
async fn import_into<S>(
    store: &S,
    artifact_path: &Path,
    target: &str,
    destination: &str,
    options: &ImportOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
    result: &mut CollectionResult,
) -> BackupResult<()>
where
    S: DocumentStore + ?Sized,
{
    options.validate()?;

    let metadata = read_sibling_metadata(artifact_path).await?;
    if let Some(meta) = &metadata {
        meta.ensure_supported()?;
        if !meta.complete {
            warn!(
                collection = %target,
                documents = meta.document_count,
                "Artifact is from an export that stopped early; restoring a partial collection"
            );
        }
    }
    let total = metadata.as_ref().map(|m| m.document_count);

    let mut reader = ArtifactReader::open(artifact_path).await?;

    if options.drop_existing {
        progress.emit(ProgressEvent::new(Phase::Drop, target, 0, total));
        bounded(options.operation_timeout, store.drop_collection(destination)).await?;
        debug!(collection = %destination, "Dropped destination");
    }

    info!(
        collection = %target,
        artifact = %artifact_path.display(),
        expected = ?total,
        "Importing collection"
    );
    progress.emit(ProgressEvent::new(Phase::Import, target, 0, total));

    let batch_size = options.batch_size as usize;
    let mut batch: Vec<Document> = Vec::with_capacity(batch_size);

    while let Some(record) = reader.next_record().await? {
        result.attempted += 1;
        match record
            .text()
            .and_then(|text| codec::decode_line(text, record.line))
        {
            Ok(document) => batch.push(document),
            Err(e) => {
                result.skipped += 1;
                warn!(collection = %target, line = record.line, error = %e, "Skipping malformed record");
            }
        }

        if batch.len() >= batch_size {
            insert_batch(store, destination, &mut batch, options, result).await?;
            progress.emit(ProgressEvent::new(Phase::Import, target, result.written, total));
            if cancel.is_cancelled() {
                info!(collection = %target, inserted = result.written, "Restore cancelled");
                result.cancelled = true;
                return Ok(());
            }
        }
    }

    if !batch.is_empty() {
        insert_batch(store, destination, &mut batch, options, result).await?;
        progress.emit(ProgressEvent::new(Phase::Import, target, result.written, total));
    }

    info!(
        collection = %target,
        inserted = result.written,
        skipped = result.skipped,
        rejected = result.rejected,
        "Import finished"
    );
    Ok(())
}

async fn insert_batch<S>(
    store: &S,
    destination: &str,
    batch: &mut Vec<Document>,
    options: &ImportOptions,
    result: &mut CollectionResult,
) -> BackupResult<()>
where
    S: DocumentStore + ?Sized,
{
    let documents = std::mem::take(batch);
    let submitted = documents.len();
    let outcome = match bounded(
        options.operation_timeout,
        store.insert_unordered(destination, documents),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(BackupError::InsertInterrupted { inserted, source }) => {
            result.written += inserted;
            return Err(*source);
        }
        Err(e) => return Err(e),
    };

    for rejected in &outcome.rejected {
        let err = BackupError::InsertRejected {
            index: rejected.index,
            code: rejected.code,
            message: rejected.message.clone(),
        };
        warn!(collection = %destination, error = %err, "Document rejected");
    }

    result.written += outcome.inserted;
    result.rejected += outcome.rejected.len() as u64;
    debug!(
        collection = %destination,
        submitted,
        inserted = outcome.inserted,
        rejected = outcome.rejected.len(),
        "Batch inserted"
    );
    Ok(())
}

async fn read_sibling_metadata(artifact_path: &Path) -> BackupResult<Option<ArtifactMetadata>> {
    let Some(dir) = artifact_path.parent() else {
        return Ok(None);
    };
    let path = dir.join(METADATA_FILE_NAME);
    if !tokio::fs::try_exists(&path).await? {
        debug!(artifact = %artifact_path.display(), "No metadata, assuming legacy artifact");
        return Ok(None);
    }
    ArtifactMetadata::read(&path).await.map(Some)
}
