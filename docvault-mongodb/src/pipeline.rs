//! Run orchestration: drive the engines over a set of collections, keep
//! the manifest current, and decide when a run has to be abandoned.

use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactEntry, discover_artifacts, run_dir_name};
use crate::error::{BackupError, BackupResult};
use crate::export::{ExportOptions, export_collection};
use crate::import::{ImportOptions, import_collection};
use crate::manifest::{Manifest, ManifestHandle, RunParams};
use crate::outcome::{CollectionResult, RunStatus};
use crate::progress::{CancelFlag, ProgressSink};
use crate::store::DocumentStore;

/// Abort reason recorded when the caller cancels a run.
pub const CANCELLED: &str = "cancelled";

/// What to back up and where.
#[derive(Debug, Clone)]
pub struct BackupPlan {
    /// Server label used in the run directory name and manifest.
    pub source_host: String,
    /// Server version to record, when known.
    pub server_version: Option<String>,
    /// Collections to export, in order.
    pub collections: Vec<String>,
    /// Directory the run directory is created under.
    pub output_root: PathBuf,
    /// Per-collection export settings.
    pub export: ExportOptions,
    /// Collections exported concurrently.
    pub parallelism: usize,
}

impl BackupPlan {
    /// Plan a sequential backup of `collections` into `output_root`.
    pub fn new(
        source_host: impl Into<String>,
        collections: Vec<String>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source_host: source_host.into(),
            server_version: None,
            collections,
            output_root: output_root.into(),
            export: ExportOptions::default(),
            parallelism: 1,
        }
    }
}

/// What to restore and how.
#[derive(Debug, Clone)]
pub struct RestorePlan {
    /// Run directory produced by a backup.
    pub backup_dir: PathBuf,
    /// Collections to restore; `None` restores every usable artifact.
    pub collections: Option<Vec<String>>,
    /// Destination name for a single selected collection.
    pub target_collection: Option<String>,
    /// Per-collection import settings.
    pub import: ImportOptions,
    /// Collections imported concurrently.
    pub parallelism: usize,
}

impl RestorePlan {
    /// Plan a sequential restore of everything in `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            collections: None,
            target_collection: None,
            import: ImportOptions::default(),
            parallelism: 1,
        }
    }
}

/// Outcome of a restore run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    /// Directory restored from.
    pub backup_dir: PathBuf,
    /// Run outcome.
    pub status: RunStatus,
    /// Why the run was aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Per-collection results in selection order.
    pub collections: Vec<CollectionResult>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl RestoreReport {
    /// Documents inserted across all collections.
    pub fn total_inserted(&self) -> u64 {
        self.collections.iter().map(|c| c.written).sum()
    }

    /// Records skipped as malformed across all collections.
    pub fn total_skipped(&self) -> u64 {
        self.collections.iter().map(|c| c.skipped).sum()
    }

    /// Documents the destination refused across all collections.
    pub fn total_rejected(&self) -> u64 {
        self.collections.iter().map(|c| c.rejected).sum()
    }
}

/// Shared abort state of a running run.
#[derive(Default)]
struct RunGuard {
    reason: Mutex<Option<String>>,
}

impl RunGuard {
    fn abort(&self, reason: impl Into<String>) {
        let mut slot = self.reason.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// After a collection failed, tell a bad collection from a lost session.
    async fn check_session<S>(&self, store: &S, collection: &str)
    where
        S: DocumentStore + ?Sized,
    {
        if let Err(e) = store.ping().await {
            error!(collection = %collection, error = %e, "Session lost, aborting run");
            self.abort(format!("connection lost: {}", e));
        }
    }

    /// Result to record instead of starting `collection`, if the run is over.
    fn gate(&self, collection: &str, cancel: &CancelFlag) -> Option<CollectionResult> {
        if let Some(reason) = self.reason() {
            return Some(CollectionResult::not_attempted(collection, &reason));
        }
        if cancel.is_cancelled() {
            self.abort(CANCELLED);
            return Some(CollectionResult::cancelled_before_start(collection));
        }
        None
    }
}

/// Back up the plan's collections into a new run directory.
///
/// Only fails when the run directory or its manifest cannot be created;
/// every other failure is recorded in the returned manifest.
pub async fn run_backup<S>(
    store: &S,
    plan: &BackupPlan,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> BackupResult<Manifest>
where
    S: DocumentStore + ?Sized,
{
    plan.export.validate()?;

    let database = store.database_name().to_string();
    let run_dir = plan
        .output_root
        .join(run_dir_name(&database, &plan.source_host, Local::now()));
    tokio::fs::create_dir_all(&run_dir).await.map_err(|e| {
        BackupError::artifact(format!("cannot create {}: {}", run_dir.display(), e))
    })?;

    let handle = ManifestHandle::begin(
        &run_dir,
        RunParams {
            source_host: plan.source_host.clone(),
            source_database: database.clone(),
            server_version: plan.server_version.clone(),
        },
    )
    .await?;

    let mut export = plan.export.clone();
    if export.source_database.is_empty() {
        export.source_database = database.clone();
    }

    info!(
        run_id = %handle.run_id(),
        run_dir = %run_dir.display(),
        collections = plan.collections.len(),
        parallelism = plan.parallelism.max(1),
        "Backup started"
    );

    let guard = RunGuard::default();
    stream::iter(plan.collections.iter())
        .map(|name| {
            let (handle, guard, export, run_dir) = (&handle, &guard, &export, &run_dir);
            async move {
                if let Some(skipped) = guard.gate(name, cancel) {
                    handle.record(skipped);
                    return;
                }
                let result = export_collection(store, name, run_dir, export, progress, cancel).await;
                let failed = result.failed;
                handle.record(result);
                if failed {
                    guard.check_session(store, name).await;
                }
            }
        })
        .buffer_unordered(plan.parallelism.max(1))
        .collect::<Vec<()>>()
        .await;

    if cancel.is_cancelled() {
        guard.abort(CANCELLED);
    }
    if let Some(reason) = guard.reason() {
        handle.abort(reason);
    }

    let manifest = handle.finalize().await?;
    info!(
        run_id = %manifest.run_id,
        status = %manifest.status,
        documents = manifest.total_documents,
        "Backup finished"
    );
    Ok(manifest)
}

/// Restore the plan's collections from a backup run directory.
///
/// Fails before any write when the selection is invalid; every other
/// failure is recorded in the returned report.
pub async fn run_restore<S>(
    store: &S,
    plan: &RestorePlan,
    progress: &dyn ProgressSink,
    cancel: &CancelFlag,
) -> BackupResult<RestoreReport>
where
    S: DocumentStore + ?Sized,
{
    plan.import.validate()?;
    let started_at = Utc::now();

    let available = discover_artifacts(&plan.backup_dir).await?;
    let selected = select_artifacts(&available, plan.collections.as_deref())?;

    if plan.target_collection.is_some() && selected.len() != 1 {
        return Err(BackupError::config(format!(
            "a target collection needs exactly one selected collection, got {}",
            selected.len()
        )));
    }

    info!(
        backup_dir = %plan.backup_dir.display(),
        collections = selected.len(),
        drop_existing = plan.import.drop_existing,
        "Restore started"
    );

    let guard = RunGuard::default();
    let mut results: Vec<(usize, CollectionResult)> = stream::iter(selected.iter().enumerate())
        .map(|(position, entry)| {
            let guard = &guard;
            let target = plan
                .target_collection
                .clone()
                .unwrap_or_else(|| entry.name.clone());
            async move {
                if let Some(skipped) = guard.gate(&target, cancel) {
                    return (position, skipped);
                }
                let result =
                    import_collection(store, &entry.path, &target, &plan.import, progress, cancel)
                        .await;
                if result.failed {
                    guard.check_session(store, &target).await;
                }
                (position, result)
            }
        })
        .buffer_unordered(plan.parallelism.max(1))
        .collect()
        .await;
    results.sort_by_key(|(position, _)| *position);
    let collections: Vec<CollectionResult> = results.into_iter().map(|(_, r)| r).collect();

    if cancel.is_cancelled() {
        guard.abort(CANCELLED);
    }
    let abort_reason = guard.reason();
    let status = RunStatus::from_results(&collections, abort_reason.as_deref());

    let report = RestoreReport {
        backup_dir: plan.backup_dir.clone(),
        status,
        abort_reason,
        collections,
        started_at,
        finished_at: Utc::now(),
    };
    info!(
        status = %report.status,
        inserted = report.total_inserted(),
        skipped = report.total_skipped(),
        rejected = report.total_rejected(),
        "Restore finished"
    );
    Ok(report)
}

/// Resolve a restore selection against the discovered artifacts.
///
/// `None` selects every usable artifact. Explicit names must exist and be
/// usable.
pub fn select_artifacts<'a>(
    available: &'a [ArtifactEntry],
    requested: Option<&[String]>,
) -> BackupResult<Vec<&'a ArtifactEntry>> {
    let Some(requested) = requested else {
        for entry in available.iter().filter(|e| !e.usable) {
            warn!(collection = %entry.name, "Skipping artifact of a failed or incomplete export");
        }
        return Ok(available.iter().filter(|e| e.usable).collect());
    };

    let mut selected: Vec<&ArtifactEntry> = Vec::with_capacity(requested.len());
    for name in requested {
        if selected.iter().any(|e| &e.name == name) {
            continue;
        }
        let entry = available
            .iter()
            .find(|e| &e.name == name)
            .ok_or_else(|| BackupError::artifact(format!("no artifact for collection '{}'", name)))?;
        if !entry.usable {
            return Err(BackupError::artifact(format!(
                "artifact for '{}' comes from a failed or incomplete export",
                name
            )));
        }
        selected.push(entry);
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::progress::NoProgress;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn entry(name: &str, usable: bool) -> ArtifactEntry {
        ArtifactEntry {
            name: name.to_string(),
            path: PathBuf::from(format!("{}/{}.json", name, name)),
            metadata: None,
            usable,
        }
    }

    #[test]
    fn test_select_artifacts() {
        let available = vec![entry("a", true), entry("b", false), entry("c", true)];

        let all: Vec<_> = select_artifacts(&available, None)
            .unwrap()
            .iter()
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(all, vec!["a", "c"]);

        let requested = vec!["c".to_string()];
        assert_eq!(select_artifacts(&available, Some(requested.as_slice())).unwrap().len(), 1);

        let requested = vec!["b".to_string()];
        assert!(select_artifacts(&available, Some(requested.as_slice())).is_err());

        let requested = vec!["zzz".to_string()];
        assert!(select_artifacts(&available, Some(requested.as_slice())).is_err());
    }

    #[tokio::test]
    async fn test_backup_then_restore_round_trip() {
        let tmp = TempDir::new().unwrap();
        let source = MemoryStore::new("shop");
        source.seed("users", (0..12).map(|i| doc! { "_id": i, "name": format!("u{}", i) }));
        source.seed("orders", (0..3).map(|i| doc! { "_id": i }));

        let mut plan = BackupPlan::new(
            "localhost:27017",
            vec!["users".to_string(), "orders".to_string()],
            tmp.path(),
        );
        plan.export.batch_size = 5;
        let manifest = run_backup(&source, &plan, &NoProgress, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(manifest.status, RunStatus::Succeeded);
        assert_eq!(manifest.total_documents, 15);

        let run_dir = std::fs::read_dir(tmp.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();

        let dest = MemoryStore::new("shop_copy");
        let report = run_restore(&dest, &RestorePlan::new(&run_dir), &NoProgress, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.total_inserted(), 15);
        assert_eq!(dest.documents("users"), source.documents("users"));
    }

    #[tokio::test]
    async fn test_backup_aborts_when_session_is_lost() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new("shop");
        store.seed("a", (0..4).map(|i| doc! { "_id": i }));
        store.seed("b", (0..4).map(|i| doc! { "_id": i }));
        store.seed("c", (0..4).map(|i| doc! { "_id": i }));

        let went_offline = store.clone();
        let sink = move |event: crate::progress::ProgressEvent| {
            if event.collection == "a" && event.processed >= 2 {
                went_offline.set_offline(true);
            }
        };

        let mut plan = BackupPlan::new(
            "localhost",
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            tmp.path(),
        );
        plan.export.batch_size = 2;
        let manifest = run_backup(&store, &plan, &sink, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(manifest.status, RunStatus::Aborted);
        assert!(manifest.abort_reason.as_deref().unwrap().starts_with("connection lost"));
        let a = manifest.collection("a").unwrap();
        assert!(a.failed);
        assert_eq!(a.written, 2);
        for name in ["b", "c"] {
            let entry = manifest.collection(name).unwrap();
            assert!(entry.failed);
            assert!(entry.error.as_deref().unwrap().starts_with("not attempted"));
        }
    }

    #[tokio::test]
    async fn test_restore_target_collection_requires_single_selection() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new("shop");
        let mut plan = RestorePlan::new(tmp.path());
        plan.target_collection = Some("renamed".to_string());

        let err = run_restore(&store, &plan, &NoProgress, &CancelFlag::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }
}
