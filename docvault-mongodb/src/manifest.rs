//! The per-run backup manifest (`backup_summary.json`).
//!
//! A skeleton is written when the run starts so an interrupted run still
//! leaves a record behind. Workers append collection results through the
//! handle, and [`ManifestHandle::finalize`] rewrites the file exactly once.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec::FORMAT_VERSION;
use crate::error::{BackupError, BackupResult};
use crate::outcome::{CollectionResult, RunStatus};

/// File name of the manifest inside a run directory.
pub const MANIFEST_FILE_NAME: &str = "backup_summary.json";

/// One collection's line in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEntry {
    /// Collection name.
    pub name: String,
    /// Documents read from the source.
    pub attempted: u64,
    /// Records written to the artifact.
    pub written: u64,
    /// Documents that could not be encoded.
    pub skipped: u64,
    /// The export did not complete.
    pub failed: bool,
    /// The export stopped early on request.
    #[serde(default)]
    pub cancelled: bool,
    /// Artifact path relative to the run directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock time spent.
    pub duration_ms: u64,
}

impl CollectionEntry {
    fn from_result(result: &CollectionResult, run_dir: &Path) -> Self {
        let artifact = result.artifact.as_ref().map(|path| {
            path.strip_prefix(run_dir)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/")
        });
        Self {
            name: result.name.clone(),
            attempted: result.attempted,
            written: result.written,
            skipped: result.skipped,
            failed: result.failed,
            cancelled: result.cancelled,
            artifact,
            error: result.error.clone(),
            duration_ms: result.duration_ms,
        }
    }
}

/// Run-level summary of a backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Record format used by the artifacts.
    pub format_version: u32,
    /// Server the backup was taken from.
    pub source_host: String,
    /// Database the backup was taken from.
    pub source_database: String,
    /// Server version, when the server reported it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run was finalised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Run outcome.
    pub status: RunStatus,
    /// Why the run was aborted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Per-collection entries.
    #[serde(default)]
    pub collections: Vec<CollectionEntry>,
    /// Records written across all collections.
    #[serde(default)]
    pub total_documents: u64,
    /// File this manifest was read from or written to.
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl Manifest {
    /// Read a manifest from disk.
    pub async fn load(path: &Path) -> BackupResult<Self> {
        let content = tokio::fs::read(path).await.map_err(|e| {
            BackupError::manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut manifest: Manifest = serde_json::from_slice(&content)
            .map_err(|e| BackupError::manifest(format!("invalid {}: {}", path.display(), e)))?;
        manifest.path = Some(path.to_path_buf());
        Ok(manifest)
    }

    /// Run directory holding this manifest, when known.
    pub fn run_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    /// Look up a collection entry.
    pub fn collection(&self, name: &str) -> Option<&CollectionEntry> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Names of collections that failed.
    pub fn failed_collections(&self) -> Vec<&str> {
        self.collections
            .iter()
            .filter(|c| c.failed)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Check if the run succeeded.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Identity of a run, fixed when the manifest is created.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    /// Server label (`host:port`).
    pub source_host: String,
    /// Source database.
    pub source_database: String,
    /// Server version, if known.
    pub server_version: Option<String>,
}

struct Pending {
    manifest: Manifest,
    results: Vec<CollectionResult>,
}

/// Open manifest of a running backup.
///
/// `record` may be called from concurrent workers. `finalize` consumes the
/// handle, so a manifest can only be finalised once.
pub struct ManifestHandle {
    run_dir: PathBuf,
    path: PathBuf,
    pending: Mutex<Pending>,
}

impl ManifestHandle {
    /// Create the manifest skeleton in `run_dir`.
    pub async fn begin(run_dir: &Path, params: RunParams) -> BackupResult<Self> {
        let manifest = Manifest {
            run_id: Uuid::new_v4(),
            format_version: FORMAT_VERSION,
            source_host: params.source_host,
            source_database: params.source_database,
            server_version: params.server_version,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            abort_reason: None,
            collections: Vec::new(),
            total_documents: 0,
            path: None,
        };

        let path = run_dir.join(MANIFEST_FILE_NAME);
        write_atomic(&path, &manifest).await?;
        debug!(path = %path.display(), run_id = %manifest.run_id, "Manifest skeleton written");

        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            path,
            pending: Mutex::new(Pending {
                manifest,
                results: Vec::new(),
            }),
        })
    }

    /// Manifest file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run directory the manifest lives in.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Identifier of this run.
    pub fn run_id(&self) -> Uuid {
        self.pending.lock().manifest.run_id
    }

    /// Append one collection's result.
    pub fn record(&self, result: CollectionResult) {
        self.pending.lock().results.push(result);
    }

    /// Mark the run aborted. The first reason wins.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut pending = self.pending.lock();
        if pending.manifest.abort_reason.is_none() {
            pending.manifest.abort_reason = Some(reason.into());
        }
    }

    /// The abort reason, if the run was aborted.
    pub fn abort_reason(&self) -> Option<String> {
        self.pending.lock().manifest.abort_reason.clone()
    }

    /// Compute status and totals and write the final manifest.
    pub async fn finalize(self) -> BackupResult<Manifest> {
        let Pending {
            mut manifest,
            results,
        } = self.pending.into_inner();

        manifest.status = RunStatus::from_results(&results, manifest.abort_reason.as_deref());
        manifest.total_documents = results.iter().map(|r| r.written).sum();
        manifest.collections = results
            .iter()
            .map(|r| CollectionEntry::from_result(r, &self.run_dir))
            .collect();
        manifest.finished_at = Some(Utc::now());
        manifest.path = Some(self.path.clone());

        write_atomic(&self.path, &manifest).await?;
        info!(
            run_id = %manifest.run_id,
            status = %manifest.status,
            collections = manifest.collections.len(),
            documents = manifest.total_documents,
            "Manifest finalised"
        );
        Ok(manifest)
    }
}

/// Write JSON to a temporary sibling and rename it into place.
async fn write_atomic(path: &Path, manifest: &Manifest) -> BackupResult<()> {
    let content = serde_json::to_vec_pretty(manifest)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| BackupError::manifest(format!("cannot write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| BackupError::manifest(format!("cannot write {}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn params() -> RunParams {
        RunParams {
            source_host: "localhost:27017".to_string(),
            source_database: "shop".to_string(),
            server_version: Some("7.0.2".to_string()),
        }
    }

    fn done(name: &str, written: u64, run_dir: &Path) -> CollectionResult {
        let mut result = CollectionResult::new(name);
        result.attempted = written;
        result.written = written;
        result.artifact = Some(run_dir.join(name).join(format!("{}.json", name)));
        result
    }

    #[tokio::test]
    async fn test_skeleton_then_finalize() {
        let tmp = TempDir::new().unwrap();
        let handle = ManifestHandle::begin(tmp.path(), params()).await.unwrap();

        let skeleton = Manifest::load(handle.path()).await.unwrap();
        assert_eq!(skeleton.status, RunStatus::Running);
        assert!(skeleton.finished_at.is_none());
        assert!(skeleton.collections.is_empty());

        handle.record(done("users", 10, tmp.path()));
        handle.record(done("orders", 5, tmp.path()));
        let run_id = handle.run_id();
        let manifest = handle.finalize().await.unwrap();

        assert_eq!(manifest.run_id, run_id);
        assert_eq!(manifest.status, RunStatus::Succeeded);
        assert_eq!(manifest.total_documents, 15);
        assert_eq!(
            manifest.collection("users").unwrap().artifact.as_deref(),
            Some("users/users.json")
        );

        let reloaded = Manifest::load(&tmp.path().join(MANIFEST_FILE_NAME))
            .await
            .unwrap();
        assert_eq!(reloaded, manifest);
        assert!(!tmp.path().join("backup_summary.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_collection_makes_run_partial() {
        let tmp = TempDir::new().unwrap();
        let handle = ManifestHandle::begin(tmp.path(), params()).await.unwrap();
        handle.record(done("users", 10, tmp.path()));
        handle.record(CollectionResult::not_attempted("orders", "boom"));

        let manifest = handle.finalize().await.unwrap();
        assert_eq!(manifest.status, RunStatus::Partial);
        assert_eq!(manifest.failed_collections(), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_abort_reason_first_wins() {
        let tmp = TempDir::new().unwrap();
        let handle = ManifestHandle::begin(tmp.path(), params()).await.unwrap();
        handle.abort("cancelled");
        handle.abort("connection lost");

        let manifest = handle.finalize().await.unwrap();
        assert_eq!(manifest.status, RunStatus::Aborted);
        assert_eq!(manifest.abort_reason.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_serialized_field_names() {
        let tmp = TempDir::new().unwrap();
        let handle = ManifestHandle::begin(tmp.path(), params()).await.unwrap();
        handle.record(done("users", 1, tmp.path()));
        handle.finalize().await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(tmp.path().join(MANIFEST_FILE_NAME)).await.unwrap(),
        )
        .unwrap();
        assert_eq!(raw["status"], "succeeded");
        assert_eq!(raw["sourceDatabase"], "shop");
        assert_eq!(raw["formatVersion"], FORMAT_VERSION);
        assert_eq!(raw["collections"][0]["durationMs"], 0);
        assert!(raw.get("abortReason").is_none());
    }
}
