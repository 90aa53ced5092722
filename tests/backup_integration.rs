//! Integration tests for backup runs.
//!
//! These drive `run_backup` against the in-memory store and inspect the
//! run directory it leaves behind.

use docvault::backup::artifact::{ArtifactMetadata, metadata_path, records_path};
use docvault::backup::codec;
use docvault::backup::manifest::MANIFEST_FILE_NAME;
use docvault::backup::{Document, NoProgress, doc};
use docvault::{BackupPlan, CancelFlag, Manifest, MemoryStore, RunStatus, run_backup};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn numbered(count: i32) -> impl Iterator<Item = Document> {
    (0..count).map(|i| doc! { "_id": i, "n": i * 2 })
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Exporting N documents with batch size B fetches exactly ceil(N/B) batches.
#[tokio::test]
async fn test_fetches_are_bounded_by_batch_size() {
    for (count, batch, expected) in [(2500, 1000, 3), (2000, 1000, 2), (7, 10, 1)] {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new("shop");
        store.seed("items", numbered(count));

        let mut plan = BackupPlan::new("localhost", names(&["items"]), tmp.path());
        plan.export.batch_size = batch;
        let manifest = run_backup(&store, &plan, &NoProgress, &CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(manifest.status, RunStatus::Succeeded);
        assert_eq!(manifest.total_documents, count as u64);
        assert_eq!(store.fetch_count("items"), expected, "N={count} B={batch}");
    }
}

/// The run directory holds one records file and one metadata file per collection.
#[tokio::test]
async fn test_run_directory_layout() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("shop");
    store.seed("users", numbered(5));
    store.seed("orders", numbered(3));

    let plan = BackupPlan::new("db.example.com:27017", names(&["users", "orders"]), tmp.path());
    let manifest = run_backup(&store, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    let run_dir = manifest.run_dir().unwrap().to_path_buf();
    let dir_name = run_dir.file_name().unwrap().to_string_lossy().to_string();
    assert!(dir_name.starts_with("shop_db_example_com_27017_"), "{dir_name}");
    assert!(run_dir.join(MANIFEST_FILE_NAME).is_file());

    for (name, count) in [("users", 5u64), ("orders", 3)] {
        let records = std::fs::read_to_string(records_path(&run_dir, name)).unwrap();
        assert_eq!(records.lines().count() as u64, count);

        let meta = ArtifactMetadata::read(&metadata_path(&run_dir, name)).await.unwrap();
        assert_eq!(meta.collection_name, name);
        assert_eq!(meta.document_count, count);
        assert_eq!(meta.source_database, "shop");
        assert!(meta.complete);
    }
}

/// Every records line decodes back to the document that was stored.
#[tokio::test]
async fn test_records_decode_to_source_documents() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("shop");
    store.seed("users", numbered(4));

    let plan = BackupPlan::new("localhost", names(&["users"]), tmp.path());
    let manifest = run_backup(&store, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    let records =
        std::fs::read_to_string(records_path(manifest.run_dir().unwrap(), "users")).unwrap();
    let decoded: Vec<Document> = records.lines().map(|l| codec::decode(l).unwrap()).collect();
    assert_eq!(decoded, store.documents("users"));
}

/// An empty collection still produces an artifact with a zero count.
#[tokio::test]
async fn test_empty_collection_is_exported() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("shop");
    store.create_collection("audit");

    let plan = BackupPlan::new("localhost", names(&["audit"]), tmp.path());
    let manifest = run_backup(&store, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(manifest.status, RunStatus::Succeeded);
    let entry = manifest.collection("audit").unwrap();
    assert!(!entry.failed);
    assert_eq!(entry.written, 0);

    let run_dir = manifest.run_dir().unwrap();
    assert_eq!(std::fs::read_to_string(records_path(run_dir, "audit")).unwrap(), "");
    let meta = ArtifactMetadata::read(&metadata_path(run_dir, "audit")).await.unwrap();
    assert_eq!(meta.document_count, 0);
}

/// A failed fetch stops that collection only; the others finish and the
/// manifest is finalized with a partial status.
#[tokio::test]
async fn test_fetch_failure_is_contained_to_one_collection() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("shop");
    store.seed("a", numbered(10));
    store.seed("b", numbered(30));
    store.seed("c", numbered(10));
    store.fail_fetch_after("b", 2);

    let mut plan = BackupPlan::new("localhost", names(&["a", "b", "c"]), tmp.path());
    plan.export.batch_size = 5;
    let manifest = run_backup(&store, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(manifest.status, RunStatus::Partial);
    assert_eq!(manifest.abort_reason, None);
    assert_eq!(manifest.failed_collections(), vec!["b"]);

    let b = manifest.collection("b").unwrap();
    assert_eq!(b.written, 10);
    assert!(b.error.is_some());
    assert!(!metadata_path(manifest.run_dir().unwrap(), "b").exists());

    for name in ["a", "c"] {
        let entry = manifest.collection(name).unwrap();
        assert!(!entry.failed, "{name}");
        assert_eq!(entry.written, 10);
    }
    assert_eq!(manifest.total_documents, 30);
}

/// The manifest on disk matches the one returned by the run.
#[tokio::test]
async fn test_manifest_on_disk_matches_result() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("shop");
    store.seed("users", numbered(3));

    let mut plan = BackupPlan::new("localhost", names(&["users"]), tmp.path());
    plan.server_version = Some("7.0.4".to_string());
    let manifest = run_backup(&store, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    let on_disk = Manifest::load(&manifest.run_dir().unwrap().join(MANIFEST_FILE_NAME))
        .await
        .unwrap();
    assert_eq!(on_disk.run_id, manifest.run_id);
    assert_eq!(on_disk.status, RunStatus::Succeeded);
    assert_eq!(on_disk.server_version.as_deref(), Some("7.0.4"));
    assert_eq!(on_disk.source_database, "shop");
    assert_eq!(on_disk.total_documents, 3);
    assert!(on_disk.finished_at.is_some());

    let leftovers: Vec<_> = std::fs::read_dir(manifest.run_dir().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

/// Parallel exports produce the same artifacts as sequential ones.
#[tokio::test]
async fn test_parallel_backup() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("shop");
    let collections = ["a", "b", "c", "d"];
    for name in collections {
        store.seed(name, numbered(25));
    }

    let mut plan = BackupPlan::new("localhost", names(&collections), tmp.path());
    plan.parallelism = 3;
    plan.export.batch_size = 4;
    let manifest = run_backup(&store, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(manifest.status, RunStatus::Succeeded);
    assert_eq!(manifest.collections.len(), 4);
    assert_eq!(manifest.total_documents, 100);
    for name in collections {
        assert_eq!(store.fetch_count(name), 7);
    }
}

/// Cancelling before the run starts aborts it without exporting anything.
#[tokio::test]
async fn test_cancelled_backup_is_aborted() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("shop");
    store.seed("a", numbered(5));
    store.seed("b", numbered(5));

    let cancel = CancelFlag::new();
    cancel.cancel();
    let plan = BackupPlan::new("localhost", names(&["a", "b"]), tmp.path());
    let manifest = run_backup(&store, &plan, &NoProgress, &cancel).await.unwrap();

    assert_eq!(manifest.status, RunStatus::Aborted);
    assert_eq!(manifest.abort_reason.as_deref(), Some("cancelled"));
    assert_eq!(manifest.status.exit_code(), 1);
    for name in ["a", "b"] {
        assert!(manifest.collection(name).unwrap().cancelled);
    }
    assert_eq!(store.fetch_count("a"), 0);
}
