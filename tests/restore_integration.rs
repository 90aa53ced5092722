//! Integration tests for restore runs.
//!
//! Each test backs up an in-memory source, then restores the run directory
//! into a second in-memory store.

use std::path::PathBuf;

use docvault::backup::artifact::{ArtifactMetadata, discover_artifacts, metadata_path, records_path};
use docvault::backup::bson::spec::BinarySubtype;
use docvault::backup::bson::{
    Binary, Bson, DateTime, Decimal128, JavaScriptCodeWithScope, Regex, Timestamp, oid::ObjectId,
};
use docvault::backup::import::staging_name;
use docvault::backup::{Document, NoProgress, Phase, ProgressEvent, ReplaceStrategy, doc};
use docvault::{
    BackupError, BackupPlan, CancelFlag, MemoryStore, RestorePlan, RunStatus, run_backup,
    run_restore,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn numbered(count: i32) -> impl Iterator<Item = Document> {
    (0..count).map(|i| doc! { "_id": i, "n": i })
}

/// Back up `collections` from `source` and return the run directory.
async fn backup(source: &MemoryStore, collections: &[&str], root: &TempDir) -> PathBuf {
    let plan = BackupPlan::new(
        "localhost:27017",
        collections.iter().map(|s| s.to_string()).collect(),
        root.path(),
    );
    let manifest = run_backup(source, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();
    manifest.run_dir().unwrap().to_path_buf()
}

fn every_type() -> Document {
    doc! {
        "_id": ObjectId::parse_str("65a1f0c2e4b0a1b2c3d4e5f6").unwrap(),
        "created": DateTime::from_millis(1_700_000_000_123),
        "blob": Binary { subtype: BinarySubtype::Generic, bytes: vec![0, 1, 2, 254, 255] },
        "uuid": Binary { subtype: BinarySubtype::Uuid, bytes: vec![7; 16] },
        "price": Decimal128::from_bytes([
            0x39, 0x30, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x3c, 0x30,
        ]),
        "pattern": Regex { pattern: "^ab+c$".to_string(), options: "im".to_string() },
        "small": 42i32,
        "large": 9_007_199_254_740_993i64,
        "ratio": 0.1f64,
        "flag": true,
        "missing": Bson::Null,
        "ts": Timestamp { time: 1_700_000_000, increment: 7 },
        "code": Bson::JavaScriptCode("function() { return 1; }".to_string()),
        "scoped": JavaScriptCodeWithScope {
            code: "function() { return x; }".to_string(),
            scope: doc! { "x": 1 },
        },
        "symbol": Bson::Symbol("sym".to_string()),
        "min": Bson::MinKey,
        "max": Bson::MaxKey,
        "legacy": Bson::Undefined,
        "nested": {
            "when": DateTime::from_millis(0),
            "tags": ["a", 1i64, { "deep": ObjectId::parse_str("65a1f0c2e4b0a1b2c3d4e5f7").unwrap() }],
        },
    }
}

/// Every supported BSON type comes back with the same type and value.
#[tokio::test]
async fn test_round_trip_preserves_every_type() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("typed", [every_type()]);
    let run_dir = backup(&source, &["typed"], &tmp).await;

    let dest = MemoryStore::new("shop");
    let report = run_restore(&dest, &RestorePlan::new(&run_dir), &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(dest.documents("typed"), vec![every_type()]);
}

/// A collection with zero documents restores as a success.
#[tokio::test]
async fn test_empty_collection_round_trip() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.create_collection("audit");
    let run_dir = backup(&source, &["audit"], &tmp).await;

    let dest = MemoryStore::new("shop");
    let report = run_restore(&dest, &RestorePlan::new(&run_dir), &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.collections[0].written, 0);
    assert_eq!(dest.count("audit"), 0);
}

/// Dropping first leaves exactly the backed-up documents.
#[tokio::test]
async fn test_drop_existing_replaces_unrelated_documents() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(8));
    let run_dir = backup(&source, &["users"], &tmp).await;

    let dest = MemoryStore::new("shop");
    dest.seed("users", (100..130).map(|i| doc! { "_id": i, "stale": true }));

    let mut plan = RestorePlan::new(&run_dir);
    plan.import.drop_existing = true;
    let report = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(dest.count("users"), 8);
    assert_eq!(dest.documents("users"), source.documents("users"));
}

/// Without dropping, documents whose `_id` already exists are rejected and counted.
#[tokio::test]
async fn test_conflicting_ids_are_reported_as_rejected() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(10));
    let run_dir = backup(&source, &["users"], &tmp).await;

    let dest = MemoryStore::new("shop");
    dest.seed("users", numbered(4));

    let report = run_restore(&dest, &RestorePlan::new(&run_dir), &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    let users = &report.collections[0];
    assert_eq!(users.attempted, 10);
    assert_eq!(users.written, 6);
    assert_eq!(users.rejected, 4);
    assert!(!users.failed);
    assert_eq!(report.total_rejected(), 4);
    assert_eq!(dest.count("users"), 10);
}

/// Restoring one collection leaves its siblings in the destination alone.
#[tokio::test]
async fn test_single_collection_restore_leaves_siblings_untouched() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(5));
    source.seed("orders", numbered(5));
    let run_dir = backup(&source, &["users", "orders"], &tmp).await;

    let dest = MemoryStore::new("shop");
    let existing_orders: Vec<Document> = (50..53).map(|i| doc! { "_id": i, "keep": true }).collect();
    dest.seed("orders", existing_orders.clone());

    let mut plan = RestorePlan::new(&run_dir);
    plan.collections = Some(vec!["users".to_string()]);
    plan.import.drop_existing = true;
    let report = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.collections.len(), 1);
    assert_eq!(dest.count("users"), 5);
    assert_eq!(dest.documents("orders"), existing_orders);
}

/// A single collection can be restored under another name.
#[tokio::test]
async fn test_restore_into_target_collection() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(3));
    let run_dir = backup(&source, &["users"], &tmp).await;

    let dest = MemoryStore::new("shop");
    let mut plan = RestorePlan::new(&run_dir);
    plan.collections = Some(vec!["users".to_string()]);
    plan.target_collection = Some("users_copy".to_string());
    let report = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.collections[0].name, "users_copy");
    assert_eq!(dest.count("users_copy"), 3);
    assert!(!dest.has_collection("users"));
}

/// Collection names containing a path separator round-trip through one
/// escaped directory.
#[tokio::test]
async fn test_collection_name_with_slash_round_trip() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("logs/2024", numbered(4));
    let run_dir = backup(&source, &["logs/2024"], &tmp).await;

    assert!(run_dir.join("logs%2F2024").join("logs%2F2024.json").is_file());
    assert!(!run_dir.join("logs").exists());
    let meta = ArtifactMetadata::read(&metadata_path(&run_dir, "logs/2024"))
        .await
        .unwrap();
    assert_eq!(meta.collection_name, "logs/2024");

    let found = discover_artifacts(&run_dir).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "logs/2024");

    let dest = MemoryStore::new("shop");
    let mut plan = RestorePlan::new(&run_dir);
    plan.collections = Some(vec!["logs/2024".to_string()]);
    let report = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(dest.documents("logs/2024"), source.documents("logs/2024"));
}

/// Artifacts of failed exports are skipped by default and refused by name.
#[tokio::test]
async fn test_failed_exports_are_not_restored() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("good", numbered(4));
    source.seed("bad", numbered(40));
    source.fail_fetch_after("bad", 0);
    let run_dir = backup(&source, &["good", "bad"], &tmp).await;

    let found = discover_artifacts(&run_dir).await.unwrap();
    let usable: Vec<(&str, bool)> = found.iter().map(|e| (e.name.as_str(), e.usable)).collect();
    assert_eq!(usable, vec![("bad", false), ("good", true)]);

    let dest = MemoryStore::new("shop");
    let report = run_restore(&dest, &RestorePlan::new(&run_dir), &NoProgress, &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(report.collections.len(), 1);
    assert_eq!(report.collections[0].name, "good");
    assert!(!dest.has_collection("bad"));

    let mut plan = RestorePlan::new(&run_dir);
    plan.collections = Some(vec!["bad".to_string()]);
    let err = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::Artifact(_)), "{err:?}");
}

/// Losing inserts after k batches keeps k*B documents and marks the run partial.
#[tokio::test]
async fn test_insert_failure_mid_restore() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(23));
    source.seed("orders", numbered(6));
    let run_dir = backup(&source, &["users", "orders"], &tmp).await;

    let dest = MemoryStore::new("shop");
    dest.fail_insert_after("users", 3);

    let mut plan = RestorePlan::new(&run_dir);
    plan.import.batch_size = 5;
    let report = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.status.exit_code(), 2);

    let orders = report.collections.iter().find(|c| c.name == "orders").unwrap();
    assert!(orders.is_complete());
    assert_eq!(dest.count("orders"), 6);

    let users = report.collections.iter().find(|c| c.name == "users").unwrap();
    assert!(users.failed);
    assert_eq!(users.written, 15);
    assert_eq!(dest.count("users"), 15);
}

/// A staged swap that fails part-way leaves the previous contents in place.
#[tokio::test]
async fn test_staged_swap_keeps_target_on_failure() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(20));
    let run_dir = backup(&source, &["users"], &tmp).await;

    let dest = MemoryStore::new("shop");
    let previous: Vec<Document> = (0..3).map(|i| doc! { "_id": i, "old": true }).collect();
    dest.seed("users", previous.clone());
    dest.fail_insert_after(&staging_name("users"), 1);

    let mut plan = RestorePlan::new(&run_dir);
    plan.import.drop_existing = true;
    plan.import.replace_strategy = ReplaceStrategy::StagedSwap;
    plan.import.batch_size = 5;
    let report = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(dest.documents("users"), previous);
    assert!(!dest.has_collection(&staging_name("users")));
}

/// A staged swap that completes replaces the target wholesale.
#[tokio::test]
async fn test_staged_swap_replaces_target() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(12));
    let run_dir = backup(&source, &["users"], &tmp).await;

    let dest = MemoryStore::new("shop");
    dest.seed("users", (0..3).map(|i| doc! { "_id": i, "old": true }));

    let mut plan = RestorePlan::new(&run_dir);
    plan.import.drop_existing = true;
    plan.import.replace_strategy = ReplaceStrategy::StagedSwap;
    let report = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(dest.documents("users"), source.documents("users"));
    assert!(!dest.has_collection(&staging_name("users")));
}

/// Malformed lines are skipped and counted; valid lines around them load.
#[tokio::test]
async fn test_malformed_records_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(3));
    let run_dir = backup(&source, &["users"], &tmp).await;

    let path = records_path(&run_dir, "users");
    let mut content = std::fs::read_to_string(&path).unwrap();
    content.push_str("{\"_id\": {\"$oid\": \"not-hex\"}}\n");
    content.push_str("not json at all\n");
    content.push_str("\n");
    std::fs::write(&path, content).unwrap();

    let dest = MemoryStore::new("shop");
    let report = run_restore(&dest, &RestorePlan::new(&run_dir), &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    let users = &report.collections[0];
    assert_eq!(users.attempted, 5);
    assert_eq!(users.written, 3);
    assert_eq!(users.skipped, 2);
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(dest.count("users"), 3);
}

/// Artifacts written by a newer format version are refused before any write.
#[tokio::test]
async fn test_newer_format_is_refused() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(3));
    let run_dir = backup(&source, &["users"], &tmp).await;

    let meta_path = metadata_path(&run_dir, "users");
    let mut meta = ArtifactMetadata::read(&meta_path).await.unwrap();
    meta.format_version += 1;
    meta.write(&meta_path).await.unwrap();

    let dest = MemoryStore::new("shop");
    dest.seed("users", numbered(1));
    let mut plan = RestorePlan::new(&run_dir);
    plan.import.drop_existing = true;
    let report = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap();

    let users = &report.collections[0];
    assert!(users.failed);
    assert!(users.error.as_deref().unwrap().contains("format"));
    assert_eq!(dest.count("users"), 1);
}

/// A cancelled restore writes nothing and reports the run as aborted.
#[tokio::test]
async fn test_cancelled_restore() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("users", numbered(3));
    let run_dir = backup(&source, &["users"], &tmp).await;

    let cancel = CancelFlag::new();
    cancel.cancel();
    let dest = MemoryStore::new("shop");
    let report = run_restore(&dest, &RestorePlan::new(&run_dir), &NoProgress, &cancel)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.abort_reason.as_deref(), Some("cancelled"));
    assert!(report.collections[0].cancelled);
    assert_eq!(dest.count("users"), 0);
}

/// Artifacts of exports that stopped early are not restored as if complete.
#[tokio::test]
async fn test_cancelled_export_is_not_restored() {
    let tmp = TempDir::new().unwrap();
    let source = MemoryStore::new("shop");
    source.seed("events", numbered(20));

    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    let stop_after_first_batch = move |event: ProgressEvent| {
        if event.phase == Phase::Export && event.processed >= 5 {
            trigger.cancel();
        }
    };
    let mut plan = BackupPlan::new("localhost", vec!["events".to_string()], tmp.path());
    plan.export.batch_size = 5;
    let manifest = run_backup(&source, &plan, &stop_after_first_batch, &cancel)
        .await
        .unwrap();
    let run_dir = manifest.run_dir().unwrap().to_path_buf();

    let meta = ArtifactMetadata::read(&metadata_path(&run_dir, "events")).await.unwrap();
    assert!(!meta.complete);
    assert_eq!(meta.document_count, 5);

    let found = discover_artifacts(&run_dir).await.unwrap();
    assert_eq!(found.len(), 1);
    assert!(!found[0].usable);

    let dest = MemoryStore::new("shop");
    let report = run_restore(&dest, &RestorePlan::new(&run_dir), &NoProgress, &CancelFlag::new())
        .await
        .unwrap();
    assert!(report.collections.is_empty());
    assert!(!dest.has_collection("events"));

    let mut plan = RestorePlan::new(&run_dir);
    plan.collections = Some(vec!["events".to_string()]);
    let err = run_restore(&dest, &plan, &NoProgress, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("incomplete"), "{err}");
}
