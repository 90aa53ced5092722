//! Collection enumeration and selection.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult};
use crate::store::{DocumentStore, bounded};

/// A collection and its approximate size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Metadata-based document count; `None` when counting failed.
    pub approx_count: Option<u64>,
}

/// List the database's collections with their approximate counts, sorted by name.
///
/// Never scans documents. A collection whose count cannot be read is still
/// listed, with `approx_count: None`.
pub async fn list_collections<S>(store: &S) -> BackupResult<Vec<CollectionInfo>>
where
    S: DocumentStore + ?Sized,
{
    let limit = store.operation_timeout();
    let mut names = bounded(limit, store.collection_names()).await.map_err(|e| match e {
        BackupError::Enumeration(_) => e,
        other => BackupError::enumeration(other.to_string()),
    })?;
    names.sort();

    let mut collections = Vec::with_capacity(names.len());
    for name in names {
        let approx_count = match bounded(limit, store.estimated_count(&name)).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(collection = %name, error = %e, "Could not count collection");
                None
            }
        };
        collections.push(CollectionInfo { name, approx_count });
    }

    debug!(
        database = %store.database_name(),
        count = collections.len(),
        "Enumerated collections"
    );
    Ok(collections)
}

/// Resolve a caller's explicit selection against the enumerated collections.
///
/// `None` selects everything. Names are de-duplicated, keep the caller's
/// order, and must all exist.
pub fn resolve_selection(
    available: &[CollectionInfo],
    requested: Option<&[String]>,
) -> BackupResult<Vec<String>> {
    let Some(requested) = requested else {
        return Ok(available.iter().map(|c| c.name.clone()).collect());
    };

    let mut selected: Vec<String> = Vec::with_capacity(requested.len());
    let mut unknown = Vec::new();
    for name in requested {
        if selected.contains(name) {
            continue;
        }
        if available.iter().any(|c| &c.name == name) {
            selected.push(name.clone());
        } else {
            unknown.push(name.as_str());
        }
    }

    if !unknown.is_empty() {
        return Err(BackupError::enumeration(format!(
            "unknown collection(s): {}",
            unknown.join(", ")
        )));
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn info(name: &str, count: u64) -> CollectionInfo {
        CollectionInfo {
            name: name.to_string(),
            approx_count: Some(count),
        }
    }

    #[tokio::test]
    async fn test_list_collections_sorted_with_counts() {
        let store = MemoryStore::new("shop");
        store.seed("orders", (0..3).map(|i| doc! { "_id": i }));
        store.seed("customers", [doc! { "_id": 1 }]);
        store.create_collection("empty");

        let listed = list_collections(&store).await.unwrap();
        assert_eq!(
            listed,
            vec![info("customers", 1), info("empty", 0), info("orders", 3)]
        );
    }

    #[tokio::test]
    async fn test_list_collections_unreachable() {
        let store = MemoryStore::new("shop");
        store.set_offline(true);
        let err = list_collections(&store).await.unwrap_err();
        assert!(matches!(err, BackupError::Enumeration(_)));
    }

    #[tokio::test]
    async fn test_list_collections_gives_up_on_stalled_server() {
        let store = MemoryStore::new("shop").with_operation_timeout(Duration::from_millis(50));
        store.seed("orders", [doc! { "_id": 1 }]);
        store.stall_metadata(true);

        let err = list_collections(&store).await.unwrap_err();
        assert!(matches!(err, BackupError::Enumeration(_)));
        assert!(err.to_string().contains("timed out"), "{err}");
    }

    #[test]
    fn test_resolve_selection() {
        let available = vec![info("a", 1), info("b", 2), info("c", 3)];

        let all = resolve_selection(&available, None).unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);

        let requested = vec!["c".to_string(), "a".to_string(), "c".to_string()];
        let some = resolve_selection(&available, Some(requested.as_slice())).unwrap();
        assert_eq!(some, vec!["c", "a"]);

        let requested = vec!["a".to_string(), "zzz".to_string()];
        let err = resolve_selection(&available, Some(requested.as_slice())).unwrap_err();
        assert!(err.to_string().contains("zzz"));
    }
}
