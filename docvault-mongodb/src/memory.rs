//! In-process [`DocumentStore`] with unique `_id` enforcement and fault
//! injection, used for dry runs and throughout the test suite.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, RawDocumentBuf};
use parking_lot::Mutex;

use crate::codec;
use crate::error::{BackupError, BackupResult, ConnectionErrorKind};
use crate::store::{
    Batch, DEFAULT_OPERATION_TIMEOUT, DocumentCursor, DocumentStore, InsertOutcome,
    RejectedDocument,
};

/// Duplicate key error code, as reported by the server.
pub const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<RawDocumentBuf>,
    ids: HashSet<String>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Fail the fetch that follows this many served batches.
    fail_fetch_after: BTreeMap<String, usize>,
    /// Fail the insert that follows this many accepted batches.
    fail_insert_after: BTreeMap<String, usize>,
    /// Drop the connection once the next insert has accepted this many documents.
    interrupt_insert_at: BTreeMap<String, u64>,
    /// Every operation fails as if the server went away.
    offline: bool,
    /// Listing and counting never answer.
    stall_metadata: bool,
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, MemoryCollection>,
    faults: Faults,
    fetches: BTreeMap<String, usize>,
    inserts: BTreeMap<String, usize>,
}

/// A document store held entirely in memory.
///
/// Clones share the same state, mirroring how clones of
/// [`MongoClient`](crate::client::MongoClient) share one server.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    database: String,
    operation_timeout: Duration,
    state: Arc<Mutex<State>>,
}

/// Canonical key for a document's `_id`.
fn id_key(id: &Bson) -> String {
    id.clone().into_canonical_extjson().to_string()
}

impl MemoryStore {
    /// Create an empty store for `database`.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Set the deadline reported by [`DocumentStore::operation_timeout`].
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Append documents to a collection without key checks, creating it if needed.
    pub fn seed(&self, collection: &str, documents: impl IntoIterator<Item = Document>) {
        let mut state = self.state.lock();
        let coll = state.collections.entry(collection.to_string()).or_default();
        for doc in documents {
            if let Some(id) = doc.get("_id") {
                coll.ids.insert(id_key(id));
            }
            if let Ok(raw) = RawDocumentBuf::from_document(&doc) {
                coll.documents.push(raw);
            }
        }
    }

    /// Append a raw document as-is; it may be invalid beyond its framing.
    pub fn seed_raw(&self, collection: &str, raw: RawDocumentBuf) {
        let mut state = self.state.lock();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .push(raw);
    }

    /// Create an empty collection.
    pub fn create_collection(&self, collection: &str) {
        self.state
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default();
    }

    /// Documents currently stored in a collection, in insertion order.
    ///
    /// Raw documents that cannot be materialised are left out.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(|c| {
                c.documents
                    .iter()
                    .filter_map(|raw| codec::materialize(raw).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .collections
            .get(collection)
            .map_or(0, |c| c.documents.len())
    }

    /// Check if a collection exists.
    pub fn has_collection(&self, collection: &str) -> bool {
        self.state.lock().collections.contains_key(collection)
    }

    /// Batch fetches served for a collection so far (failed fetches included).
    pub fn fetch_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .fetches
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    /// Make the fetch following `batches` successful fetches fail.
    pub fn fail_fetch_after(&self, collection: &str, batches: usize) {
        self.state
            .lock()
            .faults
            .fail_fetch_after
            .insert(collection.to_string(), batches);
    }

    /// Make the insert following `batches` successful inserts fail.
    pub fn fail_insert_after(&self, collection: &str, batches: usize) {
        self.state
            .lock()
            .faults
            .fail_insert_after
            .insert(collection.to_string(), batches);
    }

    /// Lose the connection partway through the next insert into `collection`,
    /// after `documents` of its documents were accepted.
    pub fn interrupt_insert_after(&self, collection: &str, documents: u64) {
        self.state
            .lock()
            .faults
            .interrupt_insert_at
            .insert(collection.to_string(), documents);
    }

    /// Make listing and counting hang, as a server that accepts but never replies.
    pub fn stall_metadata(&self, stalled: bool) {
        self.state.lock().faults.stall_metadata = stalled;
    }

    async fn maybe_stall(&self) {
        let stalled = self.state.lock().faults.stall_metadata;
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    /// Simulate losing (or regaining) the whole server.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().faults.offline = offline;
    }

    fn lost(&self, target: &str) -> BackupError {
        BackupError::connection(
            ConnectionErrorKind::Unreachable,
            format!("{}.{}", self.database, target),
            "connection closed by peer",
        )
    }

    fn check_online(&self, target: &str) -> BackupResult<()> {
        if self.state.lock().faults.offline {
            Err(self.lost(target))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn source_label(&self) -> String {
        "memory".to_string()
    }

    fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    async fn ping(&self) -> BackupResult<()> {
        self.check_online("admin")
    }

    async fn collection_names(&self) -> BackupResult<Vec<String>> {
        self.maybe_stall().await;
        if self.state.lock().faults.offline {
            return Err(BackupError::enumeration("server unreachable"));
        }
        Ok(self.state.lock().collections.keys().cloned().collect())
    }

    async fn estimated_count(&self, collection: &str) -> BackupResult<u64> {
        self.maybe_stall().await;
        self.check_online(collection)?;
        Ok(self.count(collection) as u64)
    }

    async fn open_cursor(
        &self,
        collection: &str,
        batch_size: u32,
    ) -> BackupResult<Box<dyn DocumentCursor>> {
        self.check_online(collection)?;
        Ok(Box::new(MemoryCursor {
            store: self.clone(),
            collection: collection.to_string(),
            position: 0,
            batch_size: batch_size.max(1) as usize,
        }))
    }

    async fn drop_collection(&self, collection: &str) -> BackupResult<()> {
        self.check_online(collection)?;
        self.state.lock().collections.remove(collection);
        Ok(())
    }

    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> BackupResult<InsertOutcome> {
        self.check_online(collection)?;

        let mut state = self.state.lock();
        let served = state.inserts.get(collection).copied().unwrap_or(0);
        if state.faults.fail_insert_after.get(collection) == Some(&served) {
            return Err(self.lost(collection));
        }
        *state.inserts.entry(collection.to_string()).or_default() += 1;
        let interrupt_at = state.faults.interrupt_insert_at.remove(collection);

        let coll = state.collections.entry(collection.to_string()).or_default();
        let mut outcome = InsertOutcome::default();
        for (index, doc) in documents.into_iter().enumerate() {
            if interrupt_at == Some(outcome.inserted) {
                return Err(BackupError::insert_interrupted(
                    outcome.inserted,
                    self.lost(collection),
                ));
            }
            let key = doc.get("_id").map(id_key);
            if let Some(ref key) = key {
                if coll.ids.contains(key) {
                    outcome.rejected.push(RejectedDocument {
                        index,
                        code: DUPLICATE_KEY,
                        message: format!("E11000 duplicate key error: _id {}", key),
                    });
                    continue;
                }
            }
            match RawDocumentBuf::from_document(&doc) {
                Ok(raw) => {
                    if let Some(key) = key {
                        coll.ids.insert(key);
                    }
                    coll.documents.push(raw);
                    outcome.inserted += 1;
                }
                Err(e) => outcome.rejected.push(RejectedDocument {
                    index,
                    code: 2,
                    message: e.to_string(),
                }),
            }
        }
        Ok(outcome)
    }

    async fn rename_collection(&self, from: &str, to: &str) -> BackupResult<()> {
        self.check_online(from)?;
        let mut state = self.state.lock();
        let source = state.collections.remove(from).ok_or_else(|| {
            BackupError::artifact(format!("cannot rename missing collection '{}'", from))
        })?;
        state.collections.insert(to.to_string(), source);
        Ok(())
    }
}

struct MemoryCursor {
    store: MemoryStore,
    collection: String,
    position: usize,
    batch_size: usize,
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn next_batch(&mut self) -> BackupResult<Batch> {
        let mut state = self.store.state.lock();
        let served = state.fetches.get(&self.collection).copied().unwrap_or(0);
        *state.fetches.entry(self.collection.clone()).or_default() += 1;

        if state.faults.offline
            || state.faults.fail_fetch_after.get(&self.collection) == Some(&served)
        {
            drop(state);
            return Err(self.store.lost(&self.collection));
        }

        let all = state
            .collections
            .get(&self.collection)
            .map(|c| c.documents.as_slice())
            .unwrap_or_default();
        let end = (self.position + self.batch_size).min(all.len());
        let documents = all[self.position..end].to_vec();
        self.position = end;

        Ok(Batch {
            exhausted: end >= all.len(),
            documents,
        })
    }
}
