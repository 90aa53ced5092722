//! MongoDB session handle: connection setup, validation, and the live
//! implementation of [`DocumentStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Document, RawDocumentBuf, doc};
use futures::TryStreamExt;
use mongodb::error::ErrorKind;
use mongodb::options::{FindOptions, InsertManyOptions};
use mongodb::{Client, Cursor, Database};
use tracing::{debug, info, warn};

use crate::config::ConnectionParams;
use crate::error::{BackupError, BackupResult, ConnectionError, ConnectionErrorKind};
use crate::store::{Batch, DocumentCursor, DocumentStore, InsertOutcome, RejectedDocument};

/// Slack added to the connect timeout when bounding the initial ping.
const PING_GRACE: Duration = Duration::from_secs(2);

/// Documents sent per `insertMany` command. A batch is submitted in chunks so
/// that a failure partway through still reports what was accepted.
const INSERT_CHUNK: usize = 250;

/// Split `documents` into consecutive chunks of at most `size` documents.
fn into_chunks(documents: Vec<Document>, size: usize) -> Vec<Vec<Document>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(documents.len().div_ceil(size));
    let mut iter = documents.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(size).collect());
    }
    chunks
}

/// A validated MongoDB session bound to one database.
///
/// The driver pools connections internally, so clones share one transport
/// and may run cursors concurrently. The transport closes when the last
/// clone is dropped.
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    database: Database,
    params: Arc<ConnectionParams>,
    server_version: Option<String>,
}

impl MongoClient {
    /// Connect and validate reachability with a `ping` round-trip.
    ///
    /// Fails with a classified [`ConnectionError`] so callers can tell an
    /// unreachable server from rejected credentials or a timeout.
    pub async fn connect(params: ConnectionParams) -> BackupResult<Self> {
        let target = params.address();
        let options = params.to_client_options().await?;

        let client = Client::with_options(options)
            .map_err(|e| ConnectionError::classify(target.clone(), &e))?;

        // The driver's own server-selection deadline fires first and carries
        // the cause; this bound only catches a server that accepts and stalls.
        let admin = client.database("admin");
        let ping_bound = params.timeouts.connect + PING_GRACE;
        match tokio::time::timeout(ping_bound, admin.run_command(doc! { "ping": 1 }, None)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ConnectionError::classify(target, &e).into()),
            Err(_) => {
                return Err(ConnectionError::new(
                    ConnectionErrorKind::Timeout,
                    target,
                    format!("no ping reply within {}ms", ping_bound.as_millis()),
                )
                .into());
            }
        }

        let server_version = match admin.run_command(doc! { "buildInfo": 1 }, None).await {
            Ok(info) => info.get_str("version").ok().map(str::to_string),
            Err(e) => {
                warn!(error = %e, "buildInfo failed, server version unknown");
                None
            }
        };

        let database = client.database(&params.database);

        info!(
            uri = %params.redacted_uri(),
            database = %params.database,
            server_version = server_version.as_deref().unwrap_or("unknown"),
            "MongoDB session established"
        );

        Ok(Self {
            client,
            database,
            params: Arc::new(params),
            server_version,
        })
    }

    /// Get the underlying database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get the underlying MongoDB client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the connection parameters.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Server version reported by `buildInfo`, if it answered.
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    /// Run a database command.
    pub async fn run_command(&self, command: Document) -> BackupResult<Document> {
        let result = self
            .database
            .run_command(command, None)
            .await
            .map_err(|e| self.classify(&e))?;
        Ok(result)
    }

    fn classify(&self, err: &mongodb::error::Error) -> BackupError {
        ConnectionError::classify(self.params.address(), err).into()
    }
}

#[async_trait]
impl DocumentStore for MongoClient {
    fn database_name(&self) -> &str {
        &self.params.database
    }

    fn source_label(&self) -> String {
        self.params.address()
    }

    fn operation_timeout(&self) -> Duration {
        self.params.timeouts.operation
    }

    async fn ping(&self) -> BackupResult<()> {
        let admin = self.client.database("admin");
        match tokio::time::timeout(self.operation_timeout(), admin.run_command(doc! { "ping": 1 }, None))
            .await
        {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(self.classify(&e)),
            Err(_) => Err(BackupError::Timeout(self.operation_timeout().as_millis() as u64)),
        }
    }

    async fn collection_names(&self) -> BackupResult<Vec<String>> {
        let names = self
            .database
            .list_collection_names(doc! { "type": "collection" })
            .await
            .map_err(|e| BackupError::enumeration(e.to_string()))?;
        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect())
    }

    async fn estimated_count(&self, collection: &str) -> BackupResult<u64> {
        let count = self
            .database
            .collection::<Document>(collection)
            .estimated_document_count(None)
            .await
            .map_err(|e| self.classify(&e))?;
        Ok(count)
    }

    async fn open_cursor(
        &self,
        collection: &str,
        batch_size: u32,
    ) -> BackupResult<Box<dyn DocumentCursor>> {
        debug!(collection = %collection, batch_size, "Opening cursor");
        let options = FindOptions::builder().batch_size(batch_size).build();
        let cursor = self
            .database
            .collection::<RawDocumentBuf>(collection)
            .find(None, options)
            .await
            .map_err(|e| self.classify(&e))?;

        Ok(Box::new(MongoCursor {
            cursor,
            batch_size: batch_size.max(1) as usize,
            lookahead: None,
            target: format!("{}.{}", self.params.database, collection),
        }))
    }

    async fn drop_collection(&self, collection: &str) -> BackupResult<()> {
        debug!(collection = %collection, "Dropping collection");
        self.database
            .collection::<Document>(collection)
            .drop(None)
            .await
            .map_err(|e| self.classify(&e))?;
        Ok(())
    }

    async fn insert_unordered(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> BackupResult<InsertOutcome> {
        let coll = self.database.collection::<Document>(collection);
        let mut outcome = InsertOutcome::default();
        let mut offset = 0;

        for chunk in into_chunks(documents, INSERT_CHUNK) {
            let submitted = chunk.len();
            let options = InsertManyOptions::builder().ordered(false).build();
            match coll.insert_many(chunk, options).await {
                Ok(inserted) => outcome.inserted += inserted.inserted_ids.len() as u64,
                Err(e) => match e.kind.as_ref() {
                    ErrorKind::BulkWrite(failure) if failure.write_concern_error.is_none() => {
                        let before = outcome.rejected.len();
                        outcome.rejected.extend(failure.write_errors.iter().flatten().map(
                            |we| RejectedDocument {
                                index: offset + we.index,
                                code: we.code,
                                message: we.message.clone(),
                            },
                        ));
                        let refused = outcome.rejected.len() - before;
                        outcome.inserted += submitted.saturating_sub(refused) as u64;
                    }
                    _ if outcome.inserted == 0 => return Err(self.classify(&e)),
                    _ => {
                        // Documents of the failed chunk may also have landed;
                        // the count covers completed chunks only.
                        warn!(
                            collection = %collection,
                            inserted = outcome.inserted,
                            error = %e,
                            "Insert interrupted"
                        );
                        return Err(BackupError::insert_interrupted(
                            outcome.inserted,
                            self.classify(&e),
                        ));
                    }
                },
            }
            offset += submitted;
        }
        Ok(outcome)
    }

    async fn rename_collection(&self, from: &str, to: &str) -> BackupResult<()> {
        let db = &self.params.database;
        let command = doc! {
            "renameCollection": format!("{}.{}", db, from),
            "to": format!("{}.{}", db, to),
            "dropTarget": true,
        };
        self.client
            .database("admin")
            .run_command(command, None)
            .await
            .map_err(|e| self.classify(&e))?;
        Ok(())
    }
}

/// Batches a driver cursor, peeking one document ahead so the batch that
/// drains the cursor is already flagged as the last one.
struct MongoCursor {
    cursor: Cursor<RawDocumentBuf>,
    batch_size: usize,
    lookahead: Option<RawDocumentBuf>,
    target: String,
}

impl MongoCursor {
    async fn pull(&mut self) -> BackupResult<Option<RawDocumentBuf>> {
        if let Some(doc) = self.lookahead.take() {
            return Ok(Some(doc));
        }
        self.cursor
            .try_next()
            .await
            .map_err(|e| ConnectionError::classify(self.target.clone(), &e).into())
    }
}

#[async_trait]
impl DocumentCursor for MongoCursor {
    async fn next_batch(&mut self) -> BackupResult<Batch> {
        let mut documents = Vec::with_capacity(self.batch_size);
        while documents.len() < self.batch_size {
            match self.pull().await? {
                Some(doc) => documents.push(doc),
                None => {
                    return Ok(Batch {
                        documents,
                        exhausted: true,
                    });
                }
            }
        }

        self.lookahead = self.pull().await?;
        Ok(Batch {
            exhausted: self.lookahead.is_none(),
            documents,
        })
    }
}
