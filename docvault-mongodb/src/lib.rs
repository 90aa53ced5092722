//! # docvault-mongodb
//!
//! Type-preserving backup and restore of MongoDB collections.
//!
//! This crate provides:
//! - Connection management with the official MongoDB driver
//! - A lossless text codec (canonical Extended JSON, one document per line)
//! - Batched, bounded-memory export and import engines
//! - A per-run manifest recording what was backed up and how it went
//! - Push-style progress events and cooperative cancellation
//!
//! ## Example
//!
//! ```rust,ignore
//! use docvault_mongodb::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let params = ConnectionParams::builder()
//!         .host("localhost")
//!         .database("shop")
//!         .build()?;
//!     let client = MongoClient::connect(params).await?;
//!
//!     let collections = list_collections(&client).await?;
//!     let names = collections.into_iter().map(|c| c.name).collect();
//!
//!     let plan = BackupPlan::new(client.source_label(), names, "./backups");
//!     let manifest = run_backup(&client, &plan, &NoProgress, &CancelFlag::new()).await?;
//!     println!("{}: {} documents", manifest.status, manifest.total_documents);
//!     Ok(())
//! }
//! ```
//!
//! ## Testing without a server
//!
//! [`MemoryStore`] implements the same [`DocumentStore`] seam as
//! [`MongoClient`], with unique `_id` enforcement and fault injection.

pub mod artifact;
pub mod client;
pub mod codec;
pub mod collections;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod manifest;
pub mod memory;
pub mod outcome;
pub mod pipeline;
pub mod progress;
pub mod store;

pub use bson;
pub use bson::{Bson, Document, doc};
pub use client::MongoClient;
pub use collections::{CollectionInfo, list_collections, resolve_selection};
pub use config::{ConnectionParams, ConnectionParamsBuilder, Credentials, Timeouts};
pub use error::{BackupError, BackupResult, ConnectionError, ConnectionErrorKind};
pub use export::{ExportOptions, export_collection};
pub use import::{ImportOptions, ReplaceStrategy, import_collection};
pub use manifest::{Manifest, ManifestHandle, RunParams};
pub use memory::MemoryStore;
pub use outcome::{CollectionResult, RunStatus};
pub use pipeline::{BackupPlan, RestorePlan, RestoreReport, run_backup, run_restore};
pub use progress::{CancelFlag, NoProgress, Phase, ProgressEvent, ProgressSink};
pub use store::{DocumentCursor, DocumentStore};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::artifact::{ArtifactEntry, ArtifactMetadata, discover_artifacts};
    pub use crate::client::MongoClient;
    pub use crate::collections::{CollectionInfo, list_collections, resolve_selection};
    pub use crate::config::{ConnectionParams, Credentials, Timeouts};
    pub use crate::error::{BackupError, BackupResult, ConnectionError, ConnectionErrorKind};
    pub use crate::export::ExportOptions;
    pub use crate::import::{ImportOptions, ReplaceStrategy};
    pub use crate::manifest::Manifest;
    pub use crate::outcome::{CollectionResult, RunStatus};
    pub use crate::pipeline::{BackupPlan, RestorePlan, RestoreReport, run_backup, run_restore};
    pub use crate::progress::{CancelFlag, NoProgress, ProgressEvent, ProgressSink};
    pub use crate::store::DocumentStore;
    pub use bson::{Document, doc};
}
