//! # docvault
//!
//! Type-preserving backup and restore for MongoDB collections.
//!
//! docvault provides:
//! - Batched, bounded-memory export of collections into text artifacts
//! - A lossless codec: every BSON type survives the round trip
//! - Restores that report malformed records and refused documents instead of failing
//! - A per-run manifest that is the source of truth for what succeeded
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docvault::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), docvault::BackupError> {
//!     let params = ConnectionParams::builder().database("shop").build()?;
//!     let client = MongoClient::connect(params).await?;
//!
//!     let names = list_collections(&client)
//!         .await?
//!         .into_iter()
//!         .map(|c| c.name)
//!         .collect();
//!     let plan = BackupPlan::new(client.source_label(), names, "./backups");
//!     let manifest = run_backup(&client, &plan, &NoProgress, &CancelFlag::new()).await?;
//!
//!     assert!(manifest.is_success());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// MongoDB connection, codec, engines and run orchestration.
pub mod backup {
    pub use docvault_mongodb::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use docvault_mongodb::prelude::*;
}

// Re-export key types at the crate root
pub use docvault_mongodb::{
    BackupError, BackupPlan, BackupResult, CancelFlag, ConnectionParams, Manifest, MemoryStore,
    MongoClient, RestorePlan, RestoreReport, RunStatus, run_backup, run_restore,
};
