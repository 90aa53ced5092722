//! On-disk layout of a backup run.
//!
//! ```text
//! <output>/<database>_<host>_<YYYYmmdd_HHMMSS>/
//!     backup_summary.json
//!     <collection>/
//!         <collection>.json   one text record per line
//!         metadata.json
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use bson::Document;
use chrono::{DateTime, Local, Utc};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use crate::codec::{self, FORMAT_NAME, FORMAT_VERSION};
use crate::error::{BackupError, BackupResult};
use crate::manifest::{MANIFEST_FILE_NAME, Manifest};

/// Name of the per-collection metadata file.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Bytes escaped in artifact directory names: path separators, the escape
/// character itself, and characters some filesystems refuse.
const PATH_UNSAFE: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'\\')
    .add(b'%')
    .add(b':')
    .add(b'*')
    .add(b'?')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'|');

/// Directory (and file stem) used for a collection's artifact.
///
/// Collection names may contain `/`; they are percent-encoded so every
/// artifact is exactly one directory below the run directory.
pub fn artifact_dir_name(collection: &str) -> String {
    utf8_percent_encode(collection, PATH_UNSAFE).to_string()
}

/// Collection name for an artifact directory, if the name decodes.
pub fn collection_from_dir_name(dir_name: &str) -> Option<String> {
    percent_decode_str(dir_name)
        .decode_utf8()
        .ok()
        .map(|name| name.into_owned())
}

/// Path of a collection's record container inside a run directory.
pub fn records_path(run_dir: &Path, collection: &str) -> PathBuf {
    container_path(run_dir, &artifact_dir_name(collection))
}

/// Path of a collection's metadata file inside a run directory.
pub fn metadata_path(run_dir: &Path, collection: &str) -> PathBuf {
    run_dir
        .join(artifact_dir_name(collection))
        .join(METADATA_FILE_NAME)
}

fn container_path(run_dir: &Path, dir_name: &str) -> PathBuf {
    run_dir.join(dir_name).join(format!("{}.json", dir_name))
}

/// Directory name for a run: `<database>_<host>_<YYYYmmdd_HHMMSS>`.
///
/// Dots and colons in the host are replaced so runs against different
/// servers never collide.
pub fn run_dir_name(database: &str, host: &str, at: DateTime<Local>) -> String {
    let host: String = host
        .chars()
        .map(|c| if matches!(c, '.' | ':' | '/' | '[' | ']') { '_' } else { c })
        .collect();
    format!("{}_{}_{}", database, host, at.format("%Y%m%d_%H%M%S"))
}

/// Top-level field name → BSON type names observed for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaHints(BTreeMap<String, BTreeSet<String>>);

impl SchemaHints {
    /// Record the top-level field types of one document.
    pub fn observe(&mut self, document: &Document) {
        for (key, value) in document {
            self.0
                .entry(key.clone())
                .or_default()
                .insert(codec::bson_type_name(value).to_string());
        }
    }

    /// Type names seen for a field.
    pub fn types_of(&self, field: &str) -> Option<&BTreeSet<String>> {
        self.0.get(field)
    }

    /// Number of distinct fields seen.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if no field has been seen.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Sibling metadata record of a collection artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    /// Source collection name.
    pub collection_name: String,
    /// Records in the container.
    pub document_count: u64,
    /// Documents left out because they could not be encoded.
    #[serde(default)]
    pub skipped_count: u64,
    /// When the export finished.
    pub exported_at: DateTime<Utc>,
    /// Database the collection came from.
    pub source_database: String,
    /// Record format revision.
    pub format_version: u32,
    /// Record format name.
    #[serde(default = "default_format")]
    pub format: String,
    /// False when the export was cancelled between batches.
    #[serde(default = "default_complete")]
    pub complete: bool,
    /// Field types observed during export.
    #[serde(default)]
    pub schema_hints: SchemaHints,
}

fn default_format() -> String {
    FORMAT_NAME.to_string()
}

fn default_complete() -> bool {
    true
}

impl ArtifactMetadata {
    /// Metadata for a freshly written artifact.
    pub fn new(collection: &str, source_database: &str) -> Self {
        Self {
            collection_name: collection.to_string(),
            document_count: 0,
            skipped_count: 0,
            exported_at: Utc::now(),
            source_database: source_database.to_string(),
            format_version: FORMAT_VERSION,
            format: FORMAT_NAME.to_string(),
            complete: true,
            schema_hints: SchemaHints::default(),
        }
    }

    /// Write the metadata next to the artifact.
    pub async fn write(&self, path: &Path) -> BackupResult<()> {
        let content = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Read metadata from disk.
    pub async fn read(path: &Path) -> BackupResult<Self> {
        let content = tokio::fs::read(path).await?;
        serde_json::from_slice(&content).map_err(|e| {
            BackupError::artifact(format!("invalid metadata {}: {}", path.display(), e))
        })
    }

    /// Fail unless this build can decode the artifact.
    pub fn ensure_supported(&self) -> BackupResult<()> {
        if self.format_version > FORMAT_VERSION {
            return Err(BackupError::UnsupportedFormat {
                found: self.format_version,
                supported: FORMAT_VERSION,
            });
        }
        Ok(())
    }
}

/// Appends text records to a collection container.
pub struct ArtifactWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl ArtifactWriter {
    /// Create (or truncate) the container for `collection` under `run_dir`.
    pub async fn create(run_dir: &Path, collection: &str) -> BackupResult<Self> {
        let path = records_path(run_dir, collection);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        debug!(path = %path.display(), "Created artifact");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    /// Append one batch of records and flush it to the file.
    pub async fn append_batch(&mut self, records: &[String]) -> BackupResult<()> {
        for record in records {
            self.writer.write_all(record.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
        }
        self.writer.flush().await?;
        self.records += records.len() as u64;
        Ok(())
    }

    /// Records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Container path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and sync the container to disk.
    pub async fn finish(mut self) -> BackupResult<PathBuf> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        Ok(self.path)
    }
}

/// One line read from a container.
#[derive(Debug)]
pub struct RawRecord {
    /// 1-based line number.
    pub line: u64,
    /// Record bytes without the line terminator.
    pub bytes: Vec<u8>,
}

impl RawRecord {
    /// The record as text; a line that is not UTF-8 is a malformed record.
    pub fn text(&self) -> BackupResult<&str> {
        std::str::from_utf8(&self.bytes)
            .map_err(|e| BackupError::malformed(self.line, format!("invalid UTF-8: {}", e)))
    }
}

/// Streams records out of a container without loading it whole.
pub struct ArtifactReader {
    reader: BufReader<File>,
    line: u64,
}

impl ArtifactReader {
    /// Open a container.
    pub async fn open(path: &Path) -> BackupResult<Self> {
        let file = File::open(path).await.map_err(|e| {
            BackupError::artifact(format!("cannot open {}: {}", path.display(), e))
        })?;
        Ok(Self {
            reader: BufReader::new(file),
            line: 0,
        })
    }

    /// Next non-blank record, or `None` at end of file.
    ///
    /// Lines are returned as bytes so one undecodable line does not end the
    /// stream.
    pub async fn next_record(&mut self) -> BackupResult<Option<RawRecord>> {
        loop {
            let mut bytes = Vec::new();
            if self.reader.read_until(b'\n', &mut bytes).await? == 0 {
                return Ok(None);
            }
            self.line += 1;
            while matches!(bytes.last(), Some(b'\n' | b'\r')) {
                bytes.pop();
            }
            if bytes.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(RawRecord {
                line: self.line,
                bytes,
            }));
        }
    }
}

/// A collection artifact found in a backup directory.
#[derive(Debug, Clone)]
pub struct ArtifactEntry {
    /// Collection name (the directory name).
    pub name: String,
    /// Path of the record container.
    pub path: PathBuf,
    /// Parsed metadata, when present and readable.
    pub metadata: Option<ArtifactMetadata>,
    /// False when the run's manifest marks this collection as failed, or
    /// the export stopped early (`complete: false`).
    pub usable: bool,
}

/// Find every collection artifact in a backup run directory, sorted by name.
///
/// A subdirectory `X` holding `X/X.json` is an artifact of the collection
/// whose percent-encoded name is `X`. Collections the
/// run manifest marks as failed, and artifacts of cancelled exports, are
/// returned with `usable: false`.
pub async fn discover_artifacts(backup_dir: &Path) -> BackupResult<Vec<ArtifactEntry>> {
    if !tokio::fs::try_exists(backup_dir).await? {
        return Err(BackupError::artifact(format!(
            "backup directory not found: {}",
            backup_dir.display()
        )));
    }

    let manifest_path = backup_dir.join(MANIFEST_FILE_NAME);
    let manifest = if tokio::fs::try_exists(&manifest_path).await? {
        match Manifest::load(&manifest_path).await {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "Ignoring unreadable manifest");
                None
            }
        }
    } else {
        None
    };

    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(backup_dir).await?;
    while let Some(item) = dir.next_entry().await? {
        if !item.file_type().await?.is_dir() {
            continue;
        }
        let Ok(dir_name) = item.file_name().into_string() else {
            continue;
        };
        let Some(name) = collection_from_dir_name(&dir_name) else {
            continue;
        };
        let path = container_path(backup_dir, &dir_name);
        if !tokio::fs::try_exists(&path).await? {
            continue;
        }

        let meta_path = backup_dir.join(&dir_name).join(METADATA_FILE_NAME);
        let metadata = if tokio::fs::try_exists(&meta_path).await? {
            match ArtifactMetadata::read(&meta_path).await {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(collection = %name, error = %e, "Ignoring unreadable metadata");
                    None
                }
            }
        } else {
            None
        };

        let failed = manifest
            .as_ref()
            .and_then(|m| m.collection(&name))
            .is_some_and(|c| c.failed);
        let incomplete = metadata.as_ref().is_some_and(|m| !m.complete);
        if incomplete {
            debug!(collection = %name, "Artifact is incomplete");
        }
        let usable = !failed && !incomplete;

        entries.push(ArtifactEntry {
            name,
            path,
            metadata,
            usable,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
