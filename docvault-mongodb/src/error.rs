//! Error types for backup and restore operations.

use std::fmt;
use std::io;

use mongodb::error::ErrorKind;
use thiserror::Error;

/// Result type for backup and restore operations.
pub type BackupResult<T> = Result<T, BackupError>;

/// Server error codes that mean the credentials were refused.
const AUTH_ERROR_CODES: &[i32] = &[13, 18];

/// Why a connection attempt or an established session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The server could not be reached (DNS, refused, no suitable server).
    Unreachable,
    /// The server rejected the credentials or the user lacks privileges.
    Unauthorized,
    /// The server did not answer within the configured deadline.
    Timeout,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "server unreachable"),
            Self::Unauthorized => write!(f, "authentication rejected"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

/// A connection-level failure, classified so callers can render an actionable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} ({target}): {message}")]
pub struct ConnectionError {
    /// Failure classification.
    pub kind: ConnectionErrorKind,
    /// The `host:port` or collection the failure relates to.
    pub target: String,
    /// Driver or transport message.
    pub message: String,
}

impl ConnectionError {
    /// Create a connection error.
    pub fn new(
        kind: ConnectionErrorKind,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            message: message.into(),
        }
    }

    /// Classify a driver error.
    pub fn classify(target: impl Into<String>, err: &mongodb::error::Error) -> Self {
        let kind = match err.kind.as_ref() {
            ErrorKind::Authentication { .. } => ConnectionErrorKind::Unauthorized,
            ErrorKind::Command(cmd) if AUTH_ERROR_CODES.contains(&cmd.code) => {
                ConnectionErrorKind::Unauthorized
            }
            ErrorKind::Io(io_err) if io_err.kind() == io::ErrorKind::TimedOut => {
                ConnectionErrorKind::Timeout
            }
            _ => ConnectionErrorKind::Unreachable,
        };
        Self::new(kind, target, err.to_string())
    }
}

/// Errors that can occur while backing up or restoring collections.
#[derive(Error, Debug)]
pub enum BackupError {
    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// Connection could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Collections could not be listed.
    #[error("enumeration error: {0}")]
    Enumeration(String),

    /// A text record could not be decoded, or a raw document could not be encoded.
    #[error("malformed record at line {line}: {message}")]
    MalformedRecord {
        /// 1-based line in the artifact (0 when not read from a file).
        line: u64,
        /// Parser message.
        message: String,
    },

    /// The destination refused a single document.
    #[error("document {index} rejected (code {code}): {message}")]
    InsertRejected {
        /// Position of the document in its batch.
        index: usize,
        /// Server error code.
        code: i32,
        /// Server message.
        message: String,
    },

    /// A multi-part insert failed after some documents were accepted.
    #[error("insert interrupted after {inserted} documents: {source}")]
    InsertInterrupted {
        /// Documents the destination accepted before the failure.
        inserted: u64,
        /// The failure that stopped the insert.
        #[source]
        source: Box<BackupError>,
    },

    /// An export stopped before the cursor was exhausted.
    #[error("export of '{collection}' aborted after {written} documents: {reason}")]
    ExportAborted {
        /// Collection being exported.
        collection: String,
        /// Records committed to the artifact.
        written: u64,
        /// Underlying failure.
        reason: String,
    },

    /// A restore stopped because the destination became unavailable.
    #[error("restore of '{collection}' aborted after {inserted} documents: {reason}")]
    RestoreAborted {
        /// Collection being restored.
        collection: String,
        /// Documents inserted before the failure.
        inserted: u64,
        /// Underlying failure.
        reason: String,
    },

    /// A batch operation exceeded its deadline.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Artifact layout or metadata problem.
    #[error("artifact error: {0}")]
    Artifact(String),

    /// Artifact written by a newer format revision.
    #[error("unsupported artifact format version {found} (supported up to {supported})")]
    UnsupportedFormat {
        /// Version declared by the artifact.
        found: u32,
        /// Highest version this build reads.
        supported: u32,
    },

    /// Manifest could not be written or read.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// JSON error outside the record codec (metadata, manifest).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackupError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an enumeration error.
    pub fn enumeration(message: impl Into<String>) -> Self {
        Self::Enumeration(message.into())
    }

    /// Create a malformed record error.
    pub fn malformed(line: u64, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line,
            message: message.into(),
        }
    }

    /// Create an artifact error.
    pub fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact(message.into())
    }

    /// Create a manifest error.
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest(message.into())
    }

    /// Create a connection error of the given kind.
    pub fn connection(
        kind: ConnectionErrorKind,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection(ConnectionError::new(kind, target, message))
    }

    /// Wrap `source` with the number of documents accepted before it.
    pub fn insert_interrupted(inserted: u64, source: BackupError) -> Self {
        Self::InsertInterrupted {
            inserted,
            source: Box::new(source),
        }
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::InsertInterrupted { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        self.connection_kind() == Some(ConnectionErrorKind::Timeout)
    }

    /// Check if this error only affects one document and may be skipped.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. } | Self::InsertRejected { .. }
        )
    }

    /// The connection classification, if this error has one.
    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Self::Connection(e) => Some(e.kind),
            Self::Timeout(_) => Some(ConnectionErrorKind::Timeout),
            Self::InsertInterrupted { source, .. } => source.connection_kind(),
            _ => None,
        }
    }
}
