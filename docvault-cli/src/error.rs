//! CLI error types and result alias.

use docvault_mongodb::{BackupError, ConnectionErrorKind};
use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(docvault::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(docvault::config))]
    Config(String),

    /// Could not reach or authenticate against the server
    #[error("Connection error: {message}")]
    #[diagnostic(code(docvault::connection))]
    Connection {
        message: String,
        #[help]
        advice: String,
    },

    /// Backup or restore failure
    #[error("{0}")]
    #[diagnostic(code(docvault::backup))]
    Backup(BackupError),

    /// Command error
    #[error("Command error: {0}")]
    #[diagnostic(code(docvault::command))]
    Command(String),
}

impl From<BackupError> for CliError {
    fn from(err: BackupError) -> Self {
        match err.connection_kind() {
            Some(kind) => {
                let advice = match kind {
                    ConnectionErrorKind::Unreachable => {
                        "Check --host and --port, and that the server is running"
                    }
                    ConnectionErrorKind::Unauthorized => {
                        "Check the username, password and --auth-database"
                    }
                    ConnectionErrorKind::Timeout => {
                        "The server did not answer in time; try a larger --connect-timeout"
                    }
                };
                CliError::Connection {
                    message: err.to_string(),
                    advice: advice.to_string(),
                }
            }
            None => CliError::Backup(err),
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<toml::ser::Error> for CliError {
    fn from(err: toml::ser::Error) -> Self {
        CliError::Config(format!("Failed to serialize TOML: {}", err))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Command(format!("Failed to write report: {}", err))
    }
}
