//! CLI configuration handling.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use docvault_mongodb::ReplaceStrategy;
use docvault_mongodb::store::DEFAULT_BATCH_SIZE;

use crate::error::{CliError, CliResult};

/// Default config file name (looked up in the working directory)
pub const CONFIG_FILE_NAME: &str = "docvault.toml";

/// Default directory backups are written under
pub const DEFAULT_OUTPUT_DIR: &str = "./backups";

/// docvault CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server connection settings
    pub connection: ConnectionConfig,

    /// Backup settings
    pub backup: BackupConfig,

    /// Restore settings
    pub restore: RestoreConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the explicit config file, or `docvault.toml` in `cwd` when present.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> CliResult<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let path = cwd.join(CONFIG_FILE_NAME);
                if path.exists() {
                    Self::load(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }
}

/// Connection configuration (`[connection]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Database to operate on
    pub database: Option<String>,

    /// Username for authentication; the password comes from the command
    /// line or `DOCVAULT_PASSWORD`
    pub username: Option<String>,

    /// Database holding the user's credentials
    pub auth_database: String,

    /// Seconds to wait for the server when connecting
    pub connect_timeout: u64,

    /// Seconds to wait for each batch fetch or insert
    pub operation_timeout: u64,

    /// Application name reported to the server
    pub app_name: Option<String>,

    /// Connect to the given host only, without topology discovery
    pub direct_connection: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: docvault_mongodb::config::DEFAULT_PORT,
            database: None,
            username: None,
            auth_database: docvault_mongodb::config::DEFAULT_AUTH_DATABASE.to_string(),
            connect_timeout: 10,
            operation_timeout: 30,
            app_name: None,
            direct_connection: false,
        }
    }
}

/// Backup configuration (`[backup]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory run directories are created under
    pub output_dir: PathBuf,

    /// Documents per batch fetch
    pub batch_size: u32,

    /// Collections exported concurrently
    pub parallelism: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: 1,
        }
    }
}

/// Restore configuration (`[restore]`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Documents per insert
    pub batch_size: u32,

    /// Collections imported concurrently
    pub parallelism: usize,

    /// How `--drop-existing` replaces a collection
    pub replace_strategy: ReplaceStrategy,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            parallelism: 1,
            replace_strategy: ReplaceStrategy::DropThenInsert,
        }
    }
}
