//! CLI argument definitions using clap.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// docvault - Type-preserving backup and restore for MongoDB collections
#[derive(Parser, Debug)]
#[command(name = "docvault")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "docvault - Type-preserving backup and restore for MongoDB collections", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Path to config file (defaults to ./docvault.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List collections with approximate document counts
    List(ListArgs),

    /// Back up collections into a new run directory
    Backup(BackupArgs),

    /// Restore collections from a backup run directory
    Restore(RestoreArgs),

    /// Display version information
    Version,
}

// =============================================================================
// Connection
// =============================================================================

/// Connection arguments shared by every command that talks to a server
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Server host name or address
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Database to operate on
    #[arg(short, long)]
    pub database: Option<String>,

    /// Username for authentication
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password for authentication
    #[arg(long, env = "DOCVAULT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Database holding the user's credentials
    #[arg(long)]
    pub auth_database: Option<String>,

    /// Seconds to wait for the server when connecting
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Seconds to wait for each batch fetch or insert
    #[arg(long)]
    pub operation_timeout: Option<u64>,
}

// =============================================================================
// List Command
// =============================================================================

/// Arguments for the `list` command
#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Print the collections as JSON
    #[arg(long)]
    pub json: bool,
}

// =============================================================================
// Backup Command
// =============================================================================

/// Arguments for the `backup` command
#[derive(Args, Debug)]
pub struct BackupArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Collections to back up (comma-separated)
    #[arg(short, long, value_delimiter = ',', conflicts_with = "all")]
    pub collections: Vec<String>,

    /// Back up every collection without prompting
    #[arg(long)]
    pub all: bool,

    /// Directory the run directory is created under
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Documents per batch fetch
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Collections exported concurrently
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Write the run result as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Accept defaults without prompting
    #[arg(short, long)]
    pub yes: bool,
}

// =============================================================================
// Restore Command
// =============================================================================

/// Arguments for the `restore` command
#[derive(Args, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Backup run directory to restore from
    #[arg(short, long)]
    pub backup_dir: PathBuf,

    /// Collections to restore (comma-separated, defaults to all)
    #[arg(long, value_delimiter = ',')]
    pub collection: Vec<String>,

    /// Restore a single collection under a different name
    #[arg(long)]
    pub target_collection: Option<String>,

    /// Drop destination collections before restoring
    #[arg(long)]
    pub drop_existing: bool,

    /// Restore into a staging collection and swap it in when complete
    #[arg(long, requires = "drop_existing")]
    pub staged_swap: bool,

    /// Skip the confirmation prompt for destructive restores
    #[arg(short, long)]
    pub force: bool,

    /// Documents per insert
    #[arg(long)]
    pub batch_size: Option<u32>,

    /// Collections imported concurrently
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Write the run result as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}
