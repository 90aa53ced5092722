//! CLI command implementations.

pub mod backup;
pub mod list;
pub mod restore;
pub mod version;

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use docvault_mongodb::config::Timeouts;
use docvault_mongodb::progress::{self, ChannelProgress};
use docvault_mongodb::{CancelFlag, ConnectionParams, MongoClient, ProgressEvent};

use crate::cli::ConnectionArgs;
use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::output;

/// Progress events buffered between the engines and the renderer
const PROGRESS_BUFFER: usize = 256;

/// Merge command-line connection flags over the config file.
pub fn connection_params(args: &ConnectionArgs, config: &Config) -> CliResult<ConnectionParams> {
    let file = &config.connection;

    let database = args
        .database
        .clone()
        .or_else(|| file.database.clone())
        .ok_or_else(|| {
            CliError::Config("No database given; pass --database or set it in docvault.toml".into())
        })?;

    let timeouts = Timeouts {
        connect: Duration::from_secs(args.connect_timeout.unwrap_or(file.connect_timeout)),
        operation: Duration::from_secs(args.operation_timeout.unwrap_or(file.operation_timeout)),
        ..Timeouts::default()
    };

    let mut builder = ConnectionParams::builder()
        .host(args.host.clone().unwrap_or_else(|| file.host.clone()))
        .port(args.port.unwrap_or(file.port))
        .database(database)
        .auth_database(
            args.auth_database
                .clone()
                .unwrap_or_else(|| file.auth_database.clone()),
        )
        .timeouts(timeouts)
        .direct_connection(file.direct_connection);

    // A password from the environment alone does not enable authentication.
    if let Some(username) = args.username.clone().or_else(|| file.username.clone()) {
        builder = builder.username(username);
        if let Some(password) = args.password.clone() {
            builder = builder.password(password);
        }
    }
    if let Some(app_name) = file.app_name.clone() {
        builder = builder.app_name(app_name);
    }

    Ok(builder.build()?)
}

/// Connect and report where we are connected.
pub async fn connect(params: ConnectionParams) -> CliResult<MongoClient> {
    output::info(&format!("Connecting to {}...", params.redacted_uri()));
    let client = MongoClient::connect(params).await?;
    if let Some(version) = client.server_version() {
        output::kv("Server version", version);
    }
    Ok(client)
}

/// Set the cancel flag when the user presses Ctrl-C.
pub fn cancel_on_ctrl_c(cancel: CancelFlag) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::newline();
            output::warn("Cancelling after the current batch...");
            cancel.cancel();
        }
    })
}

/// Progress sink plus the task rendering what it receives.
pub fn progress_renderer() -> (ChannelProgress, JoinHandle<()>) {
    let (sink, receiver) = progress::channel(PROGRESS_BUFFER);
    (sink, tokio::spawn(render(receiver)))
}

async fn render(mut receiver: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = receiver.recv().await {
        output::progress(&event);
    }
}

/// Write a run result as pretty JSON.
pub fn write_report<T: Serialize>(path: &Path, report: &T) -> CliResult<()> {
    let content = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, content)?;
    output::kv("Report", &path.display().to_string());
    Ok(())
}

/// Batch size: flag, then config; must be positive.
pub fn batch_size(flag: Option<u32>, configured: u32) -> CliResult<u32> {
    match flag.unwrap_or(configured) {
        0 => Err(CliError::Config("--batch-size must be at least 1".into())),
        n => Ok(n),
    }
}

/// Parallelism: flag, then config; must be positive.
pub fn parallelism(flag: Option<usize>, configured: usize) -> CliResult<usize> {
    match flag.unwrap_or(configured) {
        0 => Err(CliError::Config("--parallel must be at least 1".into())),
        n => Ok(n),
    }
}
