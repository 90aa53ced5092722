//! `docvault backup` command - Export collections into a new run directory.

use docvault_mongodb::{
    BackupPlan, CancelFlag, CollectionInfo, DocumentStore, ExportOptions, Manifest, RunStatus,
    list_collections, resolve_selection, run_backup,
};

use crate::cli::BackupArgs;
use crate::commands::{
    batch_size, cancel_on_ctrl_c, connect, connection_params, parallelism, progress_renderer,
    write_report,
};
use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::output::{self, kv};

/// Run the backup command
pub async fn run(args: BackupArgs, config: &Config) -> CliResult<i32> {
    output::header("Backup");

    let params = connection_params(&args.connection, config)?;
    let operation_timeout = params.timeouts.operation;
    let batch_size = batch_size(args.batch_size, config.backup.batch_size)?;
    let parallelism = parallelism(args.parallel, config.backup.parallelism)?;
    let output_root = args
        .output
        .clone()
        .unwrap_or_else(|| config.backup.output_dir.clone());

    output::step(1, 3, "Connecting...");
    let client = connect(params).await?;

    output::step(2, 3, "Listing collections...");
    let available = list_collections(&client).await?;
    if available.is_empty() {
        output::warn("Nothing to back up: the database has no collections");
        return Ok(0);
    }
    let selected = choose_collections(&args, &available)?;
    if selected.is_empty() {
        output::warn("No collections selected");
        return Ok(0);
    }
    for name in &selected {
        output::list_item(name);
    }

    output::step(3, 3, "Exporting...");
    let plan = BackupPlan {
        source_host: client.source_label(),
        server_version: client.server_version().map(str::to_string),
        collections: selected,
        output_root,
        export: ExportOptions::default()
            .with_batch_size(batch_size)
            .with_operation_timeout(operation_timeout)
            .with_source_database(client.database_name()),
        parallelism,
    };

    let cancel = CancelFlag::new();
    let ctrl_c = cancel_on_ctrl_c(cancel.clone());
    let (sink, renderer) = progress_renderer();

    let result = run_backup(&client, &plan, &sink, &cancel).await;

    ctrl_c.abort();
    drop(sink);
    let _ = renderer.await;

    let manifest = result?;
    print_summary(&manifest);

    if let Some(path) = &args.report {
        write_report(path, &manifest)?;
    }
    Ok(manifest.status.exit_code())
}

/// Pick collections from flags, or interactively when none were given.
fn choose_collections(args: &BackupArgs, available: &[CollectionInfo]) -> CliResult<Vec<String>> {
    if !args.collections.is_empty() {
        return Ok(resolve_selection(available, Some(args.collections.as_slice()))?);
    }
    if args.all || args.yes {
        return Ok(resolve_selection(available, None)?);
    }

    let options: Vec<String> = available
        .iter()
        .map(|c| match c.approx_count {
            Some(n) => format!("{} ({} documents)", c.name, n),
            None => c.name.clone(),
        })
        .collect();
    let picked = output::multi_select("Collections to back up:", &options)
        .ok_or_else(|| CliError::Command("Invalid selection".into()))?;
    Ok(picked.into_iter().map(|i| available[i].name.clone()).collect())
}

fn print_summary(manifest: &Manifest) {
    output::newline();
    output::section("Summary");
    for entry in &manifest.collections {
        let state = if entry.failed {
            output::style_error("failed")
        } else if entry.cancelled {
            output::style_pending("cancelled")
        } else {
            output::style_success("ok")
        };
        let mut line = format!("{}: {} ({} written", entry.name, state, entry.written);
        if entry.skipped > 0 {
            line.push_str(&format!(", {} skipped", entry.skipped));
        }
        line.push(')');
        if let Some(error) = &entry.error {
            line.push_str(&format!(" - {}", error));
        }
        output::list_item(&line);
    }
    output::newline();

    kv("Run", &manifest.run_id.to_string());
    kv("Documents", &manifest.total_documents.to_string());
    if let Some(dir) = manifest.run_dir() {
        kv("Directory", &dir.display().to_string());
    }

    match manifest.status {
        RunStatus::Succeeded => output::success("Backup completed"),
        RunStatus::Partial => output::warn("Backup completed with failures"),
        _ => output::error(&format!(
            "Backup aborted: {}",
            manifest.abort_reason.as_deref().unwrap_or("unknown reason")
        )),
    }
}
