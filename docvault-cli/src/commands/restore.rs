//! `docvault restore` command - Import collections from a backup run directory.

use docvault_mongodb::artifact::discover_artifacts;
use docvault_mongodb::pipeline::select_artifacts;
use docvault_mongodb::{
    CancelFlag, DocumentStore, ImportOptions, ReplaceStrategy, RestorePlan, RestoreReport,
    RunStatus, run_restore,
};

use crate::cli::RestoreArgs;
use crate::commands::{
    batch_size, cancel_on_ctrl_c, connect, connection_params, parallelism, progress_renderer,
    write_report,
};
use crate::config::Config;
use crate::error::{CliError, CliResult};
use crate::output::{self, kv};

/// Run the restore command
pub async fn run(args: RestoreArgs, config: &Config) -> CliResult<i32> {
    output::header("Restore");

    if !args.backup_dir.is_dir() {
        return Err(CliError::Config(format!(
            "Backup directory not found: {}",
            args.backup_dir.display()
        )));
    }

    let params = connection_params(&args.connection, config)?;
    let operation_timeout = params.timeouts.operation;
    let batch_size = batch_size(args.batch_size, config.restore.batch_size)?;
    let parallelism = parallelism(args.parallel, config.restore.parallelism)?;
    let replace_strategy = if args.staged_swap {
        ReplaceStrategy::StagedSwap
    } else {
        config.restore.replace_strategy
    };
    let requested = (!args.collection.is_empty()).then(|| args.collection.clone());

    // Validate the selection before touching the server.
    output::step(1, 3, "Reading backup...");
    kv("Backup", &args.backup_dir.display().to_string());
    let available = discover_artifacts(&args.backup_dir).await?;
    let selected: Vec<String> = select_artifacts(&available, requested.as_deref())?
        .into_iter()
        .map(|entry| entry.name.clone())
        .collect();
    if selected.is_empty() {
        output::warn("No restorable collections in this backup");
        return Ok(0);
    }
    if args.target_collection.is_some() && selected.len() != 1 {
        return Err(CliError::Config(
            "--target-collection needs exactly one --collection".into(),
        ));
    }
    for name in &selected {
        match (&args.target_collection, selected.len()) {
            (Some(target), 1) => output::list_item(&format!("{} -> {}", name, target)),
            _ => output::list_item(name),
        }
    }

    output::step(2, 3, "Connecting...");
    let client = connect(params).await?;

    if args.drop_existing && !args.force {
        output::newline();
        output::warn(&format!(
            "Existing collections in '{}' will be replaced ({}).",
            client.database_name(),
            match replace_strategy {
                ReplaceStrategy::DropThenInsert => "drop, then insert",
                ReplaceStrategy::StagedSwap => "staged swap",
            }
        ));
        if !output::confirm("Continue?") {
            output::info("Restore cancelled");
            return Ok(1);
        }
    }

    output::step(3, 3, "Importing...");
    let plan = RestorePlan {
        backup_dir: args.backup_dir.clone(),
        collections: Some(selected),
        target_collection: args.target_collection.clone(),
        import: ImportOptions::default()
            .with_drop_existing(args.drop_existing)
            .with_batch_size(batch_size)
            .with_operation_timeout(operation_timeout)
            .with_replace_strategy(replace_strategy),
        parallelism,
    };

    let cancel = CancelFlag::new();
    let ctrl_c = cancel_on_ctrl_c(cancel.clone());
    let (sink, renderer) = progress_renderer();

    let result = run_restore(&client, &plan, &sink, &cancel).await;

    ctrl_c.abort();
    drop(sink);
    let _ = renderer.await;

    let report = result?;
    print_summary(&report);

    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }
    Ok(report.status.exit_code())
}

fn print_summary(report: &RestoreReport) {
    output::newline();
    output::section("Summary");
    for result in &report.collections {
        let state = if result.failed {
            output::style_error("failed")
        } else if result.cancelled {
            output::style_pending("cancelled")
        } else {
            output::style_success("ok")
        };
        let mut line = format!("{}: {} ({} inserted", result.name, state, result.written);
        if result.skipped > 0 {
            line.push_str(&format!(", {} malformed", result.skipped));
        }
        if result.rejected > 0 {
            line.push_str(&format!(", {} rejected", result.rejected));
        }
        line.push(')');
        if let Some(error) = &result.error {
            line.push_str(&format!(" - {}", error));
        }
        output::list_item(&line);
    }
    output::newline();

    kv("Inserted", &report.total_inserted().to_string());
    kv("Malformed", &report.total_skipped().to_string());
    kv("Rejected", &report.total_rejected().to_string());

    match report.status {
        RunStatus::Succeeded => output::success("Restore completed"),
        RunStatus::Partial => output::warn("Restore completed with failures"),
        _ => output::error(&format!(
            "Restore aborted: {}",
            report.abort_reason.as_deref().unwrap_or("unknown reason")
        )),
    }
}
