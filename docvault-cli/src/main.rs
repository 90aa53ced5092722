//! docvault CLI - Back up and restore MongoDB collections.

use clap::Parser;

use docvault_cli::cli::{Cli, Command};
use docvault_cli::commands;
use docvault_cli::config::Config;
use docvault_cli::error::CliResult;
use docvault_cli::{logging, output};

#[tokio::main]
async fn main() {
    // Exit code reflects the run status: 0 succeeded, 2 partial, 1 otherwise
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            output::newline();
            output::error(&e.to_string());
            if let Some(help) = miette::Diagnostic::help(&e) {
                output::dim(&help.to_string());
            }
            std::process::exit(1);
        }
    }
}

async fn run() -> CliResult<i32> {
    // Parse CLI arguments
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Command::Version = cli.command {
        return commands::version::run().await;
    }

    let cwd = std::env::current_dir()?;
    let config = Config::discover(cli.config.as_deref(), &cwd)?;

    // Run the appropriate command
    match cli.command {
        Command::List(args) => commands::list::run(args, &config).await,
        Command::Backup(args) => commands::backup::run(args, &config).await,
        Command::Restore(args) => commands::restore::run(args, &config).await,
        Command::Version => commands::version::run().await,
    }
}
