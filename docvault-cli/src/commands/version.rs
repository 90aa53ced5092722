//! `docvault version` command - Display version information.

use docvault_mongodb::codec::{FORMAT_NAME, FORMAT_VERSION};

use crate::error::CliResult;
use crate::output::{self, kv};

/// Package version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
const NAME: &str = env!("CARGO_PKG_NAME");

/// Run the version command
pub async fn run() -> CliResult<i32> {
    output::logo();
    output::newline();

    kv("Version", VERSION);
    kv("Binary", NAME);

    #[cfg(debug_assertions)]
    let build_mode = "debug";
    #[cfg(not(debug_assertions))]
    let build_mode = "release";

    kv("Build", build_mode);
    kv("Artifact format", &format!("{} v{}", FORMAT_NAME, FORMAT_VERSION));

    output::newline();
    output::section("Components");
    kv("docvault-mongodb", env!("CARGO_PKG_VERSION"));

    output::newline();

    Ok(0)
}
