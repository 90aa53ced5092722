//! Logging setup for the docvault CLI.
//!
//! # Environment Variables
//!
//! - `DOCVAULT_LOG` - Full filter directive, e.g. `docvault_mongodb=debug,mongodb=warn`
//! - `DOCVAULT_LOG_FORMAT=json|pretty|compact` - Output format (default: compact)
//!
//! Without `DOCVAULT_LOG` the level follows `-v`: warn, then info, debug
//! and trace. Logs always go to stderr so they never mix with command output.

use std::env;
use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Log level for a `-v` count.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Get the configured log format from `DOCVAULT_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    env::var("DOCVAULT_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "json" => "json",
            "pretty" => "pretty",
            _ => "compact",
        })
        .unwrap_or("compact")
}

fn filter_for(verbose: u8) -> EnvFilter {
    if let Ok(directive) = env::var("DOCVAULT_LOG") {
        if let Ok(filter) = EnvFilter::try_new(directive) {
            return filter;
        }
    }
    let level = level_for_verbosity(verbose);
    EnvFilter::try_new(format!(
        "docvault={},docvault_cli={},docvault_mongodb={}",
        level, level, level
    ))
    .unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize logging. Subsequent calls are no-ops.
pub fn init(verbose: u8) {
    INIT.call_once(|| {
        let filter = filter_for(verbose);
        let format = get_log_format();

        let registry = tracing_subscriber::registry().with(filter);
        let result = match format {
            "json" => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            "pretty" => registry
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init(),
            _ => registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init(),
        };

        if result.is_ok() {
            tracing::debug!(verbose, format, "docvault logging initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), "warn");
        assert_eq!(level_for_verbosity(1), "info");
        assert_eq!(level_for_verbosity(2), "debug");
        assert_eq!(level_for_verbosity(9), "trace");
    }
}
