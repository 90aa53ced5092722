//! `docvault list` command - Show collections and their approximate sizes.

use docvault_mongodb::list_collections;

use crate::cli::ListArgs;
use crate::commands::{connect, connection_params};
use crate::config::Config;
use crate::error::CliResult;
use crate::output::{self, kv};

/// Run the list command
pub async fn run(args: ListArgs, config: &Config) -> CliResult<i32> {
    let params = connection_params(&args.connection, config)?;
    let database = params.database.clone();

    if args.json {
        let client = docvault_mongodb::MongoClient::connect(params).await?;
        let collections = list_collections(&client).await?;
        println!("{}", serde_json::to_string_pretty(&collections)?);
        return Ok(0);
    }

    output::header(&format!("Collections in {}", database));
    let client = connect(params).await?;
    let collections = list_collections(&client).await?;
    output::newline();

    if collections.is_empty() {
        output::warn("No collections found");
        return Ok(0);
    }

    let width = collections.iter().map(|c| c.name.len()).max().unwrap_or(0);
    for collection in &collections {
        let count = match collection.approx_count {
            Some(n) => n.to_string(),
            None => output::style_pending("unknown"),
        };
        output::list_item(&format!("{:<width$}  {}", collection.name, count, width = width));
    }

    output::newline();
    kv("Total", &format!("{} collections", collections.len()));
    Ok(0)
}
