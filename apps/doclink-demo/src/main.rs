//! doclink demo
//!
//! Files key/value items into a SQLite document store and builds query
//! strings from the command line.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use doclink_core::Value;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use commands::parse_assignment;

#[derive(Parser)]
#[command(name = "doclink", version, about = "Document-backed items and query strings")]
struct Cli {
    /// SQLite file holding the documents (overrides the config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an item, optionally with initial fields
    New {
        #[arg(value_parser = parse_assignment)]
        fields: Vec<(String, Value)>,
    },
    /// Set fields on an existing item
    Set {
        id: Uuid,
        #[arg(required = true, value_parser = parse_assignment)]
        fields: Vec<(String, Value)>,
    },
    /// Print an item's properties as JSON
    Show { id: Uuid },
    /// List every item in the store
    List,
    /// Remove an item's document from the store
    Delete { id: Uuid },
    /// Print the query string for key=value pairs
    Query {
        #[arg(value_parser = parse_assignment)]
        params: Vec<(String, Value)>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = commands::run(&cli)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
