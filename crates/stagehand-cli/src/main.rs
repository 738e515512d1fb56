//! CLI entry point - the composition root.
//!
//! Wires the in-memory catalog, the process worker and the HTTP transport
//! into the engine, then routes each subcommand to its handler.

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod handlers;
mod parser;
mod progress;

use parser::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before settings are read
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Install(args)) => handlers::install::execute(args).await,
        Some(Commands::FetchTool(args)) => handlers::fetch_tool::execute(args).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}
