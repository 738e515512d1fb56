//! Main CLI parser and top-level argument handling.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line interface for the stagehand task engine.
#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Install content and fetch tools with the stagehand task engine")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Install a content archive into a directory using the worker process
    Install(InstallArgs),

    /// Download an auxiliary tool executable
    FetchTool(FetchToolArgs),
}

/// Arguments of `stagehand install`.
#[derive(clap::Args)]
pub struct InstallArgs {
    /// Content archive to install from
    #[arg(long)]
    pub source: PathBuf,

    /// Directory to install into
    #[arg(long)]
    pub dest: PathBuf,

    /// Script the worker runs after copying files
    #[arg(long)]
    pub script: Option<PathBuf>,

    /// Worker executable (path or name on PATH)
    #[arg(long, env = "STAGEHAND_WORKER", default_value = "stagehand-worker")]
    pub worker: PathBuf,

    /// Item id recorded in logs and events
    #[arg(long, default_value_t = 1)]
    pub item: u64,

    /// Remove existing files in the destination first
    #[arg(long)]
    pub remove_existing: bool,

    /// Pause instead of resetting the stage when the worker fails
    #[arg(long)]
    pub pause_on_error: bool,

    /// Treat the install as the second half of an update to this build
    #[arg(long)]
    pub update_build: Option<u32>,
}

/// Arguments of `stagehand fetch-tool`.
#[derive(clap::Args)]
pub struct FetchToolArgs {
    /// Tool name
    #[arg(long)]
    pub name: String,

    /// URL of the executable
    #[arg(long)]
    pub url: String,

    /// Root directory; the tool lands in `<root>/tools/<host>/<file>`
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_install_args() {
        let cli = Cli::parse_from([
            "stagehand",
            "install",
            "--source",
            "/cache/app.pkg",
            "--dest",
            "/games/app",
            "--worker",
            "/opt/worker",
            "--remove-existing",
        ]);
        let Some(Commands::Install(args)) = cli.command else {
            panic!("expected install command");
        };
        assert_eq!(args.source, PathBuf::from("/cache/app.pkg"));
        assert_eq!(args.worker, PathBuf::from("/opt/worker"));
        assert!(args.remove_existing);
        assert!(!args.pause_on_error);
        assert_eq!(args.update_build, None);
    }

    #[test]
    fn test_fetch_tool_args() {
        let cli = Cli::parse_from([
            "stagehand",
            "-v",
            "fetch-tool",
            "--name",
            "redist",
            "--url",
            "https://cdn.example.com/redist.exe",
        ]);
        assert!(cli.verbose);
        let Some(Commands::FetchTool(args)) = cli.command else {
            panic!("expected fetch-tool command");
        };
        assert_eq!(args.root, PathBuf::from("."));
    }
}
