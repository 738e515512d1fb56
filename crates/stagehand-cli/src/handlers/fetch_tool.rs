//! `stagehand fetch-tool` - download an auxiliary tool executable.

use std::sync::Arc;

use anyhow::{Result, bail};
use stagehand_core::{EngineSettings, EnvConfig, NoopTaskEmitter, TaskState, ToolInfo};
use stagehand_tasks::http::ReqwestTransport;
use stagehand_tasks::progress::WorkerId;
use stagehand_tasks::{DEFAULT_USER_AGENT, ProgressAggregator, ToolFetchDeps, ToolFetchTask};
use tokio::sync::broadcast::error::RecvError;

use crate::parser::FetchToolArgs;
use crate::progress::{CliProgressPrinter, ProgressUnit};

/// Aggregator slot used by the single download.
const DOWNLOAD_WORKER: WorkerId = 0;

/// Execute the fetch-tool command.
pub async fn execute(args: FetchToolArgs) -> Result<()> {
    let settings = EngineSettings::from_source(&EnvConfig);
    let tool = Arc::new(ToolInfo::new(&args.name, &args.url));

    let aggregator = Arc::new(ProgressAggregator::spawn(settings.progress_interval()));
    let mut reports = aggregator.subscribe();

    let deps = ToolFetchDeps {
        transport: Arc::new(ReqwestTransport::new()),
        // The aggregator feeds the progress bar
        emitter: Arc::new(NoopTaskEmitter),
        root: args.root.clone(),
        cancel_threshold: settings.tool_cancel_threshold,
        user_agent: DEFAULT_USER_AGENT.to_string(),
        progress: Some((Arc::clone(&aggregator), DOWNLOAD_WORKER)),
    };
    let fetch = ToolFetchTask::new(deps, Arc::clone(&tool))?;
    fetch.increase_ref_count();

    println!("Fetching {} from {}", tool.name(), tool.url());
    fetch.start()?;

    let mut printer = CliProgressPrinter::new(tool.name(), ProgressUnit::Bytes);
    let mut stopping = false;
    let mut reports_open = true;
    let finish = fetch.wait_for_finish();
    tokio::pin!(finish);

    let state = loop {
        tokio::select! {
            state = &mut finish => break state,
            report = reports.recv(), if reports_open => match report {
                Ok(report) => printer.update(&report),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress display lagged");
                }
                Err(RecvError::Closed) => reports_open = false,
            },
            result = tokio::signal::ctrl_c(), if !stopping => {
                result?;
                stopping = true;
                printer.finish();
                println!("Stopping download...");
                // Ctrl-C always wins over the keep-alive threshold
                fetch.decrease_ref_count(true).await;
            }
        }
    };

    aggregator.shutdown().await;
    printer.update(&aggregator.snapshot());
    printer.finish();

    match state {
        TaskState::Finished => {
            if let Some(path) = tool.exe_path() {
                println!("✓ {} saved to {}", tool.name(), path.display());
            }
            Ok(())
        }
        TaskState::Stopped => {
            println!("Download stopped; partial file removed");
            Ok(())
        }
        _ => match fetch.task().error() {
            Some(e) => bail!("Download failed: {e}"),
            None => bail!("Download ended in state {state:?}"),
        },
    }
}
