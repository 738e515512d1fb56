//! `stagehand install` - run the worker against a content archive.

use std::sync::Arc;

use anyhow::{Result, bail};
use stagehand_core::{
    AlwaysVerify, Build, ChannelTaskEmitter, EngineSettings, EnvConfig, ItemHandle, ItemId,
    ItemOptions, MemoryCatalog, MemoryItem, ProgressReport, StageCall, TaskError, TaskEvent,
    TaskState,
};
use stagehand_tasks::worker::ProcessWorkerService;
use stagehand_tasks::{InstallDeps, InstallJob, ServiceDeps, build_install_task};

use crate::parser::InstallArgs;
use crate::progress::{CliProgressPrinter, ProgressUnit};

/// Execute the install command.
pub async fn execute(args: InstallArgs) -> Result<()> {
    let settings = EngineSettings::from_source(&EnvConfig);
    tracing::debug!(?settings, "Resolved engine settings");

    let catalog = Arc::new(MemoryCatalog::new());
    let item = catalog.insert(build_item(&args));
    let service = Arc::new(ProcessWorkerService::new(&args.worker));

    let (emitter, mut events) = ChannelTaskEmitter::new();
    let deps = InstallDeps::new(
        ServiceDeps { catalog, service },
        Arc::new(emitter),
        settings,
    )
    .with_verify(Arc::new(AlwaysVerify));

    let task = build_install_task(
        deps,
        InstallJob {
            item: item.id(),
            source: args.source.clone(),
            build: args.update_build.map(Build),
        },
    );

    println!("Installing {} into {}", args.source.display(), args.dest.display());
    task.start()?;

    let mut printer = CliProgressPrinter::new("Installing", ProgressUnit::Percent);
    let mut stopping = false;
    let finish = task.wait_for_finish();
    tokio::pin!(finish);

    let state = loop {
        tokio::select! {
            state = &mut finish => break state,
            Some(event) = events.recv() => render(&mut printer, &event),
            result = tokio::signal::ctrl_c(), if !stopping => {
                result?;
                stopping = true;
                printer.finish();
                println!("Stopping install...");
                if let Err(e) = task.stop().await {
                    // Task reached a terminal state on its own
                    tracing::debug!(error = %e, "Stop ignored");
                }
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        render(&mut printer, &event);
    }
    printer.finish();

    report_outcome(state, task.error(), &item)
}

/// Item the CLI installs into, shaped by the command-line flags.
fn build_item(args: &InstallArgs) -> MemoryItem {
    let mut options = ItemOptions::empty();
    options.set(ItemOptions::REMOVE_FILES, args.remove_existing);
    options.set(ItemOptions::PAUSE_ON_ERROR, args.pause_on_error);

    let mut item = MemoryItem::new(ItemId(args.item), &args.dest).with_options(options);
    if let Some(script) = &args.script {
        item = item.with_install_script(script);
    }
    if let Some(build) = args.update_build {
        // Download half of the update is already done
        item = item.with_pending_update(Build(build));
        item.set_percent(50);
    }
    item
}

fn render(printer: &mut CliProgressPrinter, event: &TaskEvent) {
    match event {
        TaskEvent::Progress {
            done,
            total,
            percent,
            ..
        } => printer.update(&ProgressReport {
            done: *done,
            total: *total,
            percent: *percent,
            ..ProgressReport::default()
        }),
        TaskEvent::Completed {
            had_hash_mismatch: true,
            ..
        } => {
            printer.finish();
            println!("Warning: content hash mismatches were reported during install");
        }
        TaskEvent::Completed { .. } | TaskEvent::Failed { .. } | TaskEvent::Cancelled { .. } => {}
    }
}

fn report_outcome(
    state: TaskState,
    error: Option<TaskError>,
    item: &MemoryItem,
) -> Result<()> {
    match state {
        TaskState::Finished => {
            if item
                .stage_calls()
                .iter()
                .any(|call| matches!(call, StageCall::Verify(_)))
            {
                println!("✓ Install finished; files will be verified");
            } else {
                println!("✓ Install finished");
            }
            Ok(())
        }
        TaskState::Stopped => {
            println!("Install stopped");
            Ok(())
        }
        _ if item.is_paused() => match error {
            Some(e) => bail!("Install failed, item paused: {e}"),
            None => bail!("Install failed, item paused"),
        },
        _ => match error {
            Some(e) => bail!("Install failed: {e}"),
            None => bail!("Install ended in state {state:?}"),
        },
    }
}
