//! Worker service backed by a child process.
//!
//! Each session spawns the worker executable when started, streams its
//! stdout through the line protocol, and writes control commands to its
//! stdin. Non-protocol output is logged, never dropped silently.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use stagehand_core::{
    InstallRequest, SessionChannel, TaskError, WorkerEvent, WorkerService, WorkerSession,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;

use super::protocol::{ControlCommand, parse_line};

/// Launches the installer worker as a child process per session.
#[derive(Debug, Clone)]
pub struct ProcessWorkerService {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessWorkerService {
    /// Use `program` (a path or a name looked up on `PATH`) as the worker.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Arguments placed before the per-request arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Resolved worker executable, if it can be found.
    pub fn resolve(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 {
            return self.program.is_file().then(|| self.program.clone());
        }
        which::which(&self.program).ok()
    }
}

#[async_trait]
impl WorkerService for ProcessWorkerService {
    fn is_running(&self) -> bool {
        self.resolve().is_some()
    }

    async fn open_install_session(&self) -> Result<SessionChannel, TaskError> {
        let program = self.resolve().ok_or_else(|| {
            TaskError::session_create_failed(format!(
                "worker executable not found: {}",
                self.program.display()
            ))
        })?;

        let (tx, events) = mpsc::unbounded_channel();
        let session = ProcessSession {
            program,
            prefix_args: self.args.clone(),
            events: tx,
            child: AsyncMutex::new(None),
            stdin: AsyncMutex::new(None),
            readers: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        };

        Ok(SessionChannel {
            session: Arc::new(session),
            events,
        })
    }
}

/// One worker child process.
struct ProcessSession {
    program: PathBuf,
    prefix_args: Vec<String>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    child: AsyncMutex<Option<Child>>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

/// Command-line arguments for an install request.
pub fn install_args(request: &InstallRequest) -> Vec<String> {
    let mut args = vec![
        "install".to_string(),
        "--source".to_string(),
        path_arg(&request.source),
        "--dest".to_string(),
        path_arg(&request.destination),
    ];
    if let Some(script) = &request.script {
        args.push("--script".to_string());
        args.push(path_arg(script));
    }
    args.push("--workers".to_string());
    args.push(request.workers.max(1).to_string());
    if request.remove_existing {
        args.push("--remove-existing".to_string());
    }
    if request.make_writable {
        args.push("--make-writable".to_string());
    }
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl ProcessSession {
    async fn send(&self, command: ControlCommand) -> Result<(), TaskError> {
        let line = command
            .encode()
            .map_err(|e| TaskError::worker("protocol", e.to_string()))?;

        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return Err(TaskError::worker("ipc", "worker is not running"));
        };
        pipe.write_all(line.as_bytes())
            .await
            .map_err(|e| TaskError::worker("ipc", e.to_string()))?;
        pipe.flush()
            .await
            .map_err(|e| TaskError::worker("ipc", e.to_string()))?;

        tracing::debug!(target: "stagehand.worker", ?command, "Sent worker command");
        Ok(())
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }
}

#[async_trait]
impl WorkerSession for ProcessSession {
    async fn start(&self, request: &InstallRequest) -> Result<(), TaskError> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Err(TaskError::worker("ipc", "worker session already started"));
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .args(install_args(request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            TaskError::session_create_failed(format!(
                "failed to spawn {}: {e}",
                self.program.display()
            ))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::session_create_failed("missing worker stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TaskError::session_create_failed("missing worker stderr"))?;
        *self.stdin.lock().await = child.stdin.take();

        tracing::info!(
            target: "stagehand.worker",
            program = %self.program.display(),
            pid = child.id(),
            "Worker process started"
        );
        *child_slot = Some(child);
        drop(child_slot);

        let events = self.events.clone();
        self.track(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut finished = false;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_line(&line) {
                            Ok(event) => {
                                finished = event == WorkerEvent::Finish;
                                if events.send(event).is_err() || finished {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(target: "stagehand.worker", error = %e, line = %line, "Non-protocol worker output");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(target: "stagehand.worker", error = %e, "Failed to read worker output");
                        break;
                    }
                }
            }
            if !finished {
                // Worker exited without saying goodbye; close the session ourselves
                let _ = events.send(WorkerEvent::Finish);
            }
        }));

        self.track(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(target: "stagehand.worker", line = %line, "Worker stderr");
            }
        }));

        Ok(())
    }

    async fn pause(&self) -> Result<(), TaskError> {
        self.send(ControlCommand::Pause).await
    }

    async fn unpause(&self) -> Result<(), TaskError> {
        self.send(ControlCommand::Unpause).await
    }

    async fn stop(&self) -> Result<(), TaskError> {
        self.send(ControlCommand::Stop).await
    }

    async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            tracing::warn!(target: "stagehand.worker", "Worker session destroyed twice");
            return;
        }

        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(target: "stagehand.worker", error = %e, "Worker already exited");
            }
            match child.wait().await {
                Ok(status) => {
                    tracing::debug!(target: "stagehand.worker", %status, "Worker process reaped");
                }
                Err(e) => {
                    tracing::warn!(target: "stagehand.worker", error = %e, "Failed to reap worker");
                }
            }
        }

        let readers = std::mem::take(
            &mut *self.readers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for reader in readers {
            reader.abort();
        }
    }
}
