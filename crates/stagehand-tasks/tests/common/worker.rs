//! Scripted worker service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stagehand_core::{
    InstallRequest, SessionChannel, TaskError, WorkerEvent, WorkerService, WorkerSession,
};
use tokio::sync::{Notify, mpsc};

/// Calls received by a [`FakeSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Start(InstallRequest),
    Pause,
    Unpause,
    Stop,
    Destroy,
}

/// Holds `start` until released, like a worker that is slow to spawn.
#[derive(Default)]
pub struct StartGate {
    /// Notified once `start` is in flight.
    pub entered: Notify,
    /// Lets `start` return.
    pub release: Notify,
}

/// Session that replays a script when started and acknowledges `stop`
/// with `Finish`.
///
/// Like a real worker, `stop` is refused until `start` has returned. Only
/// accepted stops are recorded.
pub struct FakeSession {
    script: Vec<WorkerEvent>,
    tx: Mutex<Option<mpsc::UnboundedSender<WorkerEvent>>>,
    calls: Mutex<Vec<SessionCall>>,
    gate: Option<Arc<StartGate>>,
    started: AtomicBool,
    refuse_stop: bool,
}

impl FakeSession {
    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn destroy_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == SessionCall::Destroy)
            .count()
    }

    pub fn request(&self) -> Option<InstallRequest> {
        self.calls().into_iter().find_map(|c| match c {
            SessionCall::Start(request) => Some(request),
            _ => None,
        })
    }

    /// Push an event as if the worker had sent it.
    pub fn send(&self, event: WorkerEvent) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Drop the event sender, as if the worker vanished.
    pub fn close_events(&self) {
        self.tx.lock().unwrap().take();
    }

    fn record(&self, call: SessionCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl WorkerSession for FakeSession {
    async fn start(&self, request: &InstallRequest) -> Result<(), TaskError> {
        self.record(SessionCall::Start(request.clone()));
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        self.started.store(true, Ordering::SeqCst);
        for event in &self.script {
            self.send(event.clone());
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), TaskError> {
        self.record(SessionCall::Pause);
        Ok(())
    }

    async fn unpause(&self) -> Result<(), TaskError> {
        self.record(SessionCall::Unpause);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TaskError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(TaskError::worker("ipc", "worker is not running"));
        }
        if self.refuse_stop {
            return Err(TaskError::worker("ipc", "broken pipe"));
        }
        self.record(SessionCall::Stop);
        self.send(WorkerEvent::Finish);
        Ok(())
    }

    async fn destroy(&self) {
        self.record(SessionCall::Destroy);
        self.tx.lock().unwrap().take();
    }
}

/// Worker service handing out [`FakeSession`]s.
pub struct FakeWorkerService {
    running: bool,
    fail_open: bool,
    script: Vec<WorkerEvent>,
    gate: Option<Arc<StartGate>>,
    refuse_stop: bool,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeWorkerService {
    pub fn with_script(script: Vec<WorkerEvent>) -> Self {
        Self {
            running: true,
            fail_open: false,
            script,
            gate: None,
            refuse_stop: false,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn not_running() -> Self {
        Self {
            running: false,
            ..Self::with_script(Vec::new())
        }
    }

    pub fn refusing_sessions() -> Self {
        Self {
            fail_open: true,
            ..Self::with_script(Vec::new())
        }
    }

    /// Sessions hold `start` on `gate`.
    pub fn with_start_gate(mut self, gate: Arc<StartGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sessions never accept `stop`.
    pub fn refusing_stop(mut self) -> Self {
        self.refuse_stop = true;
        self
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn session(&self) -> Arc<FakeSession> {
        self.sessions()
            .into_iter()
            .next()
            .expect("a session was opened")
    }
}

#[async_trait]
impl WorkerService for FakeWorkerService {
    fn is_running(&self) -> bool {
        self.running
    }

    async fn open_install_session(&self) -> Result<SessionChannel, TaskError> {
        if self.fail_open {
            return Err(TaskError::session_create_failed("worker refused session"));
        }
        let (tx, events) = mpsc::unbounded_channel();
        let session = Arc::new(FakeSession {
            script: self.script.clone(),
            tx: Mutex::new(Some(tx)),
            calls: Mutex::new(Vec::new()),
            gate: self.gate.clone(),
            started: AtomicBool::new(false),
            refuse_stop: self.refuse_stop,
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(SessionChannel {
            session,
            events,
        })
    }
}
