//! Task lifecycle.
//!
//! A [`Task`] owns one unit of asynchronous work (a [`TaskBody`]) and drives
//! it through a small state machine:
//!
//! ```text
//! Idle ──start──▶ Running ◀──unpause/pause──▶ Paused
//!   │                │                          │
//!   └──stop──▶ Stopped ◀───────stop─────────────┘
//!                    │
//!          body ends ▼
//!           Finished | Error | Stopped
//! ```
//!
//! Terminal states are sticky. State changes go through a `watch` channel so
//! `wait_for_finish` can block without polling.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::FutureExt;
use stagehand_core::{TaskError, TaskEvent, TaskEventEmitterPort, TaskId, TaskResult, TaskState};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The work a [`Task`] runs, plus hooks for lifecycle requests.
///
/// Hooks are invoked from the caller's context while `run` is in flight;
/// implementations forward them to whatever performs the work.
#[async_trait]
pub trait TaskBody: Send + Sync + 'static {
    /// Perform the work.
    ///
    /// Return `Err(TaskError::UserCanceled)` when stopping early because
    /// the control reported a stop.
    async fn run(&self, control: &TaskControl) -> TaskResult<()>;

    /// The task was paused.
    async fn on_pause(&self) {}

    /// The task was resumed.
    async fn on_unpause(&self) {}

    /// A stop was requested. Called once.
    async fn on_stop(&self) {}
}

/// What a running body sees of its task.
#[derive(Clone)]
pub struct TaskControl {
    id: TaskId,
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
    emitter: Arc<dyn TaskEventEmitterPort>,
}

impl std::fmt::Debug for TaskControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskControl")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

impl TaskControl {
    /// A control not attached to any task.
    #[cfg(test)]
    pub(crate) fn detached(emitter: Arc<dyn TaskEventEmitterPort>) -> Self {
        let (_, paused) = watch::channel(false);
        Self {
            id: TaskId::new(),
            cancel: CancellationToken::new(),
            paused,
            emitter,
        }
    }

    /// The owning task's id.
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when a stop is requested.
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the task is currently paused.
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Fail with `UserCanceled` if a stop has been requested.
    pub fn checkpoint(&self) -> TaskResult<()> {
        if self.is_stopped() {
            return Err(TaskError::UserCanceled);
        }
        Ok(())
    }

    /// Wait until the task is not paused. Fails if stopped meanwhile.
    pub async fn wait_while_paused(&self) -> TaskResult<()> {
        let mut paused = self.paused.clone();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(TaskError::UserCanceled),
            result = paused.wait_for(|p| !*p) => {
                // Sender lives as long as the task
                let _ = result;
                self.checkpoint()
            }
        }
    }

    /// Report an event for this task.
    pub fn emit(&self, event: TaskEvent) {
        self.emitter.emit(event);
    }
}

struct TaskInner<B> {
    id: TaskId,
    name: String,
    body: B,
    state: watch::Sender<TaskState>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    started: AtomicBool,
    error: Mutex<Option<TaskError>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    emitter: Arc<dyn TaskEventEmitterPort>,
}

/// A unit of asynchronous work with observable state.
///
/// Clones share the same task; the spawned execution holds one too.
pub struct Task<B: TaskBody> {
    inner: Arc<TaskInner<B>>,
}

impl<B: TaskBody> Clone for Task<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: TaskBody> std::fmt::Debug for Task<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<B: TaskBody> Task<B> {
    /// Create an idle task around `body`.
    pub fn new(
        name: impl Into<String>,
        body: B,
        emitter: Arc<dyn TaskEventEmitterPort>,
    ) -> Self {
        let (state, _) = watch::channel(TaskState::Idle);
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                name: name.into(),
                body,
                state,
                paused,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                error: Mutex::new(None),
                handle: Mutex::new(None),
                emitter,
            }),
        }
    }

    /// Unique task id.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Human-readable task name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        *self.inner.state.borrow()
    }

    /// Whether `start` has been called successfully.
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// Error recorded when the task ended in `Error` or `Stopped`.
    pub fn error(&self) -> Option<TaskError> {
        self.inner.error_slot().clone()
    }

    /// The body this task runs.
    pub fn body(&self) -> &B {
        &self.inner.body
    }

    /// Begin execution. Valid only from `Idle`.
    pub fn start(&self) -> TaskResult<()> {
        let mut rejected = None;
        self.inner.state.send_if_modified(|state| {
            if *state == TaskState::Idle {
                *state = TaskState::Running;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(TaskError::invalid_state(state, "start"));
        }

        self.inner.started.store(true, Ordering::Release);
        tracing::debug!(target: "stagehand.task", task = %self.inner.id, name = %self.inner.name, "Task started");

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.execute().await });
        *self.inner.handle_slot() = Some(handle);
        Ok(())
    }

    /// Suspend a running task. Pausing a paused task is a no-op.
    pub async fn pause(&self) -> TaskResult<()> {
        let mut rejected = None;
        let changed = self.inner.state.send_if_modified(|state| match *state {
            TaskState::Running => {
                *state = TaskState::Paused;
                true
            }
            TaskState::Paused => false,
            other => {
                rejected = Some(other);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(TaskError::invalid_state(state, "pause"));
        }
        if changed {
            tracing::debug!(target: "stagehand.task", task = %self.inner.id, "Task paused");
            self.inner.paused.send_replace(true);
            self.inner.body.on_pause().await;
        }
        Ok(())
    }

    /// Resume a paused task. Unpausing a running task is a no-op.
    pub async fn unpause(&self) -> TaskResult<()> {
        let mut rejected = None;
        let changed = self.inner.state.send_if_modified(|state| match *state {
            TaskState::Paused => {
                *state = TaskState::Running;
                true
            }
            TaskState::Running => false,
            other => {
                rejected = Some(other);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(TaskError::invalid_state(state, "unpause"));
        }
        if changed {
            tracing::debug!(target: "stagehand.task", task = %self.inner.id, "Task resumed");
            self.inner.paused.send_replace(false);
            self.inner.body.on_unpause().await;
        }
        Ok(())
    }

    /// Request cooperative cancellation.
    ///
    /// An idle task moves to `Stopped` immediately. A running or paused task
    /// moves there once its body observes the request.
    pub async fn stop(&self) -> TaskResult<()> {
        let mut stopped_idle = false;
        let mut rejected = None;
        self.inner.state.send_if_modified(|state| match *state {
            TaskState::Idle => {
                *state = TaskState::Stopped;
                stopped_idle = true;
                true
            }
            other if other.is_terminal() => {
                rejected = Some(other);
                false
            }
            _ => false,
        });
        if let Some(state) = rejected {
            return Err(TaskError::invalid_state(state, "stop"));
        }

        let first_request = !self.inner.cancel.is_cancelled();
        self.inner.cancel.cancel();

        if stopped_idle {
            *self.inner.error_slot() = Some(TaskError::UserCanceled);
            self.inner.emitter.emit(TaskEvent::Cancelled {
                task_id: self.inner.id,
            });
            tracing::debug!(target: "stagehand.task", task = %self.inner.id, "Idle task stopped");
            return Ok(());
        }

        if first_request {
            tracing::debug!(target: "stagehand.task", task = %self.inner.id, "Stop requested");
            // Wake a paused body so it can observe the stop
            self.inner.paused.send_replace(false);
            self.inner.body.on_stop().await;
        }
        Ok(())
    }

    /// Wait until the task reaches a terminal state and return it.
    ///
    /// Returns immediately for a task that was never started.
    pub async fn wait_for_finish(&self) -> TaskState {
        if self.state() == TaskState::Idle {
            return TaskState::Idle;
        }

        let mut rx = self.inner.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };

        let handle = self.inner.handle_slot().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(target: "stagehand.task", task = %self.inner.id, error = %e, "Task join failed");
            }
        }
        state
    }
}

impl<B: TaskBody> TaskInner<B> {
    async fn execute(&self) {
        let control = TaskControl {
            id: self.id,
            cancel: self.cancel.clone(),
            paused: self.paused.subscribe(),
            emitter: Arc::clone(&self.emitter),
        };

        let result = match AssertUnwindSafe(self.body.run(&control)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(TaskError::worker("panic", format!("task {} panicked", self.name))),
        };

        let terminal = match &result {
            Ok(()) => TaskState::Finished,
            Err(e) if e.is_cancelled() => TaskState::Stopped,
            Err(_) => TaskState::Error,
        };

        if let Err(e) = result {
            if e.is_cancelled() {
                tracing::info!(target: "stagehand.task", task = %self.id, name = %self.name, "Task stopped");
            } else {
                tracing::warn!(target: "stagehand.task", task = %self.id, name = %self.name, error = %e, "Task failed");
            }
            self.emitter.emit(TaskEvent::from_error(self.id, &e));
            *self.error_slot() = Some(e);
        } else {
            tracing::debug!(target: "stagehand.task", task = %self.id, name = %self.name, "Task finished");
        }

        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = terminal;
                true
            }
        });
    }

    fn error_slot(&self) -> MutexGuard<'_, Option<TaskError>> {
        self.error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use stagehand_core::{ChannelTaskEmitter, NoopTaskEmitter};

    use super::*;

    /// Body that runs until stopped, counting hook invocations.
    #[derive(Default)]
    struct Sleeper {
        pauses: AtomicUsize,
        unpauses: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl TaskBody for Sleeper {
        async fn run(&self, control: &TaskControl) -> TaskResult<()> {
            control.cancel_token().cancelled().await;
            Err(TaskError::UserCanceled)
        }

        async fn on_pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_unpause(&self) {
            self.unpauses.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Outcome(TaskResult<()>);

    #[async_trait]
    impl TaskBody for Outcome {
        async fn run(&self, _control: &TaskControl) -> TaskResult<()> {
            self.0.clone()
        }
    }

    struct Panics;

    #[async_trait]
    impl TaskBody for Panics {
        async fn run(&self, _control: &TaskControl) -> TaskResult<()> {
            panic!("boom")
        }
    }

    fn task<B: TaskBody>(body: B) -> Task<B> {
        Task::new("test", body, Arc::new(NoopTaskEmitter))
    }

    #[tokio::test]
    async fn test_successful_body_finishes() {
        let task = task(Outcome(Ok(())));
        assert!(!task.is_started());
        task.start().unwrap();
        assert_eq!(task.wait_for_finish().await, TaskState::Finished);
        assert!(task.is_started());
        assert!(task.error().is_none());
    }

    #[tokio::test]
    async fn test_failing_body_records_error() {
        let (emitter, mut rx) = ChannelTaskEmitter::new();
        let task = Task::new(
            "test",
            Outcome(Err(TaskError::ServiceUnavailable)),
            Arc::new(emitter),
        );
        task.start().unwrap();

        assert_eq!(task.wait_for_finish().await, TaskState::Error);
        assert_eq!(task.error(), Some(TaskError::ServiceUnavailable));
        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_panicking_body_ends_in_error() {
        let task = task(Panics);
        task.start().unwrap();
        assert_eq!(task.wait_for_finish().await, TaskState::Error);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let task = task(Sleeper::default());
        task.start().unwrap();
        let err = task.start().unwrap_err();
        assert_eq!(
            err,
            TaskError::invalid_state(TaskState::Running, "start")
        );
        task.stop().await.unwrap();
        task.wait_for_finish().await;
    }

    #[tokio::test]
    async fn test_pause_unpause_stop_cycle() {
        let task = task(Sleeper::default());
        task.start().unwrap();

        task.pause().await.unwrap();
        task.pause().await.unwrap();
        assert_eq!(task.state(), TaskState::Paused);

        task.unpause().await.unwrap();
        assert_eq!(task.state(), TaskState::Running);

        task.stop().await.unwrap();
        task.stop().await.unwrap();
        assert_eq!(task.wait_for_finish().await, TaskState::Stopped);

        let body = task.body();
        assert_eq!(body.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(body.unpauses.load(Ordering::SeqCst), 1);
        assert_eq!(body.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_while_paused() {
        let task = task(Sleeper::default());
        task.start().unwrap();
        task.pause().await.unwrap();
        task.stop().await.unwrap();
        assert_eq!(task.wait_for_finish().await, TaskState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_idle_task() {
        let (emitter, mut rx) = ChannelTaskEmitter::new();
        let task = Task::new("test", Sleeper::default(), Arc::new(emitter));

        task.stop().await.unwrap();
        assert_eq!(task.state(), TaskState::Stopped);
        assert_eq!(task.error(), Some(TaskError::UserCanceled));
        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Cancelled { .. })));
        assert!(task.start().is_err());
        assert_eq!(task.body().stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminal_state_rejects_lifecycle_calls() {
        let task = task(Outcome(Ok(())));
        task.start().unwrap();
        task.wait_for_finish().await;

        assert!(task.pause().await.is_err());
        assert!(task.unpause().await.is_err());
        assert!(task.stop().await.is_err());
        assert_eq!(task.state(), TaskState::Finished);
    }

    #[tokio::test]
    async fn test_idle_task_rejects_pause() {
        let task = task(Sleeper::default());
        assert!(task.pause().await.is_err());
        assert!(task.unpause().await.is_err());
        assert_eq!(task.wait_for_finish().await, TaskState::Idle);
    }

    #[tokio::test]
    async fn test_wait_while_paused_observes_stop() {
        let (_paused_tx, paused) = watch::channel(true);
        let control = TaskControl {
            id: TaskId::new(),
            cancel: CancellationToken::new(),
            paused,
            emitter: Arc::new(NoopTaskEmitter),
        };

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        control.cancel_token().cancel();

        assert_eq!(waiter.await.unwrap(), Err(TaskError::UserCanceled));
    }
}
