//! Service-backed tasks.
//!
//! A [`ServiceTask`] delegates its work to the out-of-process worker: it
//! validates the item, opens a session, starts the request a
//! [`ServiceHandler`] builds, and pumps the session's events back through
//! the handler until the worker completes or finishes. Pause, unpause and
//! stop requests are forwarded to the session. A stop that cannot be
//! delivered (the worker is still starting, or its pipe is gone) is retried
//! by the event pump once the worker runs; if that fails too the session is
//! torn down. The session is destroyed exactly once, after its event stream
//! has ended.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use stagehand_core::{
    InstallRequest, ItemCatalog, ItemHandle, ItemId, SessionChannel, TaskError, TaskEvent,
    TaskResult, WorkerEvent, WorkerProgress, WorkerService, WorkerSession,
};
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::task::{TaskBody, TaskControl};

/// What to do with an error event from the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Recorded by the handler; the operation continues.
    Deferred,
    /// The operation has failed with this error.
    Fail(TaskError),
}

/// Domain-specific reactions of a [`ServiceTask`].
///
/// Methods run on the task's execution context, one event at a time.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Short name used in logs.
    fn stage_name(&self) -> &'static str;

    /// Update item state for the starting operation and build the request.
    fn prepare(&self, item: &dyn ItemHandle) -> InstallRequest;

    /// Apply a progress report; returns the progress to forward to listeners.
    fn on_progress(&self, item: &dyn ItemHandle, progress: WorkerProgress) -> WorkerProgress;

    /// Classify an error reported by the worker.
    fn on_error(&self, item: &dyn ItemHandle, error: TaskError) -> ErrorDisposition;

    /// The worker reported completion.
    fn on_complete(&self, item: &dyn ItemHandle, control: &TaskControl);
}

/// Collaborators shared by every service task.
#[derive(Clone)]
pub struct ServiceDeps {
    /// Item lookup.
    pub catalog: Arc<dyn ItemCatalog>,
    /// Worker endpoint.
    pub service: Arc<dyn WorkerService>,
}

impl std::fmt::Debug for ServiceDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDeps").finish_non_exhaustive()
    }
}

/// A task body backed by a worker session.
pub struct ServiceTask<H> {
    item_id: ItemId,
    deps: ServiceDeps,
    handler: H,
    session: Mutex<Option<Arc<dyn WorkerSession>>>,
    stop_delivered: AsyncMutex<bool>,
}

impl<H: ServiceHandler> std::fmt::Debug for ServiceTask<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTask")
            .field("item", &self.item_id)
            .field("stage", &self.handler.stage_name())
            .finish_non_exhaustive()
    }
}

/// How the event stream of a session ended.
enum StreamEnd {
    Completed,
    Finished,
    Disconnected,
    /// A stop could not be delivered; the worker is torn down instead.
    Abandoned,
}

impl<H: ServiceHandler> ServiceTask<H> {
    /// Create a body operating on `item_id`.
    pub fn new(item_id: ItemId, deps: ServiceDeps, handler: H) -> Self {
        Self {
            item_id,
            deps,
            handler,
            session: Mutex::new(None),
            stop_delivered: AsyncMutex::new(false),
        }
    }

    /// The item this task operates on.
    pub const fn item_id(&self) -> ItemId {
        self.item_id
    }

    /// The domain handler.
    pub const fn handler(&self) -> &H {
        &self.handler
    }

    /// Validate preconditions and open a worker session.
    ///
    /// Checks run in order: the item exists, the worker is running; then
    /// stray processes of the item are killed and a session is created.
    async fn init_service(
        &self,
    ) -> TaskResult<(Arc<dyn ItemHandle>, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let item = self
            .deps
            .catalog
            .item(self.item_id)
            .ok_or(TaskError::BadItem { id: self.item_id })?;

        if !self.deps.service.is_running() {
            return Err(TaskError::ServiceUnavailable);
        }

        self.deps.catalog.kill_all_processes(self.item_id);

        let SessionChannel { session, events } = self
            .deps
            .service
            .open_install_session()
            .await
            .map_err(|e| match e {
                TaskError::SessionCreateFailed { .. } => e,
                other => TaskError::session_create_failed(other.to_string()),
            })?;

        *self.session_slot() = Some(session);
        Ok((item, events))
    }

    /// Send `stop` to the worker unless it already accepted one.
    async fn deliver_stop(&self, session: &dyn WorkerSession) -> TaskResult<()> {
        let mut delivered = self.stop_delivered.lock().await;
        if !*delivered {
            session.stop().await?;
            *delivered = true;
        }
        Ok(())
    }

    async fn pump(
        &self,
        item: &dyn ItemHandle,
        session: &dyn WorkerSession,
        control: &TaskControl,
        events: &mut mpsc::UnboundedReceiver<WorkerEvent>,
        failure: &mut Option<TaskError>,
    ) -> StreamEnd {
        let mut stop_seen = false;
        loop {
            let event = tokio::select! {
                biased;
                () = control.cancel_token().cancelled(), if !stop_seen => {
                    stop_seen = true;
                    if let Err(e) = self.deliver_stop(session).await {
                        tracing::warn!(target: "stagehand.task", item = %self.item_id, error = %e, "Worker did not accept stop, tearing down");
                        return StreamEnd::Abandoned;
                    }
                    continue;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return StreamEnd::Disconnected;
            };
            match event {
                WorkerEvent::Progress(progress) => {
                    let forwarded = self.handler.on_progress(item, progress);
                    control.emit(TaskEvent::progress(
                        control.id(),
                        u64::from(forwarded.percent),
                        100,
                    ));
                }
                WorkerEvent::Error(error) => {
                    if let ErrorDisposition::Fail(error) = self.handler.on_error(item, error) {
                        failure.get_or_insert(error);
                    }
                }
                WorkerEvent::Complete => {
                    self.handler.on_complete(item, control);
                    return StreamEnd::Completed;
                }
                WorkerEvent::Finish => return StreamEnd::Finished,
            }
        }
    }

    async fn destroy_session(&self) {
        let session = self.session_slot().take();
        if let Some(session) = session {
            session.destroy().await;
            tracing::debug!(target: "stagehand.task", item = %self.item_id, stage = self.handler.stage_name(), "Worker session destroyed");
        }
    }

    fn current_session(&self) -> Option<Arc<dyn WorkerSession>> {
        self.session_slot().clone()
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<Arc<dyn WorkerSession>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<H: ServiceHandler> TaskBody for ServiceTask<H> {
    async fn run(&self, control: &TaskControl) -> TaskResult<()> {
        let (item, mut events) = self.init_service().await?;

        // A stop that raced session creation found no session to forward to
        if control.is_stopped() {
            self.destroy_session().await;
            return Err(TaskError::UserCanceled);
        }

        let Some(session) = self.current_session() else {
            return Err(TaskError::session_create_failed("session released during start"));
        };

        let request = self.handler.prepare(item.as_ref());
        tracing::info!(
            target: "stagehand.task",
            item = %self.item_id,
            stage = self.handler.stage_name(),
            workers = request.workers,
            "Starting worker operation"
        );

        if let Err(e) = session.start(&request).await {
            self.destroy_session().await;
            return Err(e);
        }
        if control.is_paused() {
            if let Err(e) = session.pause().await {
                tracing::warn!(target: "stagehand.task", item = %self.item_id, error = %e, "Failed to pause worker");
            }
        }

        let mut failure = None;
        let end = self
            .pump(
                item.as_ref(),
                session.as_ref(),
                control,
                &mut events,
                &mut failure,
            )
            .await;
        drop(events);
        drop(session);
        self.destroy_session().await;

        match (end, failure) {
            (_, Some(error)) => Err(error),
            (StreamEnd::Completed, None) => Ok(()),
            _ if control.is_stopped() => Err(TaskError::UserCanceled),
            (StreamEnd::Finished, None) => Err(TaskError::worker(
                "incomplete",
                "worker finished without completing",
            )),
            (StreamEnd::Disconnected | StreamEnd::Abandoned, None) => Err(TaskError::worker(
                "disconnected",
                "worker event stream closed unexpectedly",
            )),
        }
    }

    async fn on_pause(&self) {
        if let Some(session) = self.current_session() {
            if let Err(e) = session.pause().await {
                tracing::warn!(target: "stagehand.task", item = %self.item_id, error = %e, "Failed to pause worker");
            }
        }
    }

    async fn on_unpause(&self) {
        if let Some(session) = self.current_session() {
            if let Err(e) = session.unpause().await {
                tracing::warn!(target: "stagehand.task", item = %self.item_id, error = %e, "Failed to resume worker");
            }
        }
    }

    async fn on_stop(&self) {
        if let Some(session) = self.current_session() {
            if let Err(e) = self.deliver_stop(session.as_ref()).await {
                // The event pump retries once the worker is running
                tracing::debug!(target: "stagehand.task", item = %self.item_id, error = %e, "Stop not delivered yet");
            }
        }
    }
}
