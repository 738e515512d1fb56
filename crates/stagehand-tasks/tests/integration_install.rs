//! Integration tests for install tasks.
//!
//! Drives complete install tasks against a scripted worker and an in-memory
//! catalog, asserting on item state, emitted events and session handling.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::drain;
use common::worker::{FakeWorkerService, SessionCall, StartGate};
use stagehand_core::ports::MockVerifyDecider;
use stagehand_core::settings::WORKER_COUNT_KEY;
use stagehand_core::{
    Branch, Build, ChannelTaskEmitter, EngineSettings, ItemHandle, ItemId, ItemOptions, ItemStatus,
    MapConfig, MemoryCatalog, MemoryItem, StageCall, TaskError, TaskEvent, TaskState,
    VerifyTarget, WorkerEvent, WorkerProgress,
};
use stagehand_tasks::{InstallDeps, InstallJob, InstallTask, ServiceDeps, build_install_task};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

const ITEM: ItemId = ItemId(440);

struct Harness {
    catalog: Arc<MemoryCatalog>,
    worker: Arc<FakeWorkerService>,
    events: mpsc::UnboundedReceiver<TaskEvent>,
    deps: InstallDeps,
}

impl Harness {
    fn new(worker: FakeWorkerService) -> Self {
        Self::with_settings(worker, EngineSettings::default())
    }

    fn with_settings(worker: FakeWorkerService, settings: EngineSettings) -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        let worker = Arc::new(worker);
        let (emitter, events) = ChannelTaskEmitter::new();
        let deps = InstallDeps::new(
            ServiceDeps {
                catalog: Arc::clone(&catalog) as _,
                service: Arc::clone(&worker) as _,
            },
            Arc::new(emitter),
            settings,
        );
        Self {
            catalog,
            worker,
            events,
            deps,
        }
    }

    fn task(&self, build: Option<Build>) -> InstallTask {
        build_install_task(
            self.deps.clone(),
            InstallJob {
                item: ITEM,
                source: PathBuf::from("/cache/440.pkg"),
                build,
            },
        )
    }

    fn completions(&mut self) -> Vec<bool> {
        drain(&mut self.events)
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Completed {
                    had_hash_mismatch, ..
                } => Some(had_hash_mismatch),
                _ => None,
            })
            .collect()
    }
}

fn happy_script() -> Vec<WorkerEvent> {
    vec![
        WorkerEvent::Progress(WorkerProgress::install(30)),
        WorkerEvent::Progress(WorkerProgress::install(100)),
        WorkerEvent::Complete,
        WorkerEvent::Finish,
    ]
}

fn item() -> MemoryItem {
    MemoryItem::new(ITEM, "/games/440").with_status(ItemStatus::DOWNLOADING | ItemStatus::READY)
}

#[tokio::test]
async fn test_install_completes_normally() {
    let mut harness = Harness::new(FakeWorkerService::with_script(happy_script()));
    let item = harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Finished);

    assert_eq!(item.status(), ItemStatus::INSTALLED | ItemStatus::READY);
    assert_eq!(item.percent(), 100);
    assert_eq!(item.stage_calls(), vec![StageCall::Completed]);
    assert_eq!(harness.catalog.killed(), vec![ITEM]);

    let events = drain(&mut harness.events);
    assert!(matches!(
        events.last(),
        Some(TaskEvent::Completed {
            had_hash_mismatch: false,
            ..
        })
    ));
    assert!(events.iter().any(|e| matches!(e, TaskEvent::Progress { percent: 100, .. })));

    let session = harness.worker.session();
    assert_eq!(session.destroy_count(), 1);
    assert_eq!(session.calls().last(), Some(&SessionCall::Destroy));
}

#[tokio::test]
async fn test_install_request_contents() {
    let harness = Harness::new(FakeWorkerService::with_script(happy_script()));
    harness.catalog.insert(
        item()
            .with_options(ItemOptions::REMOVE_FILES)
            .with_install_script("/games/440/install.vdf"),
    );

    let task = harness.task(None);
    assert_ok!(task.start());
    task.wait_for_finish().await;

    let request = harness.worker.session().request().expect("session started");
    assert_eq!(request.source, PathBuf::from("/cache/440.pkg"));
    assert_eq!(request.destination, PathBuf::from("/games/440"));
    assert_eq!(request.script, Some(PathBuf::from("/games/440/install.vdf")));
    assert!(request.remove_existing);
}

#[tokio::test]
async fn test_zero_worker_count_requests_one_worker() {
    let settings = EngineSettings::from_source(&MapConfig::new().with(WORKER_COUNT_KEY, "0"));
    let harness = Harness::with_settings(FakeWorkerService::with_script(happy_script()), settings);
    harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    task.wait_for_finish().await;

    assert_eq!(harness.worker.session().request().unwrap().workers, 1);
}

#[tokio::test]
async fn test_hash_mismatches_consult_decider_once() {
    let mut decider = MockVerifyDecider::new();
    decider
        .expect_verify_after_hash_fail()
        .times(1)
        .return_const(true);

    let script = vec![
        WorkerEvent::Progress(WorkerProgress::install(20)),
        WorkerEvent::Error(TaskError::hash_mismatch("chunk 1")),
        WorkerEvent::Error(TaskError::hash_mismatch("chunk 2")),
        WorkerEvent::Error(TaskError::hash_mismatch("chunk 9")),
        WorkerEvent::Complete,
        WorkerEvent::Finish,
    ];
    let mut harness = Harness::new(FakeWorkerService::with_script(script));
    harness.deps = harness.deps.clone().with_verify(Arc::new(decider));
    let item = harness
        .catalog
        .insert(item().with_installed(Branch(3), Build(77)));

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Finished);

    assert_eq!(harness.completions(), vec![true]);
    assert_eq!(
        item.stage_calls(),
        vec![StageCall::Verify(VerifyTarget::full(Branch(3), Build(77)))]
    );
    assert!(item.status().contains(ItemStatus::VERIFYING));
    assert_eq!(task.body().handler().hash_mismatches(), 3);
}

#[tokio::test]
async fn test_hash_mismatch_without_decider_completes_stage() {
    let script = vec![
        WorkerEvent::Error(TaskError::hash_mismatch("chunk 1")),
        WorkerEvent::Complete,
        WorkerEvent::Finish,
    ];
    let mut harness = Harness::new(FakeWorkerService::with_script(script));
    let item = harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Finished);

    assert_eq!(harness.completions(), vec![true]);
    assert_eq!(item.stage_calls(), vec![StageCall::Completed]);
}

#[tokio::test]
async fn test_worker_error_resets_stage() {
    let script = vec![
        WorkerEvent::Progress(WorkerProgress::install(10)),
        WorkerEvent::Error(TaskError::worker("disk_full", "no space left")),
        WorkerEvent::Complete,
        WorkerEvent::Finish,
    ];
    let mut harness = Harness::new(FakeWorkerService::with_script(script));
    let item = harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Error);

    assert_eq!(
        task.error(),
        Some(TaskError::worker("disk_full", "no space left"))
    );
    assert!(!item.status().intersects(ItemStatus::TRANSIENT | ItemStatus::PAUSABLE));
    assert!(!item.status().contains(ItemStatus::INSTALLED));
    assert_eq!(item.stage_calls(), vec![StageCall::Reset { to_start: true }]);
    assert!(harness.completions().is_empty());
    assert_eq!(harness.worker.session().destroy_count(), 1);
}

#[tokio::test]
async fn test_worker_error_pauses_item_with_pause_on_error() {
    let script = vec![
        WorkerEvent::Progress(WorkerProgress::install(10)),
        WorkerEvent::Error(TaskError::worker("disk_full", "no space left")),
        WorkerEvent::Finish,
    ];
    let mut harness = Harness::new(FakeWorkerService::with_script(script));
    let item = harness
        .catalog
        .insert(item().with_options(ItemOptions::PAUSE_ON_ERROR));

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Error);

    assert!(item.is_paused());
    assert_eq!(
        item.status(),
        ItemStatus::INSTALLING | ItemStatus::PAUSABLE
    );
    assert_eq!(
        item.stage_calls(),
        vec![StageCall::Paused {
            paused: true,
            pausable: true
        }]
    );
    assert!(harness.completions().is_empty());
}

#[tokio::test]
async fn test_update_install_finishes_update() {
    let script = vec![
        WorkerEvent::Progress(WorkerProgress::install(40)),
        WorkerEvent::Complete,
        WorkerEvent::Finish,
    ];
    let mut harness = Harness::new(FakeWorkerService::with_script(script));
    let item = harness
        .catalog
        .insert(MemoryItem::new(ITEM, "/games/440").with_pending_update(Build(12)));
    item.set_percent(50);

    let task = harness.task(Some(Build(12)));
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Finished);

    assert_eq!(
        item.status(),
        ItemStatus::INSTALLED | ItemStatus::READY | ItemStatus::NEEDCLEANUP
    );
    assert_eq!(item.installed_build(), Build(12));
    assert_eq!(
        item.stage_calls(),
        vec![StageCall::Updated, StageCall::Completed]
    );

    let events = drain(&mut harness.events);
    assert!(events.iter().any(|e| matches!(e, TaskEvent::Progress { percent: 70, .. })));
}

#[tokio::test]
async fn test_missing_item_is_bad_item() {
    let harness = Harness::new(FakeWorkerService::with_script(happy_script()));

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Error);

    assert_eq!(task.error(), Some(TaskError::BadItem { id: ITEM }));
    assert!(harness.worker.sessions().is_empty());
}

#[tokio::test]
async fn test_stopped_service_is_unavailable() {
    let harness = Harness::new(FakeWorkerService::not_running());
    harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Error);

    assert_eq!(task.error(), Some(TaskError::ServiceUnavailable));
    assert!(harness.catalog.killed().is_empty());
}

#[tokio::test]
async fn test_refused_session_fails_task() {
    let harness = Harness::new(FakeWorkerService::refusing_sessions());
    let item = harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Error);

    assert!(matches!(
        task.error(),
        Some(TaskError::SessionCreateFailed { .. })
    ));
    assert_eq!(harness.catalog.killed(), vec![ITEM]);
    assert_eq!(item.status(), ItemStatus::DOWNLOADING | ItemStatus::READY);
}

#[tokio::test]
async fn test_pause_and_stop_forwarded_to_session() {
    let script = vec![WorkerEvent::Progress(WorkerProgress::install(10))];
    let mut harness = Harness::new(FakeWorkerService::with_script(script));
    harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());

    // Wait until the worker is producing progress
    let first = harness.events.recv().await;
    assert!(matches!(first, Some(TaskEvent::Progress { percent: 10, .. })));

    assert_ok!(task.pause().await);
    assert_ok!(task.unpause().await);
    assert_ok!(task.stop().await);
    assert_eq!(task.wait_for_finish().await, TaskState::Stopped);
    assert_eq!(task.error(), Some(TaskError::UserCanceled));

    let session = harness.worker.session();
    let calls = session.calls();
    assert!(matches!(calls.first(), Some(SessionCall::Start(_))));
    assert_eq!(
        &calls[1..],
        &[
            SessionCall::Pause,
            SessionCall::Unpause,
            SessionCall::Stop,
            SessionCall::Destroy
        ]
    );

    let events = drain(&mut harness.events);
    assert!(matches!(events.last(), Some(TaskEvent::Cancelled { .. })));
}

#[tokio::test]
async fn test_worker_disconnect_fails_task() {
    let script = vec![WorkerEvent::Progress(WorkerProgress::install(10))];
    let mut harness = Harness::new(FakeWorkerService::with_script(script));
    harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    harness.events.recv().await;

    // Dropping the sender closes the event stream
    harness.worker.session().close_events();
    assert_eq!(task.wait_for_finish().await, TaskState::Error);
    assert!(matches!(task.error(), Some(TaskError::Worker { .. })));
}

#[tokio::test]
async fn test_worker_finish_without_complete_fails_task() {
    let script = vec![
        WorkerEvent::Progress(WorkerProgress::install(60)),
        WorkerEvent::Finish,
    ];
    let mut harness = Harness::new(FakeWorkerService::with_script(script));
    let item = harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    assert_eq!(task.wait_for_finish().await, TaskState::Error);

    assert_eq!(
        task.error(),
        Some(TaskError::worker("incomplete", "worker finished without completing"))
    );
    assert!(!item.status().contains(ItemStatus::INSTALLED));
    assert!(harness.completions().is_empty());
    assert_eq!(harness.worker.session().destroy_count(), 1);
}

#[tokio::test]
async fn test_stop_during_worker_start_is_delivered_after_start() {
    let gate = Arc::new(StartGate::default());
    let script = vec![WorkerEvent::Progress(WorkerProgress::install(10))];
    let harness = Harness::new(
        FakeWorkerService::with_script(script).with_start_gate(Arc::clone(&gate)),
    );
    let item = harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    gate.entered.notified().await;

    // The worker refuses the stop while it is still starting
    assert_ok!(task.stop().await);
    gate.release.notify_one();

    let state = timeout(Duration::from_secs(5), task.wait_for_finish())
        .await
        .expect("stop was not delivered to the worker");
    assert_eq!(state, TaskState::Stopped);
    assert_eq!(task.error(), Some(TaskError::UserCanceled));
    assert!(!item.status().contains(ItemStatus::INSTALLED));

    let calls = harness.worker.session().calls();
    assert!(matches!(calls.first(), Some(SessionCall::Start(_))));
    assert_eq!(&calls[1..], &[SessionCall::Stop, SessionCall::Destroy]);
}

#[tokio::test]
async fn test_undeliverable_stop_tears_down_session() {
    let script = vec![WorkerEvent::Progress(WorkerProgress::install(10))];
    let mut harness = Harness::new(FakeWorkerService::with_script(script).refusing_stop());
    harness.catalog.insert(item());

    let task = harness.task(None);
    assert_ok!(task.start());
    harness.events.recv().await;

    assert_ok!(task.stop().await);
    let state = timeout(Duration::from_secs(5), task.wait_for_finish())
        .await
        .expect("task kept waiting on an unresponsive worker");
    assert_eq!(state, TaskState::Stopped);

    let session = harness.worker.session();
    assert_eq!(session.destroy_count(), 1);
    assert!(!session.calls().contains(&SessionCall::Stop));

    let events = drain(&mut harness.events);
    assert!(matches!(events.last(), Some(TaskEvent::Cancelled { .. })));
}
