//! End-to-end task lifecycle tests against `TaskService`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use taskgate_core::TaskService;
use taskgate_core::cancel::CancelOutcome;
use taskgate_core::config::Config;
use taskgate_core::executor::{Operation, OperationCatalog, OperationError, TaskContext};
use taskgate_core::persist::{DurableStore, FileStore, MemoryStore};
use taskgate_core::reporter::WaitCondition;
use taskgate_core::task::{
    FailureKind, InputKind, InputRequest, Task, TaskError, TaskId, TaskPhase, TaskSnapshot,
    TaskState,
};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Helpers
// ============================================================================

/// Completes as soon as `release` is notified.
struct GatedOperation {
    release: Arc<Notify>,
}

#[async_trait]
impl Operation for GatedOperation {
    async fn run(&self, _params: Value, ctx: &mut TaskContext) -> Result<Value, OperationError> {
        self.release.notified().await;
        ctx.checkpoint().await?;
        Ok(json!("done"))
    }
}

/// Asks for a name and keeps whatever answer reached it.
struct RecordingAsk {
    received: Arc<Mutex<Option<Value>>>,
}

#[async_trait]
impl Operation for RecordingAsk {
    async fn run(&self, _params: Value, ctx: &mut TaskContext) -> Result<Value, OperationError> {
        let value = ctx.ask(InputRequest::text("Name?")).await?;
        *self.received.lock().unwrap() = Some(value.clone());
        Ok(value)
    }
}

struct PanickingOperation;

#[async_trait]
impl Operation for PanickingOperation {
    async fn run(&self, _params: Value, ctx: &mut TaskContext) -> Result<Value, OperationError> {
        ctx.progress(0.5, "about to crash")?;
        panic!("boom");
    }
}

fn config() -> Config {
    Config::default()
}

fn service_with(config: &Config) -> Arc<TaskService> {
    let mut catalog = OperationCatalog::with_builtins();
    catalog.register("panic", PanickingOperation);
    TaskService::new(config, catalog, None)
}

fn service() -> Arc<TaskService> {
    service_with(&config())
}

async fn wait_for_idle_executors(service: &TaskService) {
    tokio::time::timeout(WAIT, async {
        while service.stats().running_executors > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("executors still running");
}

async fn wait_for(service: &TaskService, id: &TaskId, condition: WaitCondition) -> TaskSnapshot {
    service.wait(id, condition, WAIT).await.unwrap()
}

/// Echo task that keeps working for a long time.
fn long_echo() -> Value {
    json!({"steps": 10_000, "delayMs": 10})
}

fn assert_fields_match_state(snapshot: &TaskSnapshot) {
    match snapshot.state {
        TaskState::Completed => {
            assert!(snapshot.result.is_some());
            assert!(snapshot.error.is_none());
            assert!(snapshot.input_request.is_none());
        }
        TaskState::Failed => {
            assert!(snapshot.result.is_none());
            assert!(snapshot.error.is_some());
            assert!(snapshot.input_request.is_none());
        }
        TaskState::InputRequired => {
            assert!(snapshot.result.is_none());
            assert!(snapshot.error.is_none());
            assert!(snapshot.input_request.is_some());
        }
        TaskState::Pending | TaskState::Working | TaskState::Cancelled => {
            assert!(snapshot.result.is_none());
            assert!(snapshot.error.is_none());
            assert!(snapshot.input_request.is_none());
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn start_returns_pending_handle_immediately() {
    let service = service();
    let started = service
        .start("export", json!({"format": "csv"}))
        .unwrap();

    assert_eq!(started.state, TaskState::Pending);
    let status = service.get_status(&started.task_id).unwrap();
    assert!(matches!(
        status.state,
        TaskState::Pending | TaskState::Working
    ));
}

#[tokio::test]
async fn export_pauses_for_confirmation_and_resumes() {
    let service = service();
    let started = service
        .start("export", json!({"format": "csv", "stepDelayMs": 20}))
        .unwrap();
    let id = started.task_id;

    let paused = wait_for(&service, &id, WaitCondition::InputRequiredOrTerminal).await;
    assert_eq!(paused.state, TaskState::InputRequired);
    let request = paused.input_request.unwrap();
    assert_eq!(request.kind, InputKind::Choice);
    assert_eq!(request.message, "50000 records found, continue?");
    assert_eq!(
        request.options,
        Some(vec!["continue".to_string(), "cancel".to_string()])
    );

    let resumed = service.provide_input(&id, json!("continue")).await.unwrap();
    assert_eq!(resumed.state, TaskState::Working);

    let done = wait_for(&service, &id, WaitCondition::Terminal).await;
    assert_eq!(done.state, TaskState::Completed);
    assert_eq!(done.progress, 1.0);
    let result = done.result.unwrap();
    assert_eq!(result["format"], "csv");
    assert_eq!(result["records"], 50_000);
}

#[tokio::test]
async fn answering_cancel_cancels_export() {
    let service = service();
    let id = service
        .start("export", json!({"format": "json"}))
        .unwrap()
        .task_id;

    wait_for(&service, &id, WaitCondition::InputRequiredOrTerminal).await;
    service.provide_input(&id, json!("cancel")).await.unwrap();

    let done = wait_for(&service, &id, WaitCondition::Terminal).await;
    assert_eq!(done.state, TaskState::Cancelled);
}

#[tokio::test]
async fn cancel_working_task_is_final() {
    let service = service();
    let id = service.start("echo", long_echo()).unwrap().task_id;
    wait_for(&service, &id, WaitCondition::ChangedSince(1)).await;

    let outcome = service.cancel(&id).unwrap();
    assert!(matches!(outcome, CancelOutcome::Acknowledged(_)));
    assert_eq!(outcome.task().state(), TaskState::Cancelled);

    let first = service.get_status(&id).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = service.get_status(&id).unwrap();
    assert_eq!(later.state, TaskState::Cancelled);
    assert_eq!(later, first);
}

#[tokio::test]
async fn cancel_completed_task_reports_already_terminal() {
    let service = service();
    let id = service.start("echo", json!({"value": 42})).unwrap().task_id;
    let done = wait_for(&service, &id, WaitCondition::Terminal).await;
    assert_eq!(done.state, TaskState::Completed);

    let outcome = service.cancel(&id).unwrap();
    assert!(matches!(outcome, CancelOutcome::AlreadyTerminal(_)));

    let status = service.get_status(&id).unwrap();
    assert_eq!(status.state, TaskState::Completed);
    assert_eq!(status.result, Some(json!({"value": 42})));
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let service = service();
    let id = TaskId::from_raw("unknown-id");

    assert!(matches!(
        service.get_status(&id),
        Err(TaskError::NotFound { .. })
    ));
    assert!(matches!(service.cancel(&id), Err(TaskError::NotFound { .. })));
    assert!(matches!(
        service.provide_input(&id, json!("x")).await,
        Err(TaskError::NotFound { .. })
    ));
}

#[tokio::test]
async fn input_to_working_task_is_not_waiting() {
    let service = service();
    let id = service.start("echo", long_echo()).unwrap().task_id;
    wait_for(&service, &id, WaitCondition::ChangedSince(1)).await;

    let err = service.provide_input(&id, json!("x")).await.unwrap_err();
    assert_eq!(
        err,
        TaskError::NotWaiting {
            task_id: id.clone(),
            state: TaskState::Working
        }
    );
    assert_eq!(service.get_status(&id).unwrap().state, TaskState::Working);
    service.cancel(&id).unwrap();
}

#[tokio::test]
async fn cancel_while_input_required_unblocks_executor() {
    let service = service();
    let id = service
        .start(
            "echo",
            json!({"value": 1, "ask": {"kind": "choice", "message": "Which?", "options": ["a", "b"]}}),
        )
        .unwrap()
        .task_id;
    let paused = wait_for(&service, &id, WaitCondition::InputRequiredOrTerminal).await;
    assert_eq!(paused.state, TaskState::InputRequired);

    let outcome = service.cancel(&id).unwrap();
    assert!(matches!(outcome, CancelOutcome::Acknowledged(_)));
    assert_eq!(outcome.task().state(), TaskState::Cancelled);
    assert!(outcome.task().input_request().is_none());

    let err = service.provide_input(&id, json!("a")).await.unwrap_err();
    assert_eq!(
        err,
        TaskError::NotWaiting {
            task_id: id.clone(),
            state: TaskState::Cancelled
        }
    );

    // The waiting executor exits without touching the record
    wait_for_idle_executors(&service).await;
    let done = service.get_status(&id).unwrap();
    assert_eq!(done.state, TaskState::Cancelled);
    assert_fields_match_state(&done);
    assert!(matches!(
        service.provide_input(&id, json!("b")).await,
        Err(TaskError::NotWaiting { .. })
    ));
}

#[tokio::test]
async fn finished_executors_are_not_counted_as_running() {
    let service = service();
    let long = service.start("echo", long_echo()).unwrap().task_id;
    let quick = service.start("echo", json!({"value": 7})).unwrap().task_id;
    wait_for(&service, &long, WaitCondition::ChangedSince(1)).await;
    wait_for(&service, &quick, WaitCondition::Terminal).await;

    tokio::time::timeout(WAIT, async {
        while service.stats().running_executors != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("finished executor still counted");

    service.cancel(&long).unwrap();
    wait_for_idle_executors(&service).await;
    let stats = service.stats();
    assert_eq!(stats.active_tasks, 0);
    assert_eq!(stats.total_tasks, 2);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn input_is_one_shot() {
    let service = service();
    let id = service
        .start(
            "echo",
            json!({"ask": {"kind": "confirmation", "message": "Proceed?"}, "steps": 0}),
        )
        .unwrap()
        .task_id;
    wait_for(&service, &id, WaitCondition::InputRequiredOrTerminal).await;

    service.provide_input(&id, json!(true)).await.unwrap();
    let err = service.provide_input(&id, json!(false)).await.unwrap_err();
    assert!(matches!(err, TaskError::NotWaiting { .. }));

    let done = wait_for(&service, &id, WaitCondition::Terminal).await;
    assert_eq!(done.result.unwrap()["input"], json!(true));
}

#[tokio::test]
async fn invalid_choice_leaves_task_waiting() {
    let service = service();
    let id = service.start("export", json!({"records": 10})).unwrap().task_id;

    let paused = wait_for(&service, &id, WaitCondition::InputRequiredOrTerminal).await;
    assert_eq!(paused.input_request.as_ref().unwrap().message, "Which format?");

    let err = service.provide_input(&id, json!("xml")).await.unwrap_err();
    assert!(matches!(err, TaskError::InvalidInput { .. }));
    assert_eq!(service.get_status(&id).unwrap(), paused);

    service.provide_input(&id, json!("json")).await.unwrap();
    let done = wait_for(&service, &id, WaitCondition::Terminal).await;
    assert_eq!(done.result.unwrap()["format"], "json");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_completion_race_resolves_to_one_winner() {
    for _ in 0..50 {
        let release = Arc::new(Notify::new());
        let mut catalog = OperationCatalog::new();
        catalog.register(
            "gated",
            GatedOperation {
                release: release.clone(),
            },
        );
        let service = TaskService::new(&config(), catalog, None);

        let id = service.start("gated", json!({})).unwrap().task_id;
        wait_for(&service, &id, WaitCondition::ChangedSince(1)).await;

        let canceller = {
            let service = service.clone();
            let id = id.clone();
            tokio::spawn(async move { service.cancel(&id) })
        };
        release.notify_one();
        canceller.await.unwrap().unwrap();

        let done = wait_for(&service, &id, WaitCondition::Terminal).await;
        assert!(matches!(
            done.state,
            TaskState::Cancelled | TaskState::Completed
        ));
        assert_fields_match_state(&done);

        // The loser never overwrites the winner
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(service.get_status(&id).unwrap(), done);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn input_racing_cancel_is_only_acknowledged_once_consumed() {
    for _ in 0..50 {
        let received = Arc::new(Mutex::new(None));
        let mut catalog = OperationCatalog::new();
        catalog.register(
            "ask",
            RecordingAsk {
                received: received.clone(),
            },
        );
        let service = TaskService::new(&config(), catalog, None);

        let id = service.start("ask", json!({})).unwrap().task_id;
        wait_for(&service, &id, WaitCondition::InputRequiredOrTerminal).await;

        let canceller = {
            let service = service.clone();
            let id = id.clone();
            tokio::spawn(async move { service.cancel(&id) })
        };
        let answer = service.provide_input(&id, json!("ada")).await;
        canceller.await.unwrap().unwrap();

        match answer {
            Ok(_) => {
                wait_for_idle_executors(&service).await;
                assert_eq!(*received.lock().unwrap(), Some(json!("ada")));
            }
            Err(e) => assert!(matches!(e, TaskError::NotWaiting { .. }), "{e:?}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_are_serialized() {
    let service = service();
    let registry = service.registry().clone();
    let task = registry.create("echo", json!({})).unwrap();
    registry
        .update(&task.id, |t| t.transition(TaskPhase::Working, None))
        .unwrap();

    let writers: Vec<_> = (1..=100)
        .map(|i| {
            let registry = registry.clone();
            let id = task.id.clone();
            tokio::spawn(async move {
                registry
                    .update(&id, |t| t.record_progress(f64::from(i) / 100.0, format!("step {i}")))
                    .unwrap()
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let last = registry.get(&task.id).unwrap();
    assert_eq!(last.version, 102);
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.state(), TaskState::Working);
    assert_eq!(last.transitions.len(), 1);
}

#[tokio::test]
async fn polling_terminal_task_is_byte_identical() {
    let service = service();
    let id = service.start("echo", json!({"value": "x"})).unwrap().task_id;
    wait_for(&service, &id, WaitCondition::Terminal).await;

    let first = serde_json::to_vec(&service.get_status(&id).unwrap()).unwrap();
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let again = serde_json::to_vec(&service.get_status(&id).unwrap()).unwrap();
        assert_eq!(again, first);
    }
}

#[tokio::test]
async fn early_subscriber_sees_every_transition_in_order() {
    let service = service();
    let (started, stream) = service
        .start_subscribed(
            "echo",
            json!({"steps": 3, "delayMs": 1, "ask": {"kind": "text", "message": "Name?"}}),
        )
        .unwrap();
    let id = started.task_id;

    let collector = tokio::spawn(stream.collect::<Vec<TaskSnapshot>>());
    wait_for(&service, &id, WaitCondition::InputRequiredOrTerminal).await;
    service.provide_input(&id, json!("ada")).await.unwrap();
    let events = collector.await.unwrap();

    let states: Vec<TaskState> = events.iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            TaskState::Working,
            TaskState::Working,
            TaskState::Working,
            TaskState::Working,
            TaskState::InputRequired,
            TaskState::Working,
            TaskState::Completed,
        ]
    );
    let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
    assert_eq!(versions, (2..=8).collect::<Vec<u64>>());
    for event in &events {
        assert_fields_match_state(event);
    }
}

#[tokio::test]
async fn subscribing_to_finished_task_yields_nothing() {
    let service = service();
    let id = service.start("echo", json!({})).unwrap().task_id;
    wait_for(&service, &id, WaitCondition::Terminal).await;

    let mut stream = service.subscribe(&id).unwrap();
    assert!(stream.next().await.is_none());
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn operation_failure_is_captured_verbatim() {
    let service = service();
    let id = service
        .start("echo", json!({"fail": "upstream returned 503"}))
        .unwrap()
        .task_id;

    let done = wait_for(&service, &id, WaitCondition::Terminal).await;
    let error = done.error.unwrap();
    assert_eq!(error.kind, FailureKind::ExecutionFailure);
    assert_eq!(error.message, "upstream returned 503");
    assert!(!error.retriable);
}

#[tokio::test]
async fn panic_fails_task_as_executor_crashed() {
    let service = service();
    let id = service.start("panic", json!({})).unwrap().task_id;

    let done = wait_for(&service, &id, WaitCondition::Terminal).await;
    assert_eq!(done.state, TaskState::Failed);
    let error = done.error.unwrap();
    assert_eq!(error.kind, FailureKind::ExecutorCrashed);
    assert!(error.message.contains("boom"));
}

#[tokio::test(start_paused = true)]
async fn unanswered_question_times_out() {
    let mut config = config();
    config.executor.input_timeout = Duration::from_secs(5);
    let service = service_with(&config);
    let id = service
        .start("echo", json!({"ask": {"kind": "text", "message": "Name?"}}))
        .unwrap()
        .task_id;

    let done = service
        .wait(&id, WaitCondition::Terminal, Duration::from_secs(60))
        .await
        .unwrap();
    let error = done.error.unwrap();
    assert_eq!(error.kind, FailureKind::InputTimeout);
    assert!(error.retriable);

    let err = service.provide_input(&id, json!("late")).await.unwrap_err();
    assert!(matches!(err, TaskError::NotWaiting { .. }));
}

#[tokio::test]
async fn capacity_limit_rejects_new_tasks() {
    let mut config = config();
    config.registry.max_active_tasks = 1;
    let service = service_with(&config);

    let first = service.start("echo", long_echo()).unwrap().task_id;
    let err = service.start("echo", json!({})).unwrap_err();
    assert_eq!(err, TaskError::CapacityExceeded { limit: 1 });

    service.cancel(&first).unwrap();
    assert!(service.start("echo", json!({})).is_ok());
}

#[tokio::test]
async fn expired_tasks_are_evicted() {
    let mut config = config();
    config.registry.retention = Duration::from_millis(1);
    let service = service_with(&config);

    let id = service.start("echo", json!({})).unwrap().task_id;
    wait_for(&service, &id, WaitCondition::Terminal).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(service.cleanup_expired(), 1);
    assert!(matches!(
        service.get_status(&id),
        Err(TaskError::NotFound { .. })
    ));
}

#[tokio::test]
async fn shutdown_fails_live_tasks() {
    let service = service();
    let working = service.start("echo", long_echo()).unwrap().task_id;
    let waiting = service
        .start("echo", json!({"ask": {"kind": "text", "message": "Name?"}}))
        .unwrap()
        .task_id;
    wait_for(&service, &waiting, WaitCondition::InputRequiredOrTerminal).await;

    service.shutdown().await;

    for id in [&working, &waiting] {
        let snapshot = service.get_status(id).unwrap();
        assert_eq!(snapshot.state, TaskState::Failed);
        assert_eq!(snapshot.error.unwrap().kind, FailureKind::ServiceShutdown);
    }
    assert_eq!(service.stats().running_executors, 0);
}

#[tokio::test]
async fn list_filters_by_state() {
    let service = service();
    let done = service.start("echo", json!({})).unwrap().task_id;
    wait_for(&service, &done, WaitCondition::Terminal).await;
    let live = service.start("echo", long_echo()).unwrap().task_id;
    wait_for(&service, &live, WaitCondition::ChangedSince(1)).await;

    let completed = service.list(Some(TaskState::Completed), 10);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].task_id, done);

    let all = service.list(None, 10);
    assert_eq!(all.len(), 2);
    service.cancel(&live).unwrap();
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn committed_records_reach_the_store() {
    let store = Arc::new(MemoryStore::new());
    let (service, _) = TaskService::with_store(
        &config(),
        OperationCatalog::with_builtins(),
        None,
        store.clone(),
    )
    .await
    .unwrap();

    let id = service.start("echo", json!({"value": 7})).unwrap().task_id;
    let done = wait_for(&service, &id, WaitCondition::Terminal).await;
    service.shutdown().await;

    let record = store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.version, done.version);
    assert_eq!(record.state(), TaskState::Completed);
}

#[tokio::test]
async fn restart_marks_running_tasks_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).await.unwrap());

    let mut running = Task::new(TaskId::new(), "export", json!({"format": "csv"}));
    running.transition(TaskPhase::Working, None).unwrap();
    running.record_progress(0.4, "Exported 20000/50000 records").unwrap();
    store.put(&running).await.unwrap();

    let (service, summary) = TaskService::with_store(
        &config(),
        OperationCatalog::with_builtins(),
        None,
        store.clone(),
    )
    .await
    .unwrap();
    assert_eq!(summary.restored, 1);
    assert_eq!(summary.interrupted, 1);

    let snapshot = service.get_status(&running.id).unwrap();
    assert_eq!(snapshot.state, TaskState::Failed);
    assert_eq!(snapshot.progress, 0.4);
    let error = snapshot.error.unwrap();
    assert_eq!(error.kind, FailureKind::Interrupted);
    assert!(error.retriable);

    service.shutdown().await;
    let record = store.get(&running.id).await.unwrap().unwrap();
    assert_eq!(record.state(), TaskState::Failed);
}
