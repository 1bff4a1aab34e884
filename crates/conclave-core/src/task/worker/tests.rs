use super::*;
use crate::task::store::{MemoryTaskStore, TaskStore};
use crate::task::{TaskSpec, TaskStatus, VERIFICATION_REPORT_KEY};
use conclave_tools::{ProcessRunner, VerificationCommand, VerificationConfig, Verifier};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Default)]
struct ScriptedExecutor {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn replying(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, _task: &Task, prompt: &str, _cancel: &CancellationToken) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("done".to_string()))
    }
}

struct Fixture {
    store: Arc<dyn TaskStore>,
    queue: Arc<TaskQueue>,
    worker: Arc<TaskWorker>,
}

fn fixture(executor: Arc<ScriptedExecutor>) -> Fixture {
    fixture_with(executor, VerificationConfig::default())
}

fn fixture_with(executor: Arc<dyn TaskExecutor>, config: VerificationConfig) -> Fixture {
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let queue = Arc::new(TaskQueue::new(store.clone()));
    let verifier = Arc::new(Verifier::new(Arc::new(ProcessRunner::new()), config));
    let pipeline = Arc::new(TaskPipeline::new(store.clone(), verifier));
    let worker = Arc::new(TaskWorker::new(queue.clone(), executor, pipeline));
    Fixture {
        store,
        queue,
        worker,
    }
}

#[tokio::test]
async fn test_step_executes_injected_prompt() {
    let executor = ScriptedExecutor::replying(vec![Ok("all done".to_string())]);
    let fx = fixture(executor.clone());
    let task = fx.queue.add("greet", "say hello").await.unwrap();

    let finished = fx.worker.step(&CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(finished.id, task.id);
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(finished.result.as_deref(), Some("all done"));
    assert_eq!(executor.prompts(), vec!["say hello".to_string()]);

    let stored = fx.store.get_task(&task.id).await.unwrap().unwrap();
    assert!(stored.prompt_injected_at.is_some());
    assert!(fx.worker.step(&CancellationToken::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_blank_prompt_is_never_executed() {
    let executor = ScriptedExecutor::replying(vec![]);
    let fx = fixture(executor.clone());
    let task = fx.queue.add("noop", "  ").await.unwrap();

    let finished = fx.worker.step(&CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Completed);
    assert!(executor.prompts().is_empty());
    let stored = fx.store.get_task(&task.id).await.unwrap().unwrap();
    assert!(stored.prompt_injected_at.is_none());
}

#[tokio::test]
async fn test_reported_blocked_fails_task() {
    let executor = ScriptedExecutor::replying(vec![Ok(
        "```json\n{\"taskId\": \"t\", \"status\": \"blocked\", \"summary\": \"missing token\"}\n```"
            .to_string(),
    )]);
    let fx = fixture(executor);
    fx.queue.add("deploy", "deploy it").await.unwrap();

    let finished = fx.worker.step(&CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Failed);
    assert_eq!(finished.error.as_deref(), Some("missing token"));
}

#[tokio::test]
async fn test_executor_error_fails_task_and_queue_continues() {
    let executor = ScriptedExecutor::replying(vec![
        Err(Error::Internal("boom".to_string())),
        Ok("second ok".to_string()),
    ]);
    let fx = fixture(executor);
    fx.queue.add("a", "first").await.unwrap();
    fx.queue.add("b", "second").await.unwrap();

    let first = fx.worker.step(&CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Failed);
    assert!(first.error.unwrap().contains("boom"));

    let second = fx.worker.step(&CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(second.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_cancelled_execution_cancels_task() {
    let executor = ScriptedExecutor::replying(vec![Err(Error::Cancelled)]);
    let fx = fixture(executor);
    let task = fx.queue.add("a", "work").await.unwrap();

    let err = fx.worker.step(&CancellationToken::new()).await.unwrap_err();
    assert!(err.is_cancelled());
    let stored = fx.store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    assert!(fx.queue.running().await.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_verification_is_reported_to_next_revision() {
    let executor = ScriptedExecutor::replying(vec![Ok("fixed".to_string()), Ok("fixed again".to_string())]);
    let fx = fixture(executor.clone());

    let mut spec = TaskSpec::new("fix the build");
    spec.task_id = "build".to_string();
    spec.verification.push(VerificationCommand::new("false"));
    fx.queue.add_spec(spec.clone()).await.unwrap();

    let first = fx.worker.step(&CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Failed);
    assert_eq!(first.error.as_deref(), Some("1 of 1 verification commands failed"));
    let report = fx
        .store
        .get_context("build", VERIFICATION_REPORT_KEY)
        .await
        .unwrap()
        .unwrap();
    assert!(report.contains("0/1 passed"));

    spec.revision = 2;
    spec.verification = vec![VerificationCommand::new("true")];
    fx.queue.add_spec(spec).await.unwrap();
    let second = fx.worker.step(&CancellationToken::new()).await.unwrap().unwrap();
    assert_eq!(second.status, TaskStatus::Completed);

    let prompts = executor.prompts();
    assert!(!prompts[0].contains("previous attempt"));
    assert!(prompts[1].contains("previous attempt"));
    assert!(prompts[1].contains("expected exit code 0, got 1"));
}

#[tokio::test]
async fn test_run_loop_waits_for_notify() {
    let executor = ScriptedExecutor::replying(vec![]);
    let fx = fixture(executor);
    let cancel = CancellationToken::new();
    let handle = {
        let worker = fx.worker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let task = fx.queue.add("a", "work").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stored = fx.store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Pending);

    fx.queue.notify();
    let mut status = TaskStatus::Pending;
    for _ in 0..100 {
        status = fx.store.get_task(&task.id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, TaskStatus::Completed);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_disabled_verification_does_not_fail_task() {
    for config in [
        VerificationConfig {
            enabled: false,
            ..Default::default()
        },
        VerificationConfig {
            allow_exec: false,
            ..Default::default()
        },
    ] {
        let executor = ScriptedExecutor::replying(vec![Ok("all good".to_string())]);
        let fx = fixture_with(executor, config);
        let mut spec = TaskSpec::new("tidy up");
        spec.verification.push(VerificationCommand::new("true"));
        let task = fx.queue.add_spec(spec.clone()).await.unwrap();

        let finished = fx.worker.step(&CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(finished.id, task.id);
        assert_eq!(finished.status, TaskStatus::Completed);
        assert_eq!(finished.result.as_deref(), Some("all good"));

        let report = fx
            .store
            .get_context(&spec.task_id, VERIFICATION_REPORT_KEY)
            .await
            .unwrap()
            .unwrap();
        assert!(report.contains("1 skipped"));
    }
}

/// Blocks until its token fires
#[derive(Default)]
struct WaitingExecutor {
    saw_cancel: AtomicBool,
}

#[async_trait]
impl TaskExecutor for WaitingExecutor {
    async fn execute(&self, _task: &Task, _prompt: &str, cancel: &CancellationToken) -> Result<String> {
        cancel.cancelled().await;
        self.saw_cancel.store(true, Ordering::SeqCst);
        Err(Error::Cancelled)
    }
}

#[tokio::test]
async fn test_cancelling_running_task_stops_executor() {
    let executor = Arc::new(WaitingExecutor::default());
    let fx = fixture_with(executor.clone(), VerificationConfig::default());
    let task = fx.queue.add("slow", "take your time").await.unwrap();
    fx.queue.add("next", "after").await.unwrap();

    let worker_cancel = CancellationToken::new();
    let step = {
        let worker = fx.worker.clone();
        let cancel = worker_cancel.clone();
        tokio::spawn(async move { worker.step(&cancel).await })
    };
    for _ in 0..100 {
        if fx.queue.running().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancelled = fx.queue.cancel(&task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let finished = tokio::time::timeout(Duration::from_secs(5), step)
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(finished.id, task.id);
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert!(executor.saw_cancel.load(Ordering::SeqCst));
    assert!(!worker_cancel.is_cancelled());

    // the queue stays usable and nothing auto-started
    assert!(fx.queue.running().await.is_none());
    let stored = fx.store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    let next = fx.queue.start_next().await.unwrap().unwrap();
    assert_eq!(next.title, "next");
}

#[tokio::test]
async fn test_worker_shutdown_cancels_running_task() {
    let executor = Arc::new(WaitingExecutor::default());
    let fx = fixture_with(executor.clone(), VerificationConfig::default());
    let task = fx.queue.add("slow", "take your time").await.unwrap();

    let worker_cancel = CancellationToken::new();
    let step = {
        let worker = fx.worker.clone();
        let cancel = worker_cancel.clone();
        tokio::spawn(async move { worker.step(&cancel).await })
    };
    for _ in 0..100 {
        if fx.queue.running().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    worker_cancel.cancel();

    let err = tokio::time::timeout(Duration::from_secs(5), step)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(executor.saw_cancel.load(Ordering::SeqCst));
    let stored = fx.store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
}
