//! Worker loop: drive tasks from claim to a terminal state.
//!
//! # 役割分担
//! - Queue が状態遷移を管理する（Waiting -> InProgress -> ...）
//! - Worker は domain callback を実行し、結果を記録する
//! - callback の失敗はそのタスクの `failed` 状態として durable に記録され、
//!   worker 自体は決して巻き込まれない（1 個の壊れたタスクでプロセスを
//!   落とさない）

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::domain::{QueueError, TaskEnvelope, TaskId, TaskState};
use crate::journal::JournalLevel;
use crate::queue::claim;
use crate::queue::{FsQueue, OldestFirst, SelectPolicy};

/// Error type domain callbacks report. Only the message is kept (in the
/// task's event history), so any error type will do.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Caller-supplied job logic, invoked with exclusive ownership of the task.
///
/// The handler may mutate `task_output` incrementally and call
/// [`FsQueue::append_event`] to publish fine-grained progress; both are
/// persisted immediately, so a concurrent poller sees live state. No other
/// worker touches the task while this runs.
#[async_trait]
pub trait TaskHandler<In, Out>: Send + Sync {
    async fn process(
        &self,
        task: &mut TaskEnvelope<In, Out>,
        queue: &FsQueue<In, Out>,
    ) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when the waiting bucket is empty.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// One worker: polls the waiting bucket, claims, runs the handler, records
/// the outcome. Clone is cheap; clones share the queue and handler.
pub struct Worker<In, Out> {
    queue: Arc<FsQueue<In, Out>>,
    handler: Arc<dyn TaskHandler<In, Out>>,
    policy: Arc<dyn SelectPolicy>,
    config: WorkerConfig,
}

impl<In, Out> Clone for Worker<In, Out> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            handler: Arc::clone(&self.handler),
            policy: Arc::clone(&self.policy),
            config: self.config.clone(),
        }
    }
}

impl<In, Out> Worker<In, Out>
where
    In: Serialize + DeserializeOwned + Send + Sync,
    Out: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(queue: Arc<FsQueue<In, Out>>, handler: Arc<dyn TaskHandler<In, Out>>) -> Self {
        Self {
            queue,
            handler,
            policy: Arc::new(OldestFirst),
            config: WorkerConfig::default(),
        }
    }

    /// Swap the candidate-selection policy (default: oldest file first).
    pub fn with_policy(mut self, policy: Arc<dyn SelectPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Process at most one task.
    ///
    /// Returns the id of the processed task, or `None` when the bucket was
    /// empty or another worker won the claim race (both are normal).
    /// Errors are queue-integrity problems (I/O, corruption), never domain
    /// failures — those end up in the task's own `failed` state.
    pub async fn process_one(&self) -> Result<Option<TaskId>, QueueError> {
        let journal = self.queue.journal();

        let candidates = claim::list_waiting(self.queue.layout()).await?;
        let Some(id) = self.policy.select(&candidates) else {
            return Ok(None);
        };

        journal.record(JournalLevel::Info, &format!("Task {id}: starting work"));

        // rename が mutex。負けたら誰かが先に取っただけなので no-op 扱い。
        match claim::claim(self.queue.layout(), &id).await {
            Ok(()) => {}
            Err(QueueError::ClaimLost(_)) => {
                journal.record(
                    JournalLevel::Warning,
                    &format!("Task {id}: file not found, assuming picked up by another worker"),
                );
                warn!(id = %id, "lost claim race");
                return Ok(None);
            }
            Err(err) => return Err(err),
        }

        let mut task = self.queue.read_task(&id).await?;
        self.queue
            .append_event(&mut task, "Task started", Some(TaskState::InProgress))
            .await?;

        match self.handler.process(&mut task, &self.queue).await {
            Ok(()) => {
                journal.record(
                    JournalLevel::Info,
                    &format!("Task {id}: task completed without exception"),
                );
                self.queue
                    .append_event(
                        &mut task,
                        "Task completed without exception",
                        Some(TaskState::Completed),
                    )
                    .await?;
            }
            Err(exc) => {
                // Durably recorded, deliberately not re-raised.
                journal.record(
                    JournalLevel::Error,
                    &format!("Task {id}: task failed with exception {exc}"),
                );
                error!(id = %id, %exc, "task failed");
                self.queue
                    .append_event(
                        &mut task,
                        &format!("Task failed with an exception: {exc}"),
                        Some(TaskState::Failed),
                    )
                    .await?;
            }
        }

        Ok(Some(id))
    }

    /// Keep processing until shutdown is requested.
    async fn run(&self, worker_id: usize, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.process_one().await {
                Ok(Some(id)) => {
                    debug!(worker_id, id = %id, "processed task");
                    continue;
                }
                Ok(None) => {
                    self.queue
                        .journal()
                        .record(JournalLevel::Debug, "No tasks found, sleeping...");
                }
                Err(err) => {
                    // Queue-integrity problem. Surface loudly, then keep the
                    // loop alive; the operator decides what to do with the
                    // directory tree.
                    self.queue
                        .journal()
                        .record(JournalLevel::Error, &format!("queue error: {err}"));
                    error!(worker_id, %err, "queue error");
                }
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }
}

/// Worker group handle.
/// - `request_shutdown()` でループ全体が止まる（実行中の handler は中断しない）
/// - `shutdown_and_join()` で全 worker の終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` clones of `worker` as tokio tasks.
    pub fn spawn<In, Out>(n: usize, worker: Worker<In, Out>) -> Self
    where
        In: Serialize + DeserializeOwned + Send + Sync + 'static,
        Out: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let w = worker.clone();
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                w.run(worker_id, &mut rx).await;
            }));
        }

        Self { shutdown_tx, joins }
    }

    /// Request shutdown for all workers. In-flight handler execution is not
    /// cancelled; the loops just stop taking new claims.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::NullJournal;
    use tempfile::TempDir;

    type NumberQueue = FsQueue<Vec<i64>, i64>;

    /// Adds the input numbers into the output, with one progress event.
    struct AddingHandler;

    #[async_trait]
    impl TaskHandler<Vec<i64>, i64> for AddingHandler {
        async fn process(
            &self,
            task: &mut TaskEnvelope<Vec<i64>, i64>,
            queue: &NumberQueue,
        ) -> Result<(), HandlerError> {
            let sum = task.input().iter().sum();
            task.set_output(sum);
            queue
                .append_event(task, "Added the integers together", None)
                .await?;
            Ok(())
        }
    }

    /// Always blows up.
    struct FailingHandler;

    #[async_trait]
    impl TaskHandler<Vec<i64>, i64> for FailingHandler {
        async fn process(
            &self,
            _task: &mut TaskEnvelope<Vec<i64>, i64>,
            _queue: &NumberQueue,
        ) -> Result<(), HandlerError> {
            Err("BOOM!".into())
        }
    }

    async fn queue_in(dir: &TempDir) -> Arc<NumberQueue> {
        Arc::new(
            NumberQueue::open_with_journal(dir.path(), Arc::new(NullJournal))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn processes_a_single_task_end_to_end() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir).await;
        let worker = Worker::new(Arc::clone(&queue), Arc::new(AddingHandler));

        let id = queue.start_task(vec![1, 2, 3], -1).await.unwrap();
        let processed = worker.process_one().await.unwrap();
        assert_eq!(processed, Some(id.clone()));

        let task = queue.read_task(&id).await.unwrap();
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(*task.output(), 6);

        let descriptions: Vec<_> = task
            .events()
            .iter()
            .map(|ev| ev.description.as_str())
            .collect();
        assert_eq!(
            descriptions,
            [
                "Task created",
                "Task started",
                "Added the integers together",
                "Task completed without exception",
            ]
        );
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir).await;
        let worker = Worker::new(queue, Arc::new(AddingHandler));

        assert_eq!(worker.process_one().await.unwrap(), None);
    }

    #[tokio::test]
    async fn handler_failure_is_recorded_and_does_not_kill_the_worker() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir).await;
        let worker = Worker::new(Arc::clone(&queue), Arc::new(FailingHandler));

        let id = queue.start_task(vec![1, 2, 3], -1).await.unwrap();
        assert_eq!(worker.process_one().await.unwrap(), Some(id.clone()));

        let task = queue.read_task(&id).await.unwrap();
        assert_eq!(task.state(), TaskState::Failed);
        // Output keeps the caller-supplied default.
        assert_eq!(*task.output(), -1);

        let descriptions: Vec<_> = task
            .events()
            .iter()
            .map(|ev| ev.description.as_str())
            .collect();
        assert_eq!(
            descriptions,
            [
                "Task created",
                "Task started",
                "Task failed with an exception: BOOM!",
            ]
        );

        // The same worker is still alive and picks up the next task.
        let second = queue.start_task(vec![4], 0).await.unwrap();
        assert_eq!(worker.process_one().await.unwrap(), Some(second));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ten_workers_race_for_one_task_exactly_one_wins() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir).await;
        let worker = Worker::new(Arc::clone(&queue), Arc::new(AddingHandler));

        let id = queue.start_task(vec![1, 2, 3], -1).await.unwrap();

        let mut joins = Vec::new();
        for _ in 0..10 {
            let w = worker.clone();
            joins.push(tokio::spawn(async move { w.process_one().await }));
        }

        let mut processed = Vec::new();
        let mut idle = 0;
        for join in joins {
            match join.await.unwrap().unwrap() {
                Some(done) => processed.push(done),
                None => idle += 1,
            }
        }

        assert_eq!(processed, vec![id.clone()]);
        assert_eq!(idle, 9);

        let task = queue.read_task(&id).await.unwrap();
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(*task.output(), 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_group_drains_the_queue_and_shuts_down() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir).await;

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(queue.start_task(vec![i, i], 0).await.unwrap());
        }

        let worker = Worker::new(Arc::clone(&queue), Arc::new(AddingHandler)).with_config(
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
            },
        );
        let group = WorkerGroup::spawn(2, worker);

        // Poll until every task is terminal.
        for id in &ids {
            loop {
                let task = queue.read_task(id).await.unwrap();
                if task.state().is_terminal() {
                    assert_eq!(task.state(), TaskState::Completed);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        group.shutdown_and_join().await;

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.completed, 5);
        assert_eq!(counts.waiting + counts.in_progress, 0);
    }

    #[tokio::test]
    async fn default_journal_records_claim_and_completion() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<NumberQueue> = Arc::new(NumberQueue::open(dir.path()).await.unwrap());
        let worker = Worker::new(Arc::clone(&queue), Arc::new(AddingHandler));

        let id = queue.start_task(vec![2, 2], 0).await.unwrap();
        worker.process_one().await.unwrap();

        let log = std::fs::read_to_string(dir.path().join("queue.log")).unwrap();
        assert!(log.contains(&format!("Creating task {id}")));
        assert!(log.contains(&format!("Task {id}: starting work")));
        assert!(log.contains(&format!("Task {id}: task completed without exception")));
        assert!(log.contains(&std::process::id().to_string()));
    }
}
