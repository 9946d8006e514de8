//! Queue module: on-disk layout, atomic store, claim protocol, client API.

pub(crate) mod claim;
pub(crate) mod layout;
pub(crate) mod store;

pub use claim::{Candidate, OldestFirst, Random, SelectPolicy};

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::domain::{QueueError, TaskEnvelope, TaskEvent, TaskId, TaskState};
use crate::journal::{FileJournal, JournalLevel, JournalSink};
use crate::observability::QueueCounts;
use self::layout::Layout;

/// A crash-safe task queue backed by a directory tree.
///
/// `In` / `Out` are the caller's opaque payload types; the queue never
/// inspects them beyond (de)serialization. One `FsQueue` value is cheap to
/// share behind an [`Arc`]; any number of processes may open the same base
/// directory concurrently.
///
/// # 保証すること / しないこと
/// - claim は at-most-one（同じタスクを二つの worker が掴むことはない）
/// - 状態遷移と event 追記は durable（write-temp-then-rename）
/// - worker プロセスが claim 後に死んだタスクは `in_progress` に残り続ける
///   （lease 期限や自動回収は意図的に持たない。低流量・運用者監視前提の
///   単純さ優先のトレードオフ）
pub struct FsQueue<In, Out> {
    layout: Layout,
    journal: Arc<dyn JournalSink>,
    _payload: PhantomData<fn() -> (In, Out)>,
}

impl<In, Out> FsQueue<In, Out>
where
    In: Serialize + DeserializeOwned + Send + Sync,
    Out: Serialize + DeserializeOwned + Send + Sync,
{
    /// Open (creating if necessary) a queue under `base_dir`, journaling to
    /// `queue.log` inside it.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let layout = Layout::new(base_dir);
        // Directories first; the journal file lives inside the base dir.
        layout.ensure_directories().await?;
        let journal = Arc::new(FileJournal::open(&layout.journal_path())?);
        Self::open_inner(layout, journal).await
    }

    /// Open with a caller-supplied journal sink. The sink's lifetime and
    /// flushing stay under the caller's control.
    pub async fn open_with_journal(
        base_dir: impl Into<PathBuf>,
        journal: Arc<dyn JournalSink>,
    ) -> Result<Self, QueueError> {
        Self::open_inner(Layout::new(base_dir), journal).await
    }

    async fn open_inner(
        layout: Layout,
        journal: Arc<dyn JournalSink>,
    ) -> Result<Self, QueueError> {
        layout.ensure_directories().await?;
        // Fail fast: rename is only atomic within one filesystem.
        layout.assert_single_filesystem()?;
        Ok(Self {
            layout,
            journal,
            _payload: PhantomData,
        })
    }

    /// Create a new task in the waiting bucket with a generated id.
    pub async fn start_task(&self, input: In, default_output: Out) -> Result<TaskId, QueueError> {
        self.start_task_with_id(input, default_output, TaskId::generate())
            .await
    }

    /// Create a new task under a caller-chosen id.
    ///
    /// Fails with [`QueueError::AlreadyExists`] when any bucket already
    /// holds a task with this id, leaving the store unchanged.
    pub async fn start_task_with_id(
        &self,
        input: In,
        default_output: Out,
        id: TaskId,
    ) -> Result<TaskId, QueueError> {
        if !id.is_safe_filename() {
            return Err(QueueError::InvalidId(id.as_str().to_string()));
        }
        if store::locate(&self.layout, &id).await?.is_some() {
            return Err(QueueError::AlreadyExists(id));
        }

        self.journal
            .record(JournalLevel::Info, &format!("Creating task {id}"));
        info!(id = %id, "creating task");

        let mut task = TaskEnvelope::new(id.clone(), input, default_output);
        task.push_event(TaskEvent::now("Task created"));
        store::write_envelope(&self.layout, &task).await?;

        Ok(id)
    }

    /// Read a task's current envelope, whichever bucket it is in.
    pub async fn read_task(&self, id: &TaskId) -> Result<TaskEnvelope<In, Out>, QueueError> {
        store::read_envelope(&self.layout, id).await
    }

    /// Append a timestamped event to a task, optionally moving it to a new
    /// state, and persist immediately so concurrent pollers see it.
    ///
    /// Callers must hold the claim on the task (or be its producer before
    /// any claim). State changes are validated against the machine
    /// waiting -> in_progress -> {completed|failed}; passing the current
    /// state again is a no-op, anything else illegal is rejected.
    pub async fn append_event(
        &self,
        task: &mut TaskEnvelope<In, Out>,
        description: &str,
        new_state: Option<TaskState>,
    ) -> Result<(), QueueError> {
        if let Some(next) = new_state {
            if next != task.state() && !task.state().can_transition_to(next) {
                return Err(QueueError::InvalidTransition {
                    id: task.id().clone(),
                    from: task.state(),
                    to: next,
                });
            }
            task.set_state(next);
        }

        task.push_event(TaskEvent::now(description));
        store::write_envelope(&self.layout, task).await
    }

    /// Count task files per bucket. Advisory: the counts are racy under
    /// concurrent claims, which is fine for dashboards and CLIs.
    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut counts = QueueCounts::default();
        for state in TaskState::SCAN_ORDER {
            let mut entries = tokio::fs::read_dir(self.layout.bucket_dir(state)).await?;
            let mut n = 0;
            while entries.next_entry().await?.is_some() {
                n += 1;
            }
            match state {
                TaskState::Waiting => counts.waiting = n,
                TaskState::InProgress => counts.in_progress = n,
                TaskState::Completed => counts.completed = n,
                TaskState::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.layout
    }

    pub(crate) fn journal(&self) -> &Arc<dyn JournalSink> {
        &self.journal
    }
}
