//! Task envelope - the one persisted entity.
//!
//! # 設計
//! - envelope は固定の struct、payload (`task_input` / `task_output`) だけが
//!   ジェネリックです。キュー自体は payload の中身を一切解釈しません。
//! - `state` と `events` は crate 内部からしか書き換えられません。state machine
//!   の合法性は [`crate::queue::FsQueue::append_event`] で強制されます。
//! - `task_output` は claim を持つ worker（と domain callback）が自由に
//!   書き換えられます。
//!
//! タイムスタンプは `chrono::DateTime<Utc>` で、RFC 3339 としてシリアライズ
//! されるため、書いて読み戻しても精度が落ちません。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskState;

/// One entry in a task's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub time: DateTime<Utc>,
    pub description: String,
}

impl TaskEvent {
    /// Create an event stamped with the current time.
    pub(crate) fn now(description: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            description: description.into(),
        }
    }
}

/// The durable unit of work: identity, state, ordered event history, and
/// the caller's opaque payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope<In, Out> {
    id: TaskId,
    state: TaskState,
    events: Vec<TaskEvent>,
    task_input: In,
    task_output: Out,
}

impl<In, Out> TaskEnvelope<In, Out> {
    /// Create a fresh envelope in the Waiting state with no history yet.
    /// The "Task created" event is appended by the queue, not here.
    pub(crate) fn new(id: TaskId, task_input: In, task_output: Out) -> Self {
        Self {
            id,
            state: TaskState::Waiting,
            events: Vec::new(),
            task_input,
            task_output,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Event history, oldest first. Append-only; never reordered.
    pub fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    /// The payload supplied at creation. Write-once.
    pub fn input(&self) -> &In {
        &self.task_input
    }

    pub fn output(&self) -> &Out {
        &self.task_output
    }

    /// Mutable access to the output payload. Only meaningful while the
    /// caller holds the claim on this task; the queue never inspects it.
    pub fn output_mut(&mut self) -> &mut Out {
        &mut self.task_output
    }

    pub fn set_output(&mut self, output: Out) {
        self.task_output = output;
    }

    pub(crate) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub(crate) fn push_event(&mut self, event: TaskEvent) {
        self.events.push(event);
    }
}
