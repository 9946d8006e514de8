//! Task state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task state.
///
/// State transitions:
/// - Waiting -> InProgress -> Completed
/// - Waiting -> InProgress -> Failed
///
/// A task never skips InProgress, and never leaves a terminal state.
/// The state of a task *on disk* is the bucket directory that holds its
/// file; this enum is the serialized mirror of that location.
///
/// Design note: Using an enum ensures exhaustive matching and prevents
/// invalid states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created, claimable by any worker.
    Waiting,

    /// Claimed by exactly one worker.
    InProgress,

    /// Finished without error.
    Completed,

    /// The domain callback returned an error.
    Failed,
}

impl TaskState {
    /// Bucket scan order for reads. Fixed so that lookups are deterministic.
    pub(crate) const SCAN_ORDER: [TaskState; 4] = [
        TaskState::Waiting,
        TaskState::InProgress,
        TaskState::Failed,
        TaskState::Completed,
    ];

    /// Directory name of the bucket for this state.
    pub fn dir_name(self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Is `next` a legal transition out of this state?
    pub fn can_transition_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Waiting, TaskState::InProgress)
                | (TaskState::InProgress, TaskState::Completed)
                | (TaskState::InProgress, TaskState::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
