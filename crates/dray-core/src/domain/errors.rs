//! Queue error taxonomy.
//!
//! # 伝播ポリシー
//! - タスク固有の失敗（domain callback のエラー）はここには現れません。
//!   それは envelope の `failed` 状態として記録され、worker loop を
//!   停止させません。
//! - キュー自体の不変条件の破れ（`Corrupt`, `AlreadyExists` など）は
//!   検出した操作の呼び出し元へ返されます。

use std::path::PathBuf;
use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskState;

#[derive(Debug, Error)]
pub enum QueueError {
    /// No bucket contains a task with this id.
    #[error("could not find task with id {0}")]
    NotFound(TaskId),

    /// `start_task` collided with an existing task (any bucket).
    #[error("a task with id {0} already exists")]
    AlreadyExists(TaskId),

    /// Another worker won the rename race for this task. Internal signal:
    /// the worker loop turns this into "nothing processed this iteration"
    /// and never surfaces it further.
    #[error("task {0} was already claimed by another worker")]
    ClaimLost(TaskId),

    /// The id cannot be used as a file name inside a bucket directory.
    #[error("task id {0:?} is not usable as a file name")]
    InvalidId(String),

    /// Attempted a state change the machine does not allow.
    #[error("illegal state transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    /// A task file exists but does not deserialize. Loud by design: this
    /// means a bug or out-of-band tampering, never something to skip.
    #[error("task file for {id} is corrupt: {source}")]
    Corrupt {
        id: TaskId,
        #[source]
        source: serde_json::Error,
    },

    /// The bucket directories do not all live on one filesystem, so rename
    /// would not be atomic. Startup precondition, checked at open.
    #[error("queue directory {dir} is on a different filesystem than {base}; rename would not be atomic")]
    CrossDevice { base: PathBuf, dir: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
