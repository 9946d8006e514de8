//! Domain model (IDs, states, envelopes, errors).
//!
//! キューが永続化する唯一のエンティティは [`TaskEnvelope`] です。
//! それ以外の型はすべて envelope を構成する部品です。

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod state;

pub use self::envelope::{TaskEnvelope, TaskEvent};
pub use self::errors::QueueError;
pub use self::ids::TaskId;
pub use self::state::TaskState;
