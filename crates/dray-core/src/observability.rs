use serde::{Deserialize, Serialize};

/// Per-bucket file counts. Advisory snapshot for operators and CLIs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.in_progress + self.completed + self.failed
    }
}
