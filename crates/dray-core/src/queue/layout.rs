//! On-disk layout of a queue.
//!
//! # ディレクトリ構成
//! ```text
//! {base_dir}/
//! ├── waiting/       <- 作成直後のタスク
//! ├── in_progress/   <- claim 済みのタスク
//! ├── completed/     <- 正常終了
//! ├── failed/        <- callback がエラーを返した
//! ├── tmp/           <- atomic write の staging 専用（読まれることはない）
//! └── queue.log      <- advisory な運用ジャーナル
//! ```
//!
//! claim と状態遷移の排他は rename の原子性だけに依存しているため、
//! これらのディレクトリが別々のファイルシステムに載っていると成立しません。
//! open 時に検証して拒否します（deployment 上のハード制約）。

use std::path::{Path, PathBuf};

use crate::domain::{QueueError, TaskId, TaskState};

/// Resolves bucket / tmp / journal paths under one base directory.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    base_dir: PathBuf,
}

impl Layout {
    pub(crate) fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub(crate) fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(crate) fn bucket_dir(&self, state: TaskState) -> PathBuf {
        self.base_dir.join(state.dir_name())
    }

    pub(crate) fn tmp_dir(&self) -> PathBuf {
        self.base_dir.join("tmp")
    }

    pub(crate) fn journal_path(&self) -> PathBuf {
        self.base_dir.join("queue.log")
    }

    pub(crate) fn task_path(&self, state: TaskState, id: &TaskId) -> PathBuf {
        self.bucket_dir(state).join(id.as_str())
    }

    pub(crate) fn tmp_path(&self, id: &TaskId) -> PathBuf {
        self.tmp_dir().join(id.as_str())
    }

    /// Create every bucket plus the tmp staging area.
    pub(crate) async fn ensure_directories(&self) -> Result<(), QueueError> {
        for state in TaskState::SCAN_ORDER {
            tokio::fs::create_dir_all(self.bucket_dir(state)).await?;
        }
        tokio::fs::create_dir_all(self.tmp_dir()).await?;
        Ok(())
    }

    /// Verify that every directory the rename protocol touches lives on the
    /// same filesystem as the base directory. `rename(2)` is not atomic
    /// across filesystem boundaries, so a split layout would silently break
    /// the claim protocol.
    #[cfg(unix)]
    pub(crate) fn assert_single_filesystem(&self) -> Result<(), QueueError> {
        use std::os::unix::fs::MetadataExt;

        let base_dev = std::fs::metadata(&self.base_dir)?.dev();

        let mut dirs: Vec<PathBuf> = TaskState::SCAN_ORDER
            .iter()
            .map(|state| self.bucket_dir(*state))
            .collect();
        dirs.push(self.tmp_dir());

        for dir in dirs {
            if std::fs::metadata(&dir)?.dev() != base_dev {
                return Err(QueueError::CrossDevice {
                    base: self.base_dir.clone(),
                    dir,
                });
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub(crate) fn assert_single_filesystem(&self) -> Result<(), QueueError> {
        // No portable device-id check here; the deployment requirement
        // still stands, it is just not enforced at startup.
        Ok(())
    }
}
