//! Atomic envelope persistence.
//!
//! # write-temp-then-rename
//! envelope は一度 `tmp/` 以下に排他作成で書き切ってから、rename で目的の
//! bucket に入れます。rename は原子的なので、他プロセスから見えるのは
//! 「完全な旧 envelope」か「完全な新 envelope」のどちらかだけです。
//!
//! bucket をまたぐ更新（状態遷移）は二段階の rename です:
//! 1. tmp -> 旧 bucket（内容の更新）
//! 2. 旧 bucket -> 新 bucket（状態の移動）
//!
//! どの時点でも envelope ファイルはちょうど 1 つしか存在しません。
//! 旧 bucket はファイルの実在位置（ディレクトリ走査）で決めます。内容の
//! `state` フィールドは claim 直後など一時的に位置と食い違うことがある
//! ためです。

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::layout::Layout;
use crate::domain::{QueueError, TaskEnvelope, TaskId, TaskState};

/// Which bucket currently holds this task's file, if any.
pub(crate) async fn locate(layout: &Layout, id: &TaskId) -> Result<Option<TaskState>, QueueError> {
    for state in TaskState::SCAN_ORDER {
        if tokio::fs::try_exists(layout.task_path(state, id)).await? {
            return Ok(Some(state));
        }
    }
    Ok(None)
}

/// Persist an envelope, atomically.
///
/// After this returns Ok, any read from any process observes either the
/// complete new envelope or the complete previous one, never a torn write.
pub(crate) async fn write_envelope<In, Out>(
    layout: &Layout,
    task: &TaskEnvelope<In, Out>,
) -> Result<(), QueueError>
where
    In: Serialize,
    Out: Serialize,
{
    let bytes = serde_json::to_vec(task).map_err(|source| QueueError::Corrupt {
        id: task.id().clone(),
        source,
    })?;

    let tmp_path = layout.tmp_path(task.id());
    let out_path = layout.task_path(task.state(), task.id());

    // 排他作成。同名の tmp ファイルが既にあるなら、別プロセスが同じタスクを
    // 書いている最中ということであり、それはバグなので黙って潰さず失敗させる。
    let mut tmp_file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .await?;
    tmp_file.write_all(&bytes).await?;
    tmp_file.flush().await?;
    drop(tmp_file);

    match locate(layout, task.id()).await? {
        Some(prior) if prior != task.state() => {
            // State change: refresh the file where it lives, then move it.
            let prior_path = layout.task_path(prior, task.id());
            tokio::fs::rename(&tmp_path, &prior_path).await?;
            tokio::fs::rename(&prior_path, &out_path).await?;
            debug!(id = %task.id(), from = %prior, to = %task.state(), "task moved between buckets");
        }
        _ => {
            tokio::fs::rename(&tmp_path, &out_path).await?;
        }
    }

    Ok(())
}

/// Read an envelope, scanning every bucket in fixed order.
pub(crate) async fn read_envelope<In, Out>(
    layout: &Layout,
    id: &TaskId,
) -> Result<TaskEnvelope<In, Out>, QueueError>
where
    In: DeserializeOwned,
    Out: DeserializeOwned,
{
    for state in TaskState::SCAN_ORDER {
        match tokio::fs::read(layout.task_path(state, id)).await {
            Ok(bytes) => {
                return serde_json::from_slice(&bytes).map_err(|source| QueueError::Corrupt {
                    id: id.clone(),
                    source,
                });
            }
            // 並行する rename とすれ違った場合もここに来る。次の bucket を見る。
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(QueueError::NotFound(id.clone()))
}
