//! Claim protocol: filesystem rename as the mutual-exclusion primitive.
//!
//! # なぜ rename だけで排他になるのか
//! 同じファイルを二つのプロセスが同時に rename しようとすると、成功するのは
//! 片方だけで、もう片方は NotFound を受け取ります。つまり
//! `waiting/{id}` -> `in_progress/{id}` の rename に成功したプロセスだけが
//! そのタスクの所有権を得ます。lock ファイルも mutex も不要です。
//!
//! 負けた側の NotFound は [`QueueError::ClaimLost`] に写像され、worker loop
//! では「この回は何も処理しなかった」として扱われます。エラーではありません。

use rand::seq::SliceRandom;
use std::io::ErrorKind;
use std::time::SystemTime;
use tracing::debug;

use super::layout::Layout;
use crate::domain::{QueueError, TaskId, TaskState};

/// A task currently sitting in the waiting bucket.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: TaskId,
    /// Last modification time of the task file; approximates arrival order.
    pub modified: SystemTime,
}

/// Policy deciding which waiting task a worker should try to claim next.
///
/// The listing the policy sees is a snapshot: under concurrent mutation it
/// may already be stale, so the policy only has to be a reasonable
/// heuristic, not perfectly fair. Whoever wins the rename wins.
pub trait SelectPolicy: Send + Sync {
    fn select(&self, candidates: &[Candidate]) -> Option<TaskId>;
}

/// Default policy: oldest file first (FIFO by arrival, approximately).
#[derive(Debug, Clone, Copy, Default)]
pub struct OldestFirst;

impl SelectPolicy for OldestFirst {
    fn select(&self, candidates: &[Candidate]) -> Option<TaskId> {
        candidates
            .iter()
            .min_by_key(|candidate| candidate.modified)
            .map(|candidate| candidate.id.clone())
    }
}

/// Alternative policy: pick uniformly at random. Useful when many workers
/// hammer one queue and you want to cut down rename collisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Random;

impl SelectPolicy for Random {
    fn select(&self, candidates: &[Candidate]) -> Option<TaskId> {
        candidates
            .choose(&mut rand::thread_rng())
            .map(|candidate| candidate.id.clone())
    }
}

/// Snapshot the waiting bucket.
///
/// Files that vanish between the directory listing and the metadata call
/// were claimed by someone else mid-listing; they are skipped, not errors.
pub(crate) async fn list_waiting(layout: &Layout) -> Result<Vec<Candidate>, QueueError> {
    let mut candidates = Vec::new();
    let mut entries = tokio::fs::read_dir(layout.bucket_dir(TaskState::Waiting)).await?;

    while let Some(entry) = entries.next_entry().await? {
        let id = TaskId::new(entry.file_name().to_string_lossy().into_owned());
        match entry.metadata().await {
            Ok(metadata) => {
                let modified = metadata.modified()?;
                candidates.push(Candidate { id, modified });
            }
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(candidates)
}

/// Atomically transfer ownership of one waiting task to the caller.
///
/// On success the caller exclusively owns the task until it writes the
/// envelope into a terminal bucket. [`QueueError::ClaimLost`] means another
/// worker got there first.
pub(crate) async fn claim(layout: &Layout, id: &TaskId) -> Result<(), QueueError> {
    let src = layout.task_path(TaskState::Waiting, id);
    let dst = layout.task_path(TaskState::InProgress, id);

    match tokio::fs::rename(&src, &dst).await {
        Ok(()) => {
            debug!(id = %id, "claimed task");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Err(QueueError::ClaimLost(id.clone())),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn fixture() -> (TempDir, Layout) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure_directories().await.unwrap();
        (dir, layout)
    }

    fn candidates_at(times: &[(&str, u64)]) -> Vec<Candidate> {
        let epoch = SystemTime::UNIX_EPOCH;
        times
            .iter()
            .map(|(id, secs)| Candidate {
                id: TaskId::new(*id),
                modified: epoch + Duration::from_secs(*secs),
            })
            .collect()
    }

    #[test]
    fn oldest_first_picks_minimum_mtime() {
        let candidates = candidates_at(&[("b", 20), ("a", 10), ("c", 30)]);
        assert_eq!(OldestFirst.select(&candidates), Some(TaskId::new("a")));
    }

    #[test]
    fn policies_return_none_on_empty_bucket() {
        assert_eq!(OldestFirst.select(&[]), None);
        assert_eq!(Random.select(&[]), None);
    }

    #[test]
    fn random_picks_some_existing_candidate() {
        let candidates = candidates_at(&[("a", 10), ("b", 20)]);
        let picked = Random.select(&candidates).unwrap();
        assert!(picked.as_str() == "a" || picked.as_str() == "b");
    }

    #[tokio::test]
    async fn listing_sees_waiting_files() {
        let (_dir, layout) = fixture().await;
        let id = TaskId::new("t-1");
        tokio::fs::write(layout.task_path(TaskState::Waiting, &id), b"{}")
            .await
            .unwrap();

        let candidates = list_waiting(&layout).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, id);
    }

    #[tokio::test]
    async fn exactly_one_of_two_claims_wins() {
        let (_dir, layout) = fixture().await;
        let id = TaskId::new("t-1");
        tokio::fs::write(layout.task_path(TaskState::Waiting, &id), b"{}")
            .await
            .unwrap();

        claim(&layout, &id).await.unwrap();
        let err = claim(&layout, &id).await.unwrap_err();
        assert!(matches!(err, QueueError::ClaimLost(lost) if lost == id));

        assert!(
            tokio::fs::try_exists(layout.task_path(TaskState::InProgress, &id))
                .await
                .unwrap()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn n_way_claim_race_has_a_single_winner() {
        let (_dir, layout) = fixture().await;
        let id = TaskId::new("contested");
        tokio::fs::write(layout.task_path(TaskState::Waiting, &id), b"{}")
            .await
            .unwrap();

        let mut joins = Vec::new();
        for _ in 0..10 {
            let layout = layout.clone();
            let id = id.clone();
            joins.push(tokio::spawn(async move { claim(&layout, &id).await }));
        }

        let mut wins = 0;
        let mut losses = 0;
        for join in joins {
            match join.await.unwrap() {
                Ok(()) => wins += 1,
                Err(QueueError::ClaimLost(_)) => losses += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!((wins, losses), (1, 9));
    }
}
