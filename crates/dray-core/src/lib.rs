//! dray-core
//!
//! Crash-safe, filesystem-backed task queue for long, externally
//! rate-limited jobs. No broker, no database, no lock server: the only
//! shared state is a directory tree, and the only synchronization
//! primitive is the atomicity of `rename(2)`.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, envelope, errors）
//! - **queue**: on-disk layout, atomic store, claim protocol, client API
//! - **worker**: worker loop（select → claim → handle → record）
//! - **journal**: advisory な運用ジャーナル（queue.log）
//! - **observability**: bucket ごとの件数ビュー
//!
//! # 最小の使い方
//! ```ignore
//! let queue = Arc::new(FsQueue::<Vec<i64>, i64>::open("/var/queues/uploads").await?);
//! let id = queue.start_task(vec![1, 2, 3], -1).await?;
//!
//! let worker = Worker::new(Arc::clone(&queue), Arc::new(MyHandler));
//! let group = WorkerGroup::spawn(2, worker);
//! // ... later:
//! group.shutdown_and_join().await;
//! ```
//!
//! # Deployment constraint
//! すべての bucket ディレクトリが同一ファイルシステム上にあること（open 時に
//! 検証）。弱い整合性のネットワークファイルシステム上では成立しません。
//! また、claim 後に worker プロセスが死ぬとそのタスクは `in_progress` に
//! 残り続けます（lease 期限なし。運用で回収する前提の既知の制約）。

pub mod domain;
pub mod journal;
pub mod observability;
pub mod queue;
pub mod worker;

pub use domain::{QueueError, TaskEnvelope, TaskEvent, TaskId, TaskState};
pub use journal::{FileJournal, JournalLevel, JournalSink, NullJournal};
pub use observability::QueueCounts;
pub use queue::{Candidate, FsQueue, OldestFirst, Random, SelectPolicy};
pub use worker::{HandlerError, TaskHandler, Worker, WorkerConfig, WorkerGroup};
