use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use dray_core::{
    FsQueue, HandlerError, TaskEnvelope, TaskHandler, Worker, WorkerConfig, WorkerGroup,
};

type NumberQueue = FsQueue<Vec<i64>, i64>;

/// Demo handler: sums the input into the output, reporting progress.
struct SummingHandler;

#[async_trait]
impl TaskHandler<Vec<i64>, i64> for SummingHandler {
    async fn process(
        &self,
        task: &mut TaskEnvelope<Vec<i64>, i64>,
        queue: &NumberQueue,
    ) -> Result<(), HandlerError> {
        // ゆっくり走る外部 API 呼び出しのつもり
        sleep(Duration::from_millis(200)).await;

        let sum = task.input().iter().sum();
        task.set_output(sum);
        queue
            .append_event(task, "Added the integers together", None)
            .await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let base_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "./dray-queue".to_string());

    println!("Looking for tasks in {base_dir}...");
    println!("Follow the log at {base_dir}/queue.log");

    // (A) キューを開く（bucket 作成 + 単一ファイルシステム検証）
    let queue: Arc<NumberQueue> = Arc::new(
        NumberQueue::open(&base_dir)
            .await
            .expect("failed to open queue"),
    );

    // (B) worker を 2 本起動
    let worker = Worker::new(Arc::clone(&queue), Arc::new(SummingHandler)).with_config(
        WorkerConfig {
            poll_interval: Duration::from_millis(250),
        },
    );
    let group = WorkerGroup::spawn(2, worker);

    // (C) タスクを数件投入
    let mut ids = Vec::new();
    for input in [vec![1, 2, 3], vec![10, 20], vec![-5, 5, 7]] {
        let id = queue
            .start_task(input, -1)
            .await
            .expect("failed to start task");
        println!("enqueued task: {id}");
        ids.push(id);
    }

    // (D) 全タスクが terminal になるまでポーリング
    for id in &ids {
        loop {
            let task = queue.read_task(id).await.expect("task exists");
            if task.state().is_terminal() {
                println!(
                    "task {id}: state={} output={} events={}",
                    task.state(),
                    task.output(),
                    task.events().len()
                );
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    let counts = queue.counts().await.expect("counts");
    println!(
        "counts: waiting={} in_progress={} completed={} failed={}",
        counts.waiting, counts.in_progress, counts.completed, counts.failed
    );

    group.shutdown_and_join().await;
}
