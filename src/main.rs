use pagelock::global_lock_manager;
use pagelock::operation_scheduler::{OperationScheduler, SchedulerConfig};
use pagelock::segment::Segment;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SEGMENT_ID: u32 = 1;
const WORKER_NUM: usize = 4;

#[tokio::main(flavor = "multi_thread", worker_threads = 6)]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SchedulerConfig {
        workers: WORKER_NUM,
        ..SchedulerConfig::default()
    };
    let segment = Arc::new(Segment::new(SEGMENT_ID, config.page_count));
    let report =
        OperationScheduler::schedule_with_task(global_lock_manager(), segment.clone(), config)
            .await?;
    println!(
        "committed = {}, aborted = {}, segment total = {}",
        report.committed,
        report.aborted,
        segment.total()
    );
    anyhow::ensure!(
        report.committed_writes == segment.total(),
        "lost updates: expected {} got {}",
        report.committed_writes,
        segment.total()
    );
    Ok(())
}
