use crate::ident::{PageId, TransactionId};
use crate::lock_mgr::{LockError, LockManager};
use crate::operation::{OpType, Operation};
use crate::segment::Segment;
use anyhow::{ensure, Result};
use rand::Rng;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_TRANSACTIONS_PER_WORKER: usize = 1000;
const DEFAULT_OPS_PER_TRANSACTION: usize = 4;
const DEFAULT_WRITE_RATIO: f64 = 0.3;
const DEFAULT_PAGE_COUNT: u32 = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub transactions_per_worker: usize,
    pub ops_per_transaction: usize,
    /// Pages the operations are spread over, counted from page 0 of the segment.
    pub page_count: u32,
    /// Probability that an operation is a write.
    pub write_ratio: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            transactions_per_worker: DEFAULT_TRANSACTIONS_PER_WORKER,
            ops_per_transaction: DEFAULT_OPS_PER_TRANSACTION,
            page_count: DEFAULT_PAGE_COUNT,
            write_ratio: DEFAULT_WRITE_RATIO,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SchedulerReport {
    pub committed: u64,
    pub aborted: u64,
    /// Increments applied by committed transactions.
    pub committed_writes: i64,
}

impl SchedulerReport {
    fn merge(&mut self, other: SchedulerReport) {
        self.committed += other.committed;
        self.aborted += other.aborted;
        self.committed_writes += other.committed_writes;
    }
}

/// Drives random read/write transactions against a segment under two-phase locking.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct OperationScheduler;

impl OperationScheduler {
    pub fn new_operations(
        txn: TransactionId,
        segment: &Segment,
        config: &SchedulerConfig,
    ) -> Vec<Operation<PageId, TransactionId>> {
        let mut rng = rand::thread_rng();
        (0..config.ops_per_transaction)
            .map(|_| {
                let pid = segment.page_id(rng.gen_range(0..config.page_count));
                let op_type = if rng.gen_bool(config.write_ratio) {
                    OpType::Write
                } else {
                    OpType::Read
                };
                Operation::new(txn, pid, op_type)
            })
            .collect()
    }

    /// Run `ops` as one transaction. Writes are buffered and applied at commit,
    /// while the exclusive locks are still held. Returns the number of increments.
    pub fn run_transaction(
        lock_mgr: &LockManager<PageId, TransactionId>,
        segment: &Segment,
        ops: &[Operation<PageId, TransactionId>],
    ) -> Result<i64> {
        let mut pending: HashMap<PageId, i64> = HashMap::new();
        let mut increments = 0;
        for op in ops {
            lock_mgr.acquire(&op.resource, &op.txn, op.lock_mode())?;
            match op.op_type() {
                OpType::Read => {
                    segment.read(&op.resource)?;
                }
                OpType::Write => {
                    let current = match pending.get(&op.resource) {
                        Some(value) => *value,
                        None => segment.read(&op.resource)?,
                    };
                    pending.insert(op.resource, current + 1);
                    increments += 1;
                }
            }
        }
        for (pid, value) in pending {
            segment.write(&pid, value)?;
        }
        Ok(increments)
    }

    fn run_worker(
        lock_mgr: &LockManager<PageId, TransactionId>,
        segment: &Segment,
        config: &SchedulerConfig,
        worker_num: usize,
    ) -> Result<SchedulerReport> {
        let mut report = SchedulerReport::default();
        for _ in 0..config.transactions_per_worker {
            let txn = TransactionId::new();
            let ops = OperationScheduler::new_operations(txn, segment, config);
            let outcome = OperationScheduler::run_transaction(lock_mgr, segment, &ops);
            lock_mgr.release_all(&txn);
            match outcome {
                Ok(increments) => {
                    report.committed += 1;
                    report.committed_writes += increments;
                }
                Err(err) if err.downcast_ref::<LockError>().is_some() => {
                    debug!(worker_num, %txn, "transaction aborted: {}", err);
                    report.aborted += 1;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }

    /// Run `config.workers` workers on the blocking pool until each has finished
    /// its transactions.
    pub async fn schedule_with_task<L>(
        lock_mgr: L,
        segment: Arc<Segment>,
        config: SchedulerConfig,
    ) -> Result<SchedulerReport>
    where
        L: Borrow<LockManager<PageId, TransactionId>> + Clone + Send + 'static,
    {
        ensure!(
            config.page_count > 0 && config.page_count <= segment.capacity(),
            "page_count {} does not fit a segment of {} pages",
            config.page_count,
            segment.capacity()
        );
        let mut join_handlers = vec![];
        for worker_num in 0..config.workers {
            let lock_mgr = lock_mgr.clone();
            let segment = segment.clone();
            let config = config.clone();
            join_handlers.push(tokio::task::spawn_blocking(move || {
                let lock_mgr: &LockManager<PageId, TransactionId> = lock_mgr.borrow();
                OperationScheduler::run_worker(lock_mgr, &segment, &config, worker_num)
            }));
        }
        let mut report = SchedulerReport::default();
        for worker_rs in futures::future::join_all(join_handlers).await {
            report.merge(worker_rs??);
        }
        info!(
            committed = report.committed,
            aborted = report.aborted,
            writes = report.committed_writes,
            "workload finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::TOTAL_UNITS;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    pub async fn test_schedule_keeps_writes_consistent() {
        let lock_mgr = Arc::new(LockManager::<PageId, TransactionId>::new());
        let segment = Arc::new(Segment::new(1, 8));
        let config = SchedulerConfig {
            workers: 4,
            transactions_per_worker: 200,
            ops_per_transaction: 3,
            page_count: 8,
            write_ratio: 0.5,
        };
        let report =
            OperationScheduler::schedule_with_task(lock_mgr.clone(), segment.clone(), config)
                .await
                .unwrap();
        assert_eq!(800, report.committed + report.aborted);
        assert_eq!(report.committed_writes, segment.total());
        for pid in segment.page_ids() {
            assert_eq!(TOTAL_UNITS, lock_mgr.available_units(&pid));
            assert_eq!(0, lock_mgr.waiting_count(&pid));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    pub async fn test_page_count_must_fit_segment() {
        let lock_mgr = Arc::new(LockManager::<PageId, TransactionId>::new());
        let segment = Arc::new(Segment::new(1, 4));
        let config = SchedulerConfig {
            page_count: 5,
            ..SchedulerConfig::default()
        };
        let rs = OperationScheduler::schedule_with_task(lock_mgr, segment, config).await;
        assert!(rs.is_err());
    }

    #[test]
    pub fn test_operations_stay_within_page_count() {
        let segment = Segment::new(1, 16);
        let config = SchedulerConfig {
            ops_per_transaction: 64,
            page_count: 2,
            ..SchedulerConfig::default()
        };
        let ops = OperationScheduler::new_operations(TransactionId::new(), &segment, &config);
        assert_eq!(64, ops.len());
        assert!(ops.iter().all(|op| op.resource.page_no < 2));
    }

    #[test]
    pub fn test_deadlock_aborts_transaction() {
        let lock_mgr = LockManager::<PageId, TransactionId>::new();
        let segment = Segment::new(1, 2);
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let (p0, p1) = (segment.page_id(0), segment.page_id(1));
        lock_mgr.acquire(&p0, &t1, OpType::Write.into()).unwrap();
        lock_mgr.acquire(&p1, &t2, OpType::Write.into()).unwrap();
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                OperationScheduler::run_transaction(
                    &lock_mgr,
                    &segment,
                    &[Operation::new(t1, p1, OpType::Read)],
                )
            });
            while lock_mgr.waiting_count(&p1) == 0 {
                std::thread::yield_now();
            }
            let err = OperationScheduler::run_transaction(
                &lock_mgr,
                &segment,
                &[Operation::new(t2, p0, OpType::Write)],
            )
            .unwrap_err();
            assert!(err.downcast_ref::<LockError>().unwrap().is_deadlock());
            lock_mgr.release_all(&t2);
            assert_eq!(0, waiter.join().unwrap().unwrap());
        });
        lock_mgr.release_all(&t1);
        assert_eq!(0, segment.total());
    }

    #[test]
    pub fn test_read_then_write_upgrades() {
        let lock_mgr = LockManager::<PageId, TransactionId>::new();
        let segment = Segment::new(1, 1);
        let txn = TransactionId::new();
        let pid = segment.page_id(0);
        let ops = [
            Operation::new(txn, pid, OpType::Read),
            Operation::new(txn, pid, OpType::Write),
            Operation::new(txn, pid, OpType::Write),
        ];
        assert_eq!(2, OperationScheduler::run_transaction(&lock_mgr, &segment, &ops).unwrap());
        assert!(lock_mgr.has_lock_mode(&pid, &txn, crate::lock::LockMode::Exclusive));
        lock_mgr.release_all(&txn);
        assert_eq!(2, segment.total());
    }
}
