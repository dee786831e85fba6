//! Featline Transfer - concurrent bulk put/get against an online store
//!
//! Input entries are planned into batches, run on a bounded worker pool with
//! retry and throttle control, and reassembled into an input-ordered
//! [`TransferReport`].

pub mod aggregator;
pub mod ops;
pub mod outcome;
pub mod planner;
pub mod pool;
pub mod work_queue;

use std::fmt;
use std::time::Instant;

use featline_core::{FeatureGroup, InputEntry, JobContext, OnlineStore, ProgressEvent, RetryPolicy};

pub use aggregator::{AggregateError, Aggregator};
pub use ops::TransferOp;
pub use outcome::{JobStatus, Payload, TransferCounts, TransferOutcome, TransferReport};
pub use planner::{Batch, PlanError, plan};
pub use pool::{DEFAULT_MAX_WORKERS, PoolExit, WorkerPool};

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub batch_size: usize,
    pub max_workers: usize,
    pub retry: RetryPolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

/// Job-level errors raised before any record is dispatched.
#[derive(Debug)]
pub enum TransferError {
    Plan(PlanError),
    ThreadPool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan(e) => write!(f, "invalid transfer options: {e}"),
            Self::ThreadPool(e) => write!(f, "failed to create worker pool: {e}"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Plan(e) => Some(e),
            Self::ThreadPool(e) => Some(e),
        }
    }
}

impl From<PlanError> for TransferError {
    fn from(e: PlanError) -> Self {
        Self::Plan(e)
    }
}

impl From<rayon::ThreadPoolBuildError> for TransferError {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(e)
    }
}

/// Run `op` over every entry and return the ordered report.
///
/// The report always holds one outcome per entry. Per-record failures are
/// folded into it; only invalid options fail the whole call.
pub fn transfer(
    entries: Vec<InputEntry>,
    op: &TransferOp,
    group: &FeatureGroup,
    store: &dyn OnlineStore,
    options: &TransferOptions,
    ctx: &JobContext,
) -> Result<TransferReport, TransferError> {
    let start = Instant::now();
    let batches = plan(entries, options.batch_size)?;
    let total: usize = batches.iter().map(Batch::len).sum();
    let aggregator = Aggregator::new(total);

    ctx.emit(ProgressEvent::TransferStarted {
        records: total,
        batches: batches.len(),
    });
    if total == 0 {
        log::info!("No records to {}", op.name());
        return Ok(aggregator.finalize(JobStatus::Completed, start.elapsed()));
    }

    let pool = WorkerPool::new(options.max_workers)?;
    log::info!(
        "Bulk {}: {} records on '{}' in {} batches with {} workers",
        op.name(),
        total,
        group.name,
        batches.len(),
        pool.workers()
    );

    let exit = pool.run(&batches, &aggregator, ctx, |_, entry| {
        op.execute(entry, group, store, &options.retry, ctx)
    });
    let status = match exit {
        PoolExit::Drained => JobStatus::Completed,
        PoolExit::Cancelled => JobStatus::Cancelled,
        PoolExit::Aborted(reason) => JobStatus::Aborted(reason),
    };

    let report = aggregator.finalize(status, start.elapsed());
    report.log();
    Ok(report)
}
