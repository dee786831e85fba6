//! Rate-limited worker pool
//!
//! Batches run one after another on a dedicated rayon pool of `max_workers`
//! threads. Inside a batch, workers claim members through a [`WorkQueue`]
//! cursor, so at most `max_workers` operations are in flight at any instant.
//! Every claimed member yields exactly one outcome; once the job is cancelled
//! or aborted, nothing new is claimed and the rest stays `Incomplete`.

use std::sync::OnceLock;

use featline_core::{JobContext, ProgressEvent};

use crate::aggregator::Aggregator;
use crate::outcome::{TransferCounts, TransferOutcome};
use crate::planner::Batch;
use crate::work_queue::WorkQueue;

pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Why the pool stopped dispatching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolExit {
    Drained,
    Cancelled,
    /// A fatal error in one worker stopped the job
    Aborted(String),
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let workers = max_workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("featline-worker-{i}"))
            .build()?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `op` once per batch member, writing outcomes into `aggregator`.
    ///
    /// `op` receives the member's original index and item. A `Failure` whose
    /// kind aborts the job cancels `ctx`, so in-flight retries give up too.
    pub fn run<T, F>(
        &self,
        batches: &[Batch<T>],
        aggregator: &Aggregator,
        ctx: &JobContext,
        op: F,
    ) -> PoolExit
    where
        T: Sync,
        F: Fn(usize, &T) -> TransferOutcome + Sync,
    {
        let abort_reason: OnceLock<String> = OnceLock::new();
        let total = aggregator.len();

        for batch in batches {
            if ctx.is_cancelled() {
                break;
            }
            ctx.emit(ProgressEvent::BatchStarted {
                batch: batch.index,
                size: batch.len(),
            });
            log::debug!("Batch {} started ({} records)", batch.index, batch.len());

            let queue = WorkQueue::new(&batch.members);
            let workers = self.workers.min(batch.len());
            self.pool.scope(|s| {
                for _ in 0..workers {
                    s.spawn(|_| {
                        while !ctx.is_cancelled() {
                            let Some((index, item)) = queue.next() else {
                                break;
                            };
                            let outcome = op(*index, item);
                            if outcome.aborts_job() {
                                if let TransferOutcome::Failure { kind, message } = &outcome {
                                    if abort_reason.set(format!("{kind}: {message}")).is_ok() {
                                        log::error!("Aborting job: {kind}: {message}");
                                    }
                                }
                                ctx.cancel();
                            }
                            let ok = outcome.is_success();
                            if let Err(e) = aggregator.record(*index, outcome) {
                                log::error!("{e}");
                            }
                            ctx.emit(ProgressEvent::RecordCompleted { index: *index, ok });
                        }
                    });
                }
            });

            let counts = TransferCounts::tally(batch.indices().filter_map(|i| aggregator.get(i)));
            log::debug!(
                "Batch {} done: {} ok, {} failed, {} skipped",
                batch.index,
                counts.succeeded,
                counts.failed,
                counts.skipped
            );
            ctx.emit(ProgressEvent::BatchCompleted {
                batch: batch.index,
                succeeded: counts.succeeded,
                failed: counts.failed,
                skipped: counts.skipped,
                records_done: aggregator.filled(),
                records_total: total,
            });
        }

        if let Some(reason) = abort_reason.into_inner() {
            PoolExit::Aborted(reason)
        } else if ctx.is_cancelled() {
            PoolExit::Cancelled
        } else {
            PoolExit::Drained
        }
    }
}
