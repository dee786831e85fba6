//! Job-scoped context shared by every worker of one transfer or export

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::ports::{QueryId, QueryState};
use crate::throttle::ThrottleSignal;

/// Structured progress emitted by the engines; rendering is up to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    TransferStarted {
        records: usize,
        batches: usize,
    },
    BatchStarted {
        batch: usize,
        size: usize,
    },
    RecordCompleted {
        index: usize,
        ok: bool,
    },
    BatchCompleted {
        batch: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        records_done: usize,
        records_total: usize,
    },
    QueryState {
        query_id: QueryId,
        state: QueryState,
    },
    ChunkWritten {
        chunk: usize,
        rows: usize,
        rejected: usize,
        rows_total: usize,
    },
}

pub type EventSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Cancellation, throttle signal and progress sink for one job.
///
/// Cheap to clone; clones share all state.
#[derive(Clone, Default)]
pub struct JobContext {
    cancel: CancelToken,
    throttle: Arc<ThrottleSignal>,
    events: Option<EventSink>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("throttled", &self.throttle.is_raised())
            .finish_non_exhaustive()
    }
}

impl JobContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_throttle(mut self, throttle: ThrottleSignal) -> Self {
        self.throttle = Arc::new(throttle);
        self
    }

    pub fn with_events(mut self, sink: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> Self {
        self.events = Some(Arc::new(sink));
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn throttle(&self) -> &ThrottleSignal {
        &self.throttle
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.events {
            sink(&event);
        }
    }
}
