//! Result aggregator: write-once outcome slots reassembled in input order

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::outcome::{JobStatus, TransferOutcome, TransferReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    /// The slot already holds an outcome
    AlreadyRecorded(usize),
    OutOfRange { index: usize, len: usize },
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRecorded(i) => write!(f, "outcome for record {i} already recorded"),
            Self::OutOfRange { index, len } => {
                write!(f, "record index {index} out of range (job has {len} records)")
            }
        }
    }
}

impl std::error::Error for AggregateError {}

/// Collects outcomes from any worker in any order.
///
/// One slot per input record; each slot can be written exactly once.
pub struct Aggregator {
    slots: Vec<OnceLock<TransferOutcome>>,
    filled: AtomicUsize,
}

impl Aggregator {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
            filled: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn record(&self, index: usize, outcome: TransferOutcome) -> Result<(), AggregateError> {
        let slot = self.slots.get(index).ok_or(AggregateError::OutOfRange {
            index,
            len: self.slots.len(),
        })?;
        slot.set(outcome)
            .map_err(|_| AggregateError::AlreadyRecorded(index))?;
        self.filled.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&TransferOutcome> {
        self.slots.get(index).and_then(OnceLock::get)
    }

    /// Number of slots written so far
    pub fn filled(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    /// Ordered report; unwritten slots become `Incomplete`.
    pub fn finalize(self, status: JobStatus, elapsed: Duration) -> TransferReport {
        let outcomes = self
            .slots
            .into_iter()
            .map(|slot| slot.into_inner().unwrap_or(TransferOutcome::Incomplete))
            .collect();
        TransferReport::new(outcomes, status, elapsed)
    }
}
