//! Per-record outcomes and the ordered transfer report

use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use featline_core::{AtomicFile, ErrorKind, Record, RetryDecision, decision_for};
use serde::Serialize;

/// What a successful call returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Write acknowledged
    Ack,
    /// Record read back from the store
    Record(Record),
}

/// Exactly one per input record.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Success(Payload),
    Failure { kind: ErrorKind, message: String },
    Skipped { reason: String },
    /// Never attempted (job cancelled or aborted first)
    Incomplete,
}

impl TransferOutcome {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// A failure whose kind stops the whole job
    pub fn aborts_job(&self) -> bool {
        match self {
            Self::Failure { kind, .. } => decision_for(*kind) == RetryDecision::AbortJob,
            _ => false,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Failure { .. } => "failure",
            Self::Skipped { .. } => "skipped",
            Self::Incomplete => "incomplete",
        }
    }
}

/// How the job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Cancelled,
    Aborted(String),
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub incomplete: usize,
}

impl TransferCounts {
    pub fn tally<'a>(outcomes: impl IntoIterator<Item = &'a TransferOutcome>) -> Self {
        let mut c = Self::default();
        for o in outcomes {
            match o {
                TransferOutcome::Success(_) => c.succeeded += 1,
                TransferOutcome::Failure { .. } => c.failed += 1,
                TransferOutcome::Skipped { .. } => c.skipped += 1,
                TransferOutcome::Incomplete => c.incomplete += 1,
            }
        }
        c
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped + self.incomplete
    }
}

/// Final report: one outcome per input index, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub outcomes: Vec<TransferOutcome>,
    pub counts: TransferCounts,
    pub elapsed: Duration,
    pub status: JobStatus,
}

impl TransferReport {
    pub fn new(outcomes: Vec<TransferOutcome>, status: JobStatus, elapsed: Duration) -> Self {
        let counts = TransferCounts::tally(&outcomes);
        Self {
            outcomes,
            counts,
            elapsed,
            status,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Any failed or unattempted record
    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0 || self.counts.incomplete > 0
    }

    /// Records returned by a get job, in input order
    pub fn fetched_records(&self) -> impl Iterator<Item = &Record> {
        self.outcomes.iter().filter_map(|o| match o {
            TransferOutcome::Success(Payload::Record(r)) => Some(r),
            _ => None,
        })
    }

    /// `(index, kind, message)` for every failed record
    pub fn failures(&self) -> impl Iterator<Item = (usize, ErrorKind, &str)> {
        self.outcomes.iter().enumerate().filter_map(|(i, o)| match o {
            TransferOutcome::Failure { kind, message } => Some((i, *kind, message.as_str())),
            _ => None,
        })
    }

    pub fn log(&self) {
        log::info!("=== Transfer Summary ===");
        log::info!(
            "Records: {} succeeded, {} failed, {} skipped of {} ({})",
            self.counts.succeeded,
            self.counts.failed,
            self.counts.skipped,
            self.len(),
            self.status
        );
        if self.counts.incomplete > 0 {
            log::warn!("{} records were not attempted", self.counts.incomplete);
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
        let secs = self.elapsed.as_secs_f64();
        if self.counts.succeeded > 0 && secs > 0.0 {
            log::info!("Throughput: {:.0} records/sec", self.counts.succeeded as f64 / secs);
        }
    }

    /// Write the report to `path`: JSON for `.json`, plain text otherwise.
    pub fn write_log(&self, path: &Path) -> io::Result<()> {
        let mut file = AtomicFile::create(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::to_writer_pretty(&mut file, &LogDocument::from(self))?;
            file.write_all(b"\n")?;
        } else {
            self.write_text(&mut file)?;
        }
        file.commit()?;
        Ok(())
    }

    fn write_text(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "status: {}", self.status)?;
        writeln!(out, "elapsed_secs: {:.3}", self.elapsed.as_secs_f64())?;
        writeln!(
            out,
            "succeeded: {}\nfailed: {}\nskipped: {}\nincomplete: {}",
            self.counts.succeeded, self.counts.failed, self.counts.skipped, self.counts.incomplete
        )?;
        writeln!(out)?;
        for (i, o) in self.outcomes.iter().enumerate() {
            match o {
                TransferOutcome::Failure { kind, message } => {
                    writeln!(out, "{i}\t{}\t{kind}: {message}", o.status())?
                }
                TransferOutcome::Skipped { reason } => writeln!(out, "{i}\t{}\t{reason}", o.status())?,
                _ => writeln!(out, "{i}\t{}", o.status())?,
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct LogEntry<'a> {
    index: usize,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a Record>,
}

#[derive(Serialize)]
struct LogDocument<'a> {
    status: String,
    elapsed_secs: f64,
    counts: TransferCounts,
    records: Vec<LogEntry<'a>>,
}

impl<'a> From<&'a TransferReport> for LogDocument<'a> {
    fn from(report: &'a TransferReport) -> Self {
        let records = report
            .outcomes
            .iter()
            .enumerate()
            .map(|(index, o)| {
                let mut entry = LogEntry {
                    index,
                    status: o.status(),
                    kind: None,
                    message: None,
                    record: None,
                };
                match o {
                    TransferOutcome::Success(Payload::Record(r)) => entry.record = Some(r),
                    TransferOutcome::Failure { kind, message } => {
                        entry.kind = Some(kind.as_str());
                        entry.message = Some(message);
                    }
                    TransferOutcome::Skipped { reason } => entry.message = Some(reason),
                    _ => {}
                }
                entry
            })
            .collect();
        Self {
            status: report.status.to_string(),
            elapsed_secs: report.elapsed.as_secs_f64(),
            counts: report.counts,
            records,
        }
    }
}
