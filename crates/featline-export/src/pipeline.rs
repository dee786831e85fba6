//! Streaming export: submit, wait, page through the result, write chunks
//!
//! The export is strictly sequential. The query runs on the engine; this side
//! only polls, then pulls pages through a forward-only cursor, re-chunks them
//! to `chunk_size` rows, runs the optional compatibility transform and
//! appends each chunk to the output file.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use featline_core::{
    JobContext, ProgressEvent, QueryEngine, QueryId, QueryState, Record, retry_with_backoff,
};

use crate::error::ExportError;
use crate::job::ExportJob;
use crate::query::build_query;
use crate::transform::{CompatTransform, RowRejection};
use crate::writer::ChunkWriter;

/// Rejections kept verbatim in the summary
pub const REJECTION_SAMPLES: usize = 5;

/// Average encoded size assumed per value for dry-run size estimates
const ESTIMATED_BYTES_PER_VALUE: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunReport {
    pub query: String,
    pub estimated_rows: Option<u64>,
    pub estimated_columns: Option<usize>,
    pub estimated_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub query_id: QueryId,
    pub query: String,
    pub rows_read: usize,
    pub rows_written: usize,
    pub rows_rejected: usize,
    pub rejection_samples: Vec<RowRejection>,
    pub chunks_written: usize,
    pub bytes_written: u64,
    pub output: PathBuf,
    pub elapsed: Duration,
}

impl ExportSummary {
    pub fn log(&self) {
        log::info!(
            "Export {}: {} rows read, {} written, {} rejected in {} chunks ({:.1}s)",
            self.query_id,
            self.rows_read,
            self.rows_written,
            self.rows_rejected,
            self.chunks_written,
            self.elapsed.as_secs_f64()
        );
        for r in &self.rejection_samples {
            log::warn!("  rejected: {r}");
        }
        if self.rows_rejected > self.rejection_samples.len() {
            log::warn!(
                "  ... and {} more",
                self.rows_rejected - self.rejection_samples.len()
            );
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Completed(ExportSummary),
    DryRun(DryRunReport),
}

/// Run `job` against `engine`.
///
/// Cancellation is honoured while waiting for the query and between chunks;
/// a cancelled or failed export leaves no file at `job.output`.
pub fn export(
    job: &ExportJob,
    engine: &dyn QueryEngine,
    ctx: &JobContext,
) -> Result<ExportOutcome, ExportError> {
    job.validate()?;
    let sql = build_query(&job.query);
    log::debug!("Export query: {sql}");

    if job.dry_run {
        return dry_run(job, engine, ctx, sql).map(ExportOutcome::DryRun);
    }
    if ctx.is_cancelled() {
        return Err(ExportError::Cancelled);
    }

    let start = Instant::now();
    let query_id = retry_with_backoff("submit", &job.retry, ctx, |_| {
        engine.submit(&sql, &job.output_location)
    })?;
    log::info!("Submitted query {query_id}");

    wait_for_query(job, engine, ctx, &query_id)?;

    let mut cursor = retry_with_backoff("open results", &job.retry, ctx, |_| {
        engine.open_results(&query_id, job.chunk_size)
    })?;

    let mut sink = ChunkSink {
        transform: job.transform.as_ref().map(CompatTransform::new),
        writer: ChunkWriter::create(&job.output, job.format, job.compress)?,
        rows_read: 0,
        rows_rejected: 0,
        samples: Vec::new(),
        chunks: 0,
    };

    let mut buffer: Vec<Record> = Vec::with_capacity(job.chunk_size);
    loop {
        if ctx.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let Some(page) = cursor.next_page()? else {
            break;
        };
        buffer.extend(page.rows);
        while buffer.len() >= job.chunk_size {
            let chunk: Vec<Record> = buffer.drain(..job.chunk_size).collect();
            sink.write(chunk, ctx)?;
            if ctx.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
        }
    }
    if !buffer.is_empty() {
        sink.write(buffer, ctx)?;
    }

    if let Some(collisions) = sink.transform.as_ref().map(CompatTransform::collisions) {
        if collisions > 0 {
            log::warn!("{collisions} fields were overwritten by columns mapped to the same name");
        }
    }

    let rows_written = sink.writer.rows_written();
    let bytes_written = sink.writer.finish(cursor.columns())?;
    let summary = ExportSummary {
        query_id,
        query: sql,
        rows_read: sink.rows_read,
        rows_written,
        rows_rejected: sink.rows_rejected,
        rejection_samples: sink.samples,
        chunks_written: sink.chunks,
        bytes_written,
        output: job.output.clone(),
        elapsed: start.elapsed(),
    };
    summary.log();
    Ok(ExportOutcome::Completed(summary))
}

fn dry_run(
    job: &ExportJob,
    engine: &dyn QueryEngine,
    ctx: &JobContext,
    sql: String,
) -> Result<DryRunReport, ExportError> {
    let estimate = retry_with_backoff("estimate", &job.retry, ctx, |_| engine.estimate(&sql))?;
    let estimated_bytes = match (estimate.rows, estimate.columns) {
        (Some(rows), Some(cols)) => Some(rows * cols as u64 * ESTIMATED_BYTES_PER_VALUE),
        _ => None,
    };
    log::info!("Dry run, query not executed: {sql}");
    Ok(DryRunReport {
        query: sql,
        estimated_rows: estimate.rows,
        estimated_columns: estimate.columns,
        estimated_bytes,
    })
}

/// Poll until the query reaches a terminal state, `max_wait` elapses, or the
/// job is cancelled. Each state change is emitted once.
fn wait_for_query(
    job: &ExportJob,
    engine: &dyn QueryEngine,
    ctx: &JobContext,
    query_id: &QueryId,
) -> Result<(), ExportError> {
    let started = Instant::now();
    let mut last: Option<QueryState> = None;
    loop {
        let state = retry_with_backoff("poll", &job.retry, ctx, |_| engine.poll(query_id))?;
        if last.as_ref() != Some(&state) {
            log::debug!("Query {query_id}: {state}");
            ctx.emit(ProgressEvent::QueryState {
                query_id: query_id.clone(),
                state: state.clone(),
            });
            last = Some(state.clone());
        }

        match state {
            QueryState::Succeeded => return Ok(()),
            QueryState::Failed(reason) => {
                return Err(ExportError::QueryFailed {
                    query_id: query_id.clone(),
                    reason,
                });
            }
            QueryState::Cancelled => {
                return Err(ExportError::QueryFailed {
                    query_id: query_id.clone(),
                    reason: "query was cancelled by the engine".into(),
                });
            }
            QueryState::Submitted | QueryState::Running => {}
        }

        let waited = started.elapsed();
        if waited >= job.max_wait {
            cancel_query(engine, query_id);
            return Err(ExportError::QueryTimeout {
                query_id: query_id.clone(),
                waited,
            });
        }
        if !ctx.cancel_token().sleep(job.poll_interval.min(job.max_wait - waited)) {
            cancel_query(engine, query_id);
            return Err(ExportError::Cancelled);
        }
    }
}

fn cancel_query(engine: &dyn QueryEngine, query_id: &QueryId) {
    if let Err(e) = engine.cancel(query_id) {
        log::warn!("Failed to cancel query {query_id}: {e}");
    }
}

/// Transform + write state for one export.
struct ChunkSink {
    transform: Option<CompatTransform>,
    writer: ChunkWriter,
    rows_read: usize,
    rows_rejected: usize,
    samples: Vec<RowRejection>,
    chunks: usize,
}

impl ChunkSink {
    fn write(&mut self, chunk: Vec<Record>, ctx: &JobContext) -> Result<(), ExportError> {
        self.rows_read += chunk.len();
        let mut rejected = Vec::new();
        let rows: Vec<Record> = match &self.transform {
            Some(t) => chunk
                .into_iter()
                .filter_map(|row| t.apply(row).map_err(|r| rejected.push(r)).ok())
                .collect(),
            None => chunk,
        };
        let before = self.writer.rows_written();
        rejected.extend(self.writer.write_chunk(&rows)?);

        let written = self.writer.rows_written() - before;
        let rejected_here = rejected.len();
        self.rows_rejected += rejected_here;
        let room = REJECTION_SAMPLES.saturating_sub(self.samples.len());
        self.samples.extend(rejected.into_iter().take(room));

        self.chunks += 1;
        log::debug!("Chunk {}: {written} rows, {rejected_here} rejected", self.chunks);
        ctx.emit(ProgressEvent::ChunkWritten {
            chunk: self.chunks,
            rows: written,
            rejected: rejected_here,
            rows_total: self.writer.rows_written(),
        });
        Ok(())
    }
}
