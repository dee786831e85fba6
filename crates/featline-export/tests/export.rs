//! Export jobs against a scripted query engine

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use featline_core::{
    CancelToken, ErrorKind, ExportPage, JobContext, ProgressEvent, QueryEngine, QueryEstimate,
    QueryId, QueryState, Record, RemoteError, ResultCursor, RetryPolicy, Value, record,
};
use featline_export::{
    ExportError, ExportFormat, ExportJob, ExportOutcome, ExportSummary, QuerySpec,
    TransformConfig, export,
};
use tempfile::TempDir;

/// Engine whose poll states, result rows and failures are fixed up front.
struct ScriptedEngine {
    states: Mutex<VecDeque<QueryState>>,
    rows: Vec<Record>,
    columns: Vec<String>,
    page_size: usize,
    submit_failures: AtomicUsize,
    submitted: AtomicUsize,
    cancelled: AtomicBool,
    cancel_after_pages: Option<(usize, CancelToken)>,
}

impl ScriptedEngine {
    fn new(rows: Vec<Record>) -> Self {
        let columns = featline_core::codec::header_union(&rows);
        Self {
            states: Mutex::new(VecDeque::from([QueryState::Running, QueryState::Succeeded])),
            rows,
            columns,
            page_size: 3,
            submit_failures: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            cancel_after_pages: None,
        }
    }

    fn with_states(mut self, states: Vec<QueryState>) -> Self {
        self.states = Mutex::new(states.into());
        self
    }
}

impl QueryEngine for ScriptedEngine {
    fn submit(&self, _sql: &str, _output_location: &str) -> Result<QueryId, RemoteError> {
        if self
            .submit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RemoteError::transient("connection reset"));
        }
        let n = self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(QueryId(format!("q-{n}")))
    }

    fn poll(&self, _id: &QueryId) -> Result<QueryState, RemoteError> {
        let mut states = self.states.lock().unwrap();
        // Last state sticks
        if states.len() > 1 {
            Ok(states.pop_front().unwrap())
        } else {
            Ok(states.front().cloned().unwrap_or(QueryState::Running))
        }
    }

    fn open_results(
        &self,
        _id: &QueryId,
        _page_size: usize,
    ) -> Result<Box<dyn ResultCursor>, RemoteError> {
        Ok(Box::new(VecCursor {
            rows: self.rows.clone().into(),
            columns: self.columns.clone(),
            page_size: self.page_size,
            pages: 0,
            cancel_after: self.cancel_after_pages.clone(),
        }))
    }

    fn estimate(&self, _sql: &str) -> Result<QueryEstimate, RemoteError> {
        Ok(QueryEstimate {
            rows: Some(100),
            columns: Some(4),
        })
    }

    fn list_tables(&self, _database: &str) -> Result<Vec<String>, RemoteError> {
        Ok(vec!["customers".into()])
    }

    fn cancel(&self, _id: &QueryId) -> Result<(), RemoteError> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct VecCursor {
    rows: VecDeque<Record>,
    columns: Vec<String>,
    page_size: usize,
    pages: usize,
    cancel_after: Option<(usize, CancelToken)>,
}

impl ResultCursor for VecCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_page(&mut self) -> Result<Option<ExportPage>, RemoteError> {
        if let Some((after, token)) = &self.cancel_after {
            if self.pages >= *after {
                token.cancel();
            }
        }
        if self.rows.is_empty() {
            return Ok(None);
        }
        let n = self.page_size.min(self.rows.len());
        self.pages += 1;
        Ok(Some(ExportPage {
            rows: self.rows.drain(..n).collect(),
        }))
    }
}

fn customers(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| record! { "customer_id" => format!("c{i}"), "age" => 20 + i as i64 })
        .collect()
}

fn job(dir: &Path, file: &str, format: ExportFormat) -> ExportJob {
    let mut job = ExportJob::new(
        QuerySpec::new("sagemaker_featurestore", "customers"),
        dir.join(file),
        format,
    );
    job.poll_interval = Duration::from_millis(1);
    job.max_wait = Duration::from_secs(5);
    job.retry = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    };
    job
}

fn completed(outcome: ExportOutcome) -> ExportSummary {
    match outcome {
        ExportOutcome::Completed(s) => s,
        ExportOutcome::DryRun(r) => panic!("unexpected dry run: {r:?}"),
    }
}

fn recording_ctx() -> (JobContext, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let ctx = JobContext::new().with_events(move |e| sink.lock().unwrap().push(e.clone()));
    (ctx, events)
}

fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[test]
fn csv_rechunked_with_single_header() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(customers(5));
    let mut job = job(dir.path(), "out.csv", ExportFormat::Csv);
    job.chunk_size = 2;
    let (ctx, events) = recording_ctx();

    let summary = completed(export(&job, &engine, &ctx).unwrap());
    assert_eq!(summary.rows_read, 5);
    assert_eq!(summary.rows_written, 5);
    assert_eq!(summary.chunks_written, 3);
    assert_eq!(summary.rows_rejected, 0);

    let text = std::fs::read_to_string(dir.path().join("out.csv")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "customer_id,age");
    assert_eq!(lines.iter().filter(|l| l.starts_with("customer_id")).count(), 1);
    assert_eq!(summary.bytes_written as usize, text.len());

    let events = events.lock().unwrap();
    let chunk_rows: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::ChunkWritten { rows, .. } => Some(*rows),
            _ => None,
        })
        .collect();
    assert_eq!(chunk_rows, vec![2, 2, 1]);
    let states: Vec<&QueryState> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::QueryState { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![&QueryState::Running, &QueryState::Succeeded]);
}

#[test]
fn online_compatible_export_injects_event_time() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(customers(3));
    let mut job = job(dir.path(), "out.jsonl", ExportFormat::Json);
    job.transform = Some(TransformConfig::new("customer_id"));

    let summary = completed(export(&job, &engine, &JobContext::new()).unwrap());
    assert_eq!(summary.rows_written, 3);

    let text = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
    for line in text.lines() {
        let row: Record = serde_json::from_str(line).unwrap();
        assert!(matches!(row.get("age"), Some(Value::String(_))));
        let ts = row.get("EventTime").and_then(Value::as_str).unwrap();
        assert!(!ts.is_empty() && ts.chars().all(|c| c.is_ascii_digit()), "{ts}");
    }
}

fn mixed_rows() -> Vec<Record> {
    vec![
        record! { "customer_id" => "c0", "age" => 31i64, "score" => 0.25, "vip" => true, "note" => "first" },
        record! { "customer_id" => "c1", "age" => -4i64, "score" => 12.5, "vip" => false, "note" => Value::Null },
        record! { "customer_id" => "c2", "age" => Value::Null, "score" => -1.75, "vip" => Value::Null, "note" => "a \"quoted\", line" },
    ]
}

fn read_json_lines(path: &Path) -> Vec<Record> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn json_lines_export_round_trips_values() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(mixed_rows());
    let mut job = job(dir.path(), "out.jsonl", ExportFormat::Json);
    job.chunk_size = 2;

    let summary = completed(export(&job, &engine, &JobContext::new()).unwrap());
    assert_eq!(summary.rows_written, 3);
    assert_eq!(read_json_lines(&dir.path().join("out.jsonl")), mixed_rows());
}

#[test]
fn compatible_json_lines_export_holds_string_values() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(mixed_rows());
    let mut job = job(dir.path(), "out.jsonl", ExportFormat::Json);
    let mut transform = TransformConfig::new("customer_id");
    transform.inject_event_time = false;
    job.transform = Some(transform);

    completed(export(&job, &engine, &JobContext::new()).unwrap());
    let expected = vec![
        record! { "customer_id" => "c0", "age" => "31", "score" => "0.25", "vip" => "true", "note" => "first" },
        record! { "customer_id" => "c1", "age" => "-4", "score" => "12.5", "vip" => "false", "note" => "" },
        record! { "customer_id" => "c2", "age" => "", "score" => "-1.75", "vip" => "", "note" => "a \"quoted\", line" },
    ];
    assert_eq!(read_json_lines(&dir.path().join("out.jsonl")), expected);
}

#[test]
fn rows_without_identifier_are_counted_and_skipped() {
    let dir = TempDir::new().unwrap();
    let mut rows = customers(3);
    rows.insert(1, record! { "age" => 40i64 });
    rows.push(record! { "customer_id" => "", "age" => 41i64 });
    let engine = ScriptedEngine::new(rows);
    let mut job = job(dir.path(), "out.csv", ExportFormat::Csv);
    job.transform = Some(TransformConfig::new("customer_id"));

    let summary = completed(export(&job, &engine, &JobContext::new()).unwrap());
    assert_eq!(summary.rows_read, 5);
    assert_eq!(summary.rows_written, 3);
    assert_eq!(summary.rows_rejected, 2);
    assert!(
        summary
            .rejection_samples
            .iter()
            .all(|r| r.kind == ErrorKind::MissingIdentifier)
    );
}

#[test]
fn cancellation_mid_export_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let token = CancelToken::new();
    let mut engine = ScriptedEngine::new(customers(20));
    engine.cancel_after_pages = Some((1, token.clone()));
    let mut job = job(dir.path(), "out.csv.gz", ExportFormat::Csv);
    job.chunk_size = 2;
    job.compress = true;
    let ctx = JobContext::new().with_cancel(token);

    let err = export(&job, &engine, &ctx).unwrap_err();
    assert!(matches!(err, ExportError::Cancelled), "{err}");
    assert!(dir_is_empty(dir.path()));
}

#[test]
fn query_timeout_cancels_engine_query() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(customers(1)).with_states(vec![QueryState::Running]);
    let mut job = job(dir.path(), "out.csv", ExportFormat::Csv);
    job.max_wait = Duration::from_millis(30);
    job.poll_interval = Duration::from_millis(5);

    let err = export(&job, &engine, &JobContext::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryTimeout);
    assert!(engine.cancelled.load(Ordering::SeqCst));
    assert!(dir_is_empty(dir.path()));
}

#[test]
fn failed_query_reports_engine_reason() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(customers(1)).with_states(vec![
        QueryState::Submitted,
        QueryState::Failed("column age2 not found".into()),
    ]);
    let job = job(dir.path(), "out.csv", ExportFormat::Csv);

    match export(&job, &engine, &JobContext::new()).unwrap_err() {
        ExportError::QueryFailed { reason, .. } => assert_eq!(reason, "column age2 not found"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(dir_is_empty(dir.path()));
}

#[test]
fn dry_run_estimates_without_submitting() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(customers(1));
    let mut job = job(dir.path(), "out.csv", ExportFormat::Csv);
    job.dry_run = true;
    job.query.limit = Some(10);

    match export(&job, &engine, &JobContext::new()).unwrap() {
        ExportOutcome::DryRun(report) => {
            assert_eq!(
                report.query,
                r#"SELECT * FROM "sagemaker_featurestore"."customers" LIMIT 10"#
            );
            assert_eq!(report.estimated_rows, Some(100));
            assert_eq!(report.estimated_columns, Some(4));
            assert_eq!(report.estimated_bytes, Some(6400));
        }
        ExportOutcome::Completed(_) => panic!("dry run executed the query"),
    }
    assert_eq!(engine.submitted.load(Ordering::SeqCst), 0);
    assert!(dir_is_empty(dir.path()));
}

#[test]
fn empty_result_still_produces_parquet_file() {
    let dir = TempDir::new().unwrap();
    let mut engine = ScriptedEngine::new(Vec::new());
    engine.columns = vec!["customer_id".into(), "age".into()];
    let job = job(dir.path(), "out.parquet", ExportFormat::Parquet);

    let summary = completed(export(&job, &engine, &JobContext::new()).unwrap());
    assert_eq!(summary.rows_written, 0);
    assert_eq!(summary.chunks_written, 0);
    assert!(dir.path().join("out.parquet").exists());
}

#[test]
fn transient_submit_failure_is_retried() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(customers(2));
    engine.submit_failures.store(2, Ordering::SeqCst);
    let job = job(dir.path(), "out.csv", ExportFormat::Csv);

    let summary = completed(export(&job, &engine, &JobContext::new()).unwrap());
    assert_eq!(summary.query_id, QueryId("q-0".into()));
    assert_eq!(summary.rows_written, 2);
}

#[test]
fn invalid_job_rejected_before_submit() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(customers(2));
    let mut job = job(dir.path(), "out.csv", ExportFormat::Csv);
    job.chunk_size = 0;

    let err = export(&job, &engine, &JobContext::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(engine.submitted.load(Ordering::SeqCst), 0);
}

#[test]
fn pre_cancelled_job_never_submits() {
    let dir = TempDir::new().unwrap();
    let engine = ScriptedEngine::new(customers(2));
    let job = job(dir.path(), "out.csv", ExportFormat::Csv);
    let ctx = JobContext::new();
    ctx.cancel();

    assert!(matches!(export(&job, &engine, &ctx), Err(ExportError::Cancelled)));
    assert_eq!(engine.submitted.load(Ordering::SeqCst), 0);
}
