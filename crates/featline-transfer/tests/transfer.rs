//! End-to-end transfer jobs against in-memory fake stores

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use featline_core::{
    ErrorKind, FeatureGroup, InputEntry, JobContext, OnlineStore, ProgressEvent, Record,
    RemoteError, RetryPolicy, ThrottleSignal, Value, record,
};
use featline_transfer::{
    JobStatus, Payload, TransferOp, TransferOptions, TransferOutcome, transfer,
};

fn group() -> FeatureGroup {
    FeatureGroup {
        name: "customers".into(),
        record_identifier: "customer_id".into(),
        event_time: "EventTime".into(),
        features: vec![],
        online_enabled: true,
        offline: None,
    }
}

fn options(batch_size: usize, max_workers: usize, max_retries: u32) -> TransferOptions {
    TransferOptions {
        batch_size,
        max_workers,
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
    }
}

fn entries(n: usize) -> Vec<InputEntry> {
    (0..n)
        .map(|i| InputEntry::Record(record! { "customer_id" => format!("c{i}"), "n" => i as i64 }))
        .collect()
}

/// Upsert store keyed by `customer_id`; fails the first `fail_first` calls
/// per identifier with `fail_kind`.
#[derive(Default)]
struct FakeStore {
    data: Mutex<HashMap<String, Record>>,
    attempts: Mutex<HashMap<String, u32>>,
    calls: AtomicUsize,
    fail_first: u32,
    fail_kind: Option<ErrorKind>,
}

impl FakeStore {
    fn failing(fail_first: u32, kind: ErrorKind) -> Self {
        Self {
            fail_first,
            fail_kind: Some(kind),
            ..Default::default()
        }
    }

    fn maybe_fail(&self, id: &str) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut attempts = self.attempts.lock().unwrap();
        let n = attempts.entry(id.to_string()).or_insert(0);
        *n += 1;
        match self.fail_kind {
            Some(kind) if *n <= self.fail_first => Err(RemoteError::new(kind, format!("attempt {n}"))),
            _ => Ok(()),
        }
    }

    fn snapshot(&self) -> HashMap<String, Record> {
        self.data.lock().unwrap().clone()
    }
}

impl OnlineStore for FakeStore {
    fn get_record(
        &self,
        _fg: &str,
        identifier: &str,
        feature_names: Option<&[String]>,
    ) -> Result<Record, RemoteError> {
        self.maybe_fail(identifier)?;
        let data = self.data.lock().unwrap();
        let mut found = data
            .get(identifier)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(format!("record {identifier}")))?;
        if let Some(names) = feature_names {
            found.retain(|k, _| names.iter().any(|n| n == k));
        }
        Ok(found)
    }

    fn put_record(&self, _fg: &str, record: &Record) -> Result<(), RemoteError> {
        let id = record
            .identifier("customer_id")
            .ok_or_else(|| RemoteError::validation("no id"))?;
        self.maybe_fail(&id)?;
        self.data.lock().unwrap().insert(id, record.clone());
        Ok(())
    }
}

#[test]
fn zero_records_no_calls() {
    let store = FakeStore::default();
    let report = transfer(
        vec![],
        &TransferOp::Put,
        &group(),
        &store,
        &options(10, 4, 3),
        &JobContext::new(),
    )
    .unwrap();
    assert!(report.is_empty());
    assert_eq!(report.counts.total(), 0);
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_batch_size_rejected() {
    let store = FakeStore::default();
    let err = transfer(
        entries(3),
        &TransferOp::Put,
        &group(),
        &store,
        &options(0, 4, 3),
        &JobContext::new(),
    );
    assert!(err.is_err());
}

#[test]
fn twenty_five_records_three_batches() {
    let store = FakeStore::default();
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let sizes2 = sizes.clone();
    let ctx = JobContext::new().with_events(move |e| {
        if let ProgressEvent::BatchStarted { size, .. } = e {
            sizes2.lock().unwrap().push(*size);
        }
    });
    let report = transfer(entries(25), &TransferOp::Put, &group(), &store, &options(10, 4, 3), &ctx)
        .unwrap();
    assert_eq!(sizes.lock().unwrap().as_slice(), &[10, 10, 5]);
    assert_eq!(report.len(), 25);
    assert_eq!(report.counts.succeeded, 25);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 25);
    let stored = &snapshot["c7"];
    assert_eq!(stored.get("n"), Some(&Value::String("7".into())));
    assert!(stored.contains("EventTime"));
}

#[test]
fn replayed_put_is_idempotent() {
    let store = FakeStore::default();
    let input: Vec<InputEntry> = (0..12)
        .map(|i| {
            InputEntry::Record(record! {
                "customer_id" => format!("c{i}"),
                "EventTime" => "1700000000",
                "score" => 0.5,
            })
        })
        .collect();
    let opts = options(5, 3, 3);
    let first = transfer(input.clone(), &TransferOp::Put, &group(), &store, &opts, &JobContext::new())
        .unwrap();
    let state = store.snapshot();
    let second = transfer(input, &TransferOp::Put, &group(), &store, &opts, &JobContext::new()).unwrap();
    assert_eq!(store.snapshot(), state);
    assert!(first.outcomes.iter().all(TransferOutcome::is_success));
    assert!(second.outcomes.iter().all(TransferOutcome::is_success));
}

#[test]
fn retry_succeeds_below_budget() {
    let store = FakeStore::failing(2, ErrorKind::TransientNetwork);
    let report = transfer(entries(6), &TransferOp::Put, &group(), &store, &options(4, 2, 3), &JobContext::new())
        .unwrap();
    assert_eq!(report.counts.succeeded, 6);
    assert_eq!(store.calls.load(Ordering::SeqCst), 18);
}

#[test]
fn retry_exhausted_at_budget() {
    let store = FakeStore::failing(3, ErrorKind::Throttling);
    let ctx = JobContext::new().with_throttle(ThrottleSignal::new(Duration::from_millis(1), 10));
    let report = transfer(entries(4), &TransferOp::Put, &group(), &store, &options(4, 2, 3), &ctx)
        .unwrap();
    assert_eq!(report.counts.failed, 4);
    for (_, kind, message) in report.failures() {
        assert_eq!(kind, ErrorKind::RetriesExhausted);
        assert!(message.contains("attempt 3"), "{message}");
    }
    assert!(report.has_failures());
    assert!(store.snapshot().is_empty());
}

#[test]
fn throttling_raises_shared_signal() {
    let store = FakeStore::failing(1, ErrorKind::Throttling);
    let ctx = JobContext::new().with_throttle(ThrottleSignal::new(Duration::from_millis(1), 1000));
    let report = transfer(entries(3), &TransferOp::Put, &group(), &store, &options(3, 1, 3), &ctx).unwrap();
    assert_eq!(report.counts.succeeded, 3);
    assert!(ctx.throttle().is_raised());
}

#[test]
fn validation_failures_skip_remote_call() {
    let store = FakeStore::default();
    let input = vec![
        InputEntry::Record(record! { "customer_id" => "ok" }),
        InputEntry::Record(Record::new()),
        InputEntry::Record(record! { "name" => "no id" }),
        InputEntry::Invalid("not an object: 42".into()),
    ];
    let report = transfer(input, &TransferOp::Put, &group(), &store, &options(10, 2, 3), &JobContext::new())
        .unwrap();
    assert_eq!(report.outcomes[0], TransferOutcome::Success(Payload::Ack));
    assert_eq!(report.outcomes[1], TransferOutcome::skipped("empty record"));
    assert!(matches!(
        report.outcomes[2],
        TransferOutcome::Failure { kind: ErrorKind::Validation, .. }
    ));
    assert_eq!(report.outcomes[3], TransferOutcome::skipped("not an object: 42"));
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn get_keeps_input_order_and_reports_not_found() {
    let store = FakeStore::default();
    transfer(entries(5), &TransferOp::Put, &group(), &store, &options(10, 4, 3), &JobContext::new())
        .unwrap();

    let lookups = vec![
        InputEntry::Record(record! { "customer_id" => "c4" }),
        InputEntry::Record(record! { "id" => "missing" }),
        InputEntry::Record(record! { "record_id" => "c1" }),
    ];
    let op = TransferOp::Get {
        feature_names: Some(vec!["customer_id".into(), "n".into()]),
        current_time: false,
    };
    let report = transfer(lookups, &op, &group(), &store, &options(2, 3, 3), &JobContext::new()).unwrap();
    assert!(matches!(
        report.outcomes[1],
        TransferOutcome::Failure { kind: ErrorKind::NotFound, .. }
    ));
    let fetched: Vec<&Record> = report.fetched_records().collect();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0], &record! { "customer_id" => "c4", "n" => "4" });
    assert_eq!(fetched[1].identifier("customer_id"), Some("c1".into()));
}

#[test]
fn get_current_time_rewrites_event_time() {
    let store = FakeStore::default();
    transfer(entries(1), &TransferOp::Put, &group(), &store, &options(1, 1, 3), &JobContext::new())
        .unwrap();
    let op = TransferOp::Get {
        feature_names: None,
        current_time: true,
    };
    let report = transfer(
        vec![InputEntry::Record(record! { "customer_id" => "c0" })],
        &op,
        &group(),
        &store,
        &options(1, 1, 3),
        &JobContext::new(),
    )
    .unwrap();
    let fetched = report.fetched_records().next().unwrap();
    let ts = fetched.get("EventTime").and_then(Value::as_str).unwrap();
    assert_eq!(ts.len(), "2024-01-01T00:00:00Z".len());
    assert!(ts.ends_with('Z') && ts.contains('T'));
}

#[test]
fn authorization_aborts_remaining_work() {
    let store = FakeStore::failing(u32::MAX, ErrorKind::Authorization);
    let report = transfer(entries(20), &TransferOp::Put, &group(), &store, &options(5, 1, 3), &JobContext::new())
        .unwrap();
    assert!(matches!(report.status, JobStatus::Aborted(_)));
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.incomplete, 19);
    assert_eq!(report.len(), 20);
}

#[test]
fn cancellation_leaves_rest_incomplete() {
    let store = FakeStore::default();
    let ctx = JobContext::new();
    let handle = ctx.clone();
    let ctx = ctx.with_events(move |e| {
        if let ProgressEvent::BatchCompleted { batch: 0, .. } = e {
            handle.cancel();
        }
    });
    let report = transfer(entries(30), &TransferOp::Put, &group(), &store, &options(10, 2, 3), &ctx).unwrap();
    assert_eq!(report.status, JobStatus::Cancelled);
    assert_eq!(report.counts.succeeded, 10);
    assert_eq!(report.counts.incomplete, 20);
    assert!(report.has_failures());
}
