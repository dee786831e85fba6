//! Bulk put / bulk get: per-record validation and the wrapped store call

use chrono::Utc;
use featline_core::{
    ErrorKind, FeatureGroup, InputEntry, JobContext, OnlineStore, Record, RecordLayout,
    RetryPolicy, Value, retry_with_backoff,
};

use crate::outcome::{Payload, TransferOutcome};

/// Identifier field names tried, after the feature group's own, for lookups.
pub const IDENTIFIER_FALLBACKS: [&str; 4] =
    ["record_id", "id", "RecordIdentifier", "record_identifier"];

/// Event-time format written by `--current-time`.
pub const CURRENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOp {
    /// Upsert each record into the online store
    Put,
    /// Fetch each record by identifier
    Get {
        feature_names: Option<Vec<String>>,
        /// Rewrite the event time of fetched records to now
        current_time: bool,
    },
}

impl TransferOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Get { .. } => "get",
        }
    }

    /// Produce the outcome for one input entry.
    pub fn execute(
        &self,
        entry: &InputEntry,
        group: &FeatureGroup,
        store: &dyn OnlineStore,
        policy: &RetryPolicy,
        ctx: &JobContext,
    ) -> TransferOutcome {
        let record = match entry {
            InputEntry::Record(r) => r,
            InputEntry::Invalid(why) => return TransferOutcome::skipped(why.clone()),
        };
        match self {
            Self::Put => execute_put(record, group, store, policy, ctx),
            Self::Get {
                feature_names,
                current_time,
            } => execute_get(
                record,
                group,
                store,
                feature_names.as_deref(),
                *current_time,
                policy,
                ctx,
            ),
        }
    }
}

/// Current time as Unix-epoch seconds, in string form.
pub fn epoch_seconds_now() -> String {
    Utc::now().timestamp().to_string()
}

/// Validate and normalize a record for the online store.
///
/// Returns the ready-to-send record, or the outcome that replaces the call.
pub fn prepare_put(record: &Record, group: &FeatureGroup) -> Result<Record, TransferOutcome> {
    if record.is_empty() {
        return Err(TransferOutcome::skipped("empty record"));
    }

    let mut kept = record.clone();
    let mut dropped: Vec<String> = Vec::new();
    kept.retain(|name, _| {
        let ok = group.accepts(name);
        if !ok {
            dropped.push(name.to_string());
        }
        ok
    });
    if !dropped.is_empty() {
        log::warn!(
            "Dropping features not defined in '{}': {}",
            group.name,
            dropped.join(", ")
        );
    }
    if kept.is_empty() {
        return Err(TransferOutcome::skipped("no valid features"));
    }

    let layout = group.layout();
    if kept.identifier(&layout.identifier).is_none() {
        return Err(TransferOutcome::failure(
            ErrorKind::Validation,
            format!("missing record identifier '{}'", layout.identifier),
        ));
    }
    if kept.get(&layout.event_time).map_or(true, Value::is_blank) {
        kept.insert(layout.event_time.clone(), epoch_seconds_now());
    }
    Ok(kept.to_online_strings())
}

/// Identifier to look up: the layout's field, the usual fallbacks, then the
/// first non-blank value.
pub fn lookup_identifier(record: &Record, layout: &RecordLayout) -> Option<String> {
    std::iter::once(layout.identifier.as_str())
        .chain(IDENTIFIER_FALLBACKS)
        .find_map(|field| record.identifier(field))
        .or_else(|| {
            record
                .iter()
                .map(|(_, v)| v)
                .find(|v| !v.is_blank())
                .map(Value::to_online_string)
        })
}

fn execute_put(
    record: &Record,
    group: &FeatureGroup,
    store: &dyn OnlineStore,
    policy: &RetryPolicy,
    ctx: &JobContext,
) -> TransferOutcome {
    let prepared = match prepare_put(record, group) {
        Ok(r) => r,
        Err(outcome) => return outcome,
    };
    let label = format!(
        "put {}",
        prepared.identifier(&group.record_identifier).unwrap_or_default()
    );
    match retry_with_backoff(&label, policy, ctx, |_| store.put_record(&group.name, &prepared)) {
        Ok(()) => TransferOutcome::Success(Payload::Ack),
        Err(f) => TransferOutcome::failure(f.kind, f.message),
    }
}

fn execute_get(
    record: &Record,
    group: &FeatureGroup,
    store: &dyn OnlineStore,
    feature_names: Option<&[String]>,
    current_time: bool,
    policy: &RetryPolicy,
    ctx: &JobContext,
) -> TransferOutcome {
    if record.is_empty() {
        return TransferOutcome::skipped("empty record");
    }
    let layout = group.layout();
    let Some(identifier) = lookup_identifier(record, &layout) else {
        return TransferOutcome::failure(ErrorKind::Validation, "no record identifier in entry");
    };
    let label = format!("get {identifier}");
    let fetched = retry_with_backoff(&label, policy, ctx, |_| {
        store.get_record(&group.name, &identifier, feature_names)
    });
    match fetched {
        Ok(mut found) => {
            if current_time {
                let now = Utc::now().format(CURRENT_TIME_FORMAT).to_string();
                found.insert(layout.event_time, now);
            }
            TransferOutcome::Success(Payload::Record(found))
        }
        Err(f) => TransferOutcome::failure(f.kind, f.message),
    }
}
