//! Compatibility transform for offline → online store rows
//!
//! Per row: rename columns, coerce every value to its string form, inject the
//! event time when missing, and reject rows without a record identifier.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use featline_core::{ErrorKind, Record, Value};
use rustc_hash::FxHashMap;

use crate::job::TransformConfig;

/// Column names treated as the event time when no user mapping covers them.
pub const EVENT_TIME_SYNONYMS: [&str; 4] = ["event_time", "eventtime", "timestamp", "created_at"];

/// A row dropped from the output, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRejection {
    pub kind: ErrorKind,
    pub message: String,
}

impl RowRejection {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

pub struct CompatTransform {
    renames: FxHashMap<String, String>,
    identifier: String,
    event_time: String,
    /// Epoch seconds string injected into rows lacking an event time
    inject: Option<String>,
    collisions: AtomicUsize,
}

impl CompatTransform {
    /// Build from `config`, stamping injected event times with the current time.
    pub fn new(config: &TransformConfig) -> Self {
        Self::with_timestamp(config, chrono::Utc::now().timestamp())
    }

    pub fn with_timestamp(config: &TransformConfig, epoch_seconds: i64) -> Self {
        let mut renames: FxHashMap<String, String> = EVENT_TIME_SYNONYMS
            .iter()
            .map(|s| (s.to_string(), config.event_time.clone()))
            .collect();
        // User mapping wins per field
        for (old, new) in &config.column_mapping {
            renames.insert(old.clone(), new.clone());
        }
        Self {
            renames,
            identifier: config.record_identifier.clone(),
            event_time: config.event_time.clone(),
            inject: config
                .inject_event_time
                .then(|| epoch_seconds.to_string()),
            collisions: AtomicUsize::new(0),
        }
    }

    /// Fields overwritten because two columns of a row ended up with the same name.
    pub fn collisions(&self) -> usize {
        self.collisions.load(Ordering::Relaxed)
    }

    pub fn apply(&self, row: Record) -> Result<Record, RowRejection> {
        let mut out = Record::with_capacity(row.len() + 1);
        for (original, value) in row {
            let name = match self.renames.get(&original) {
                Some(new) => new.clone(),
                None => original.clone(),
            };
            if out.contains(&name) && self.collisions.fetch_add(1, Ordering::Relaxed) == 0 {
                log::warn!("Several columns map to '{name}'; keeping the value from '{original}'");
            }
            out.insert(name, Value::String(value.to_online_string()));
        }

        if let Some(now) = &self.inject {
            if out.get(&self.event_time).map_or(true, Value::is_blank) {
                out.insert(self.event_time.clone(), now.clone());
            }
        }

        if out.identifier(&self.identifier).is_none() {
            return Err(RowRejection::new(
                ErrorKind::MissingIdentifier,
                format!("row has no value for record identifier '{}'", self.identifier),
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featline_core::record;

    fn config() -> TransformConfig {
        TransformConfig::new("customer_id")
    }

    #[test]
    fn injects_event_time_and_keeps_other_fields() {
        let t = CompatTransform::with_timestamp(&config(), 1_700_000_000);
        let out = t
            .apply(record! { "customer_id" => 12i64, "age" => 30i64, "vip" => true, "note" => Value::Null })
            .unwrap();
        assert_eq!(
            out,
            record! {
                "customer_id" => "12",
                "age" => "30",
                "vip" => "true",
                "note" => "",
                "EventTime" => "1700000000",
            }
        );
    }

    #[test]
    fn synonyms_map_to_event_time() {
        let t = CompatTransform::with_timestamp(&config(), 1);
        let out = t
            .apply(record! { "customer_id" => "c", "created_at" => "2024-05-01" })
            .unwrap();
        assert_eq!(out.get("EventTime"), Some(&Value::String("2024-05-01".into())));
        assert!(!out.contains("created_at"));
    }

    #[test]
    fn user_mapping_wins_over_synonym() {
        let mut cfg = config();
        cfg.column_mapping = vec![
            ("timestamp".into(), "ingested_at".into()),
            ("cust".into(), "customer_id".into()),
        ];
        let t = CompatTransform::with_timestamp(&cfg, 99);
        let out = t.apply(record! { "cust" => "c1", "timestamp" => "t0" }).unwrap();
        assert_eq!(out.get("ingested_at"), Some(&Value::String("t0".into())));
        assert_eq!(out.get("EventTime"), Some(&Value::String("99".into())));
        assert_eq!(out.identifier("customer_id"), Some("c1".into()));
    }

    #[test]
    fn custom_event_time_name() {
        let mut cfg = config();
        cfg.event_time = "ts".into();
        let t = CompatTransform::with_timestamp(&cfg, 5);
        let out = t.apply(record! { "customer_id" => "c", "eventtime" => "x" }).unwrap();
        assert_eq!(out.get("ts"), Some(&Value::String("x".into())));
    }

    #[test]
    fn no_injection_when_disabled() {
        let cfg = TransformConfig {
            inject_event_time: false,
            ..config()
        };
        let t = CompatTransform::with_timestamp(&cfg, 5);
        let out = t.apply(record! { "customer_id" => "c" }).unwrap();
        assert!(!out.contains("EventTime"));
    }

    #[test]
    fn mapping_alone_still_injects_event_time() {
        let mut cfg = config();
        cfg.column_mapping = vec![("cust".into(), "customer_id".into())];
        let t = CompatTransform::with_timestamp(&cfg, 1_700_000_000);
        let out = t.apply(record! { "cust" => "c1", "age" => 3i64 }).unwrap();
        assert_eq!(
            out,
            record! { "customer_id" => "c1", "age" => "3", "EventTime" => "1700000000" }
        );
    }

    #[test]
    fn colliding_columns_counted_last_wins() {
        let t = CompatTransform::with_timestamp(&config(), 1);
        let out = t
            .apply(record! { "customer_id" => "c", "timestamp" => "t1", "created_at" => "t2" })
            .unwrap();
        assert_eq!(out, record! { "customer_id" => "c", "EventTime" => "t2" });
        assert_eq!(t.collisions(), 1);

        t.apply(record! { "customer_id" => "d", "timestamp" => "t3" }).unwrap();
        assert_eq!(t.collisions(), 1);
    }

    #[test]
    fn missing_identifier_rejected() {
        let t = CompatTransform::with_timestamp(&config(), 1);
        for row in [record! { "age" => 1i64 }, record! { "customer_id" => Value::Null }] {
            let err = t.apply(row).unwrap_err();
            assert_eq!(err.kind, ErrorKind::MissingIdentifier);
        }
    }
}
