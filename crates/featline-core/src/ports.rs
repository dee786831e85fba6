//! Collaborator interfaces: online store, offline query engine, metadata
//!
//! The engine only talks to remote systems through these traits. Local
//! implementations live in `featline-local`; tests provide their own fakes.

use std::fmt;

use serde::Deserialize;

use crate::error::RemoteError;
use crate::record::{DEFAULT_EVENT_TIME, Record, RecordLayout};

/// Declared type of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    String,
    Integral,
    Fractional,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeatureDefinition {
    pub name: String,
    #[serde(rename = "type", default = "default_feature_type")]
    pub feature_type: FeatureType,
}

fn default_feature_type() -> FeatureType {
    FeatureType::String
}

/// Where the offline copy of a feature group can be queried.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OfflineStoreConfig {
    pub database: String,
    /// Table name if known; otherwise resolved from the feature group name
    pub table: Option<String>,
}

/// Feature group metadata as returned by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeatureGroup {
    pub name: String,
    pub record_identifier: String,
    #[serde(default = "default_event_time")]
    pub event_time: String,
    /// Declared features; empty means "schema unknown, accept all"
    #[serde(default)]
    pub features: Vec<FeatureDefinition>,
    #[serde(default = "default_true")]
    pub online_enabled: bool,
    pub offline: Option<OfflineStoreConfig>,
}

fn default_event_time() -> String {
    DEFAULT_EVENT_TIME.to_string()
}

fn default_true() -> bool {
    true
}

impl FeatureGroup {
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::new(&self.record_identifier, &self.event_time)
    }

    /// Whether `name` is a declared feature (always true without a schema).
    ///
    /// Identifier and event-time names are always accepted.
    pub fn accepts(&self, name: &str) -> bool {
        self.features.is_empty()
            || name == self.record_identifier
            || name == self.event_time
            || self.features.iter().any(|f| f.name == name)
    }
}

pub trait MetadataService: Send + Sync {
    fn describe(&self, feature_group: &str) -> Result<FeatureGroup, RemoteError>;

    fn list(&self) -> Result<Vec<String>, RemoteError>;
}

/// Low-latency key-value store holding the latest record per identifier.
pub trait OnlineStore: Send + Sync {
    /// Fetch one record; a missing identifier is a `NotFound` error.
    fn get_record(
        &self,
        feature_group: &str,
        identifier: &str,
        feature_names: Option<&[String]>,
    ) -> Result<Record, RemoteError>;

    /// Full-replacement upsert keyed by the record identifier.
    fn put_record(&self, feature_group: &str, record: &Record) -> Result<(), RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryId(pub String);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a submitted offline query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    Submitted,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed(_) => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "FAILED ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One forward-only page of query result rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportPage {
    pub rows: Vec<Record>,
}

/// Size estimate for a query that has not been run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryEstimate {
    pub rows: Option<u64>,
    pub columns: Option<usize>,
}

/// Forward-only cursor over a finished query's result.
pub trait ResultCursor: Send {
    fn columns(&self) -> &[String];

    /// Next page, or `None` once the result is exhausted.
    fn next_page(&mut self) -> Result<Option<ExportPage>, RemoteError>;
}

/// Query engine over the offline store.
pub trait QueryEngine: Send + Sync {
    /// Submit `sql`, materializing results under `output_location`.
    fn submit(&self, sql: &str, output_location: &str) -> Result<QueryId, RemoteError>;

    fn poll(&self, id: &QueryId) -> Result<QueryState, RemoteError>;

    fn open_results(
        &self,
        id: &QueryId,
        page_size: usize,
    ) -> Result<Box<dyn ResultCursor>, RemoteError>;

    /// Estimate result size without running the query.
    fn estimate(&self, sql: &str) -> Result<QueryEstimate, RemoteError>;

    fn list_tables(&self, database: &str) -> Result<Vec<String>, RemoteError>;

    /// Best-effort cancellation of a running query.
    fn cancel(&self, _id: &QueryId) -> Result<(), RemoteError> {
        Ok(())
    }

    /// Account id used as a table-name suffix by some catalogs.
    fn account_id(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(features: &[&str]) -> FeatureGroup {
        FeatureGroup {
            name: "customers".into(),
            record_identifier: "customer_id".into(),
            event_time: "EventTime".into(),
            features: features
                .iter()
                .map(|n| FeatureDefinition {
                    name: n.to_string(),
                    feature_type: FeatureType::String,
                })
                .collect(),
            online_enabled: true,
            offline: None,
        }
    }

    #[test]
    fn accepts_everything_without_schema() {
        assert!(group(&[]).accepts("anything"));
    }

    #[test]
    fn accepts_declared_and_key_fields() {
        let g = group(&["age"]);
        assert!(g.accepts("age"));
        assert!(g.accepts("customer_id"));
        assert!(g.accepts("EventTime"));
        assert!(!g.accepts("balance"));
    }

    #[test]
    fn terminal_states() {
        assert!(!QueryState::Running.is_terminal());
        assert!(QueryState::Succeeded.is_terminal());
        assert!(QueryState::Failed("x".into()).is_terminal());
        assert_eq!(format!("{}", QueryState::Failed("boom".into())), "FAILED (boom)");
    }
}
