//! Export job description

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use featline_core::{DEFAULT_EVENT_TIME, RetryPolicy};

use crate::error::ExportError;

pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_DATABASE: &str = "sagemaker_featurestore";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Header row, then one row per record
    Csv,
    /// One JSON object per line
    Json,
    Parquet,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Parquet => "parquet",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" | "jsonl" => Ok(Self::Json),
            "parquet" => Ok(Self::Parquet),
            other => Err(ExportError::Validation(format!(
                "unknown export format '{other}' (expected csv, json or parquet)"
            ))),
        }
    }
}

/// What to select from the offline store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub database: String,
    pub table: String,
    /// Empty selects every column
    pub columns: Vec<String>,
    pub where_clause: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
}

impl QuerySpec {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            columns: Vec::new(),
            where_clause: None,
            order_by: None,
            limit: None,
        }
    }
}

/// Row rewrite making exported rows ingestible by the online store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    /// User `old -> new` renames, applied before the event-time synonyms
    pub column_mapping: Vec<(String, String)>,
    pub record_identifier: String,
    pub event_time: String,
    /// Inject the current epoch seconds where the event time is missing (on by default)
    pub inject_event_time: bool,
}

impl TransformConfig {
    pub fn new(record_identifier: impl Into<String>) -> Self {
        Self {
            column_mapping: Vec::new(),
            record_identifier: record_identifier.into(),
            event_time: DEFAULT_EVENT_TIME.to_string(),
            inject_event_time: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub query: QuerySpec,
    pub output: PathBuf,
    pub format: ExportFormat,
    pub chunk_size: usize,
    /// gzip for csv/json, ZSTD pages for parquet
    pub compress: bool,
    pub transform: Option<TransformConfig>,
    /// Where the engine materializes results
    pub output_location: String,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    /// Applied to each engine call (submit, poll, open)
    pub retry: RetryPolicy,
    pub dry_run: bool,
}

impl ExportJob {
    pub fn new(query: QuerySpec, output: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            query,
            output: output.into(),
            format,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compress: false,
            transform: None,
            output_location: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }

    pub fn validate(&self) -> Result<(), ExportError> {
        if self.chunk_size == 0 {
            return Err(ExportError::Validation(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.query.table.trim().is_empty() {
            return Err(ExportError::Validation("no table to export from".into()));
        }
        if let Some(t) = &self.transform {
            if t.record_identifier.trim().is_empty() {
                return Err(ExportError::Validation(
                    "record identifier name must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Parse `old:new,old2:new2` into rename pairs.
pub fn parse_column_mapping(text: &str) -> Result<Vec<(String, String)>, ExportError> {
    text.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| {
            let (old, new) = pair.split_once(':').ok_or_else(|| {
                ExportError::Validation(format!(
                    "invalid column mapping '{pair}', expected 'old_name:new_name'"
                ))
            })?;
            let (old, new) = (old.trim(), new.trim());
            if old.is_empty() || new.is_empty() {
                return Err(ExportError::Validation(format!(
                    "invalid column mapping '{pair}', names must not be empty"
                )));
            }
            Ok((old.to_string(), new.to_string()))
        })
        .collect()
}
