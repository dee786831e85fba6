//! Job-level export errors

use std::fmt;
use std::io;
use std::time::Duration;

use featline_core::{CallFailure, ErrorKind, QueryId, RemoteError};

#[derive(Debug)]
pub enum ExportError {
    /// Malformed job (bad mapping, zero chunk size, unknown format)
    Validation(String),
    /// Query engine call failed
    Engine(RemoteError),
    QueryTimeout { query_id: QueryId, waited: Duration },
    QueryFailed { query_id: QueryId, reason: String },
    Cancelled,
    Io(io::Error),
    /// Arrow / Parquet encoding failure
    Encode(String),
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Engine(e) => e.kind,
            Self::QueryTimeout { .. } => ErrorKind::QueryTimeout,
            Self::QueryFailed { .. } => ErrorKind::QueryFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) | Self::Encode(_) => ErrorKind::Transform,
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "ValidationError: {msg}"),
            Self::Engine(e) => write!(f, "query engine error: {e}"),
            Self::QueryTimeout { query_id, waited } => write!(
                f,
                "QueryTimeout: query {query_id} did not finish within {}s",
                waited.as_secs()
            ),
            Self::QueryFailed { query_id, reason } => {
                write!(f, "QueryFailed: query {query_id}: {reason}")
            }
            Self::Cancelled => write!(f, "export cancelled"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Encode(msg) => write!(f, "encoding error: {msg}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Engine(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RemoteError> for ExportError {
    fn from(e: RemoteError) -> Self {
        Self::Engine(e)
    }
}

impl From<CallFailure> for ExportError {
    fn from(f: CallFailure) -> Self {
        match f.kind {
            ErrorKind::Cancelled => Self::Cancelled,
            kind => Self::Engine(RemoteError::new(kind, f.message)),
        }
    }
}

impl From<io::Error> for ExportError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for ExportError {
    fn from(e: csv::Error) -> Self {
        Self::Io(e.into())
    }
}

impl From<arrow::error::ArrowError> for ExportError {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::Encode(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for ExportError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Self::Encode(e.to_string())
    }
}
