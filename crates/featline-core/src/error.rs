//! Error taxonomy shared by transfer and export jobs

use std::fmt;

use serde::Serialize;

/// Kind of failure, independent of which collaborator produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Bad input shape (record, option or request rejected by the store)
    Validation,
    /// Remote reported rate limiting
    Throttling,
    /// Timeout, connection reset, 5xx-style transient failure
    TransientNetwork,
    NotFound,
    Authorization,
    RetriesExhausted,
    Cancelled,
    QueryTimeout,
    QueryFailed,
    /// Exported row lacks a record identifier
    MissingIdentifier,
    /// Exported row could not be converted to the output format
    Transform,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Throttling => "ThrottlingError",
            Self::TransientNetwork => "TransientNetworkError",
            Self::NotFound => "NotFoundError",
            Self::Authorization => "AuthorizationError",
            Self::RetriesExhausted => "RetriesExhausted",
            Self::Cancelled => "Cancelled",
            Self::QueryTimeout => "QueryTimeout",
            Self::QueryFailed => "QueryFailed",
            Self::MissingIdentifier => "MissingIdentifier",
            Self::Transform => "TransformError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the retry controller does with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back off and try again
    Retry,
    /// Give up on this record only
    FailRecord,
    /// Give up on the whole job
    AbortJob,
}

/// Retry classification for a failure kind.
pub const fn decision_for(kind: ErrorKind) -> RetryDecision {
    match kind {
        ErrorKind::Throttling | ErrorKind::TransientNetwork => RetryDecision::Retry,
        ErrorKind::Authorization => RetryDecision::AbortJob,
        _ => RetryDecision::FailRecord,
    }
}

/// Error returned by a collaborator call (store, query engine, catalog).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttling, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientNetwork, message)
    }

    pub fn decision(&self) -> RetryDecision {
        decision_for(self.kind)
    }

    pub fn is_retryable(&self) -> bool {
        self.decision() == RetryDecision::Retry
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl From<std::io::Error> for RemoteError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match e.kind() {
            Io::TimedOut | Io::ConnectionReset | Io::ConnectionAborted | Io::Interrupted => {
                ErrorKind::TransientNetwork
            }
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::Authorization,
            Io::InvalidData | Io::InvalidInput => ErrorKind::Validation,
            _ => ErrorKind::TransientNetwork,
        };
        Self::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn throttling_and_network_retry() {
        assert_eq!(decision_for(ErrorKind::Throttling), RetryDecision::Retry);
        assert_eq!(
            decision_for(ErrorKind::TransientNetwork),
            RetryDecision::Retry
        );
    }

    #[test]
    fn authorization_aborts_job() {
        assert_eq!(
            decision_for(ErrorKind::Authorization),
            RetryDecision::AbortJob
        );
    }

    #[test]
    fn per_record_kinds_not_retried() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::RetriesExhausted,
            ErrorKind::Cancelled,
        ] {
            assert_eq!(decision_for(kind), RetryDecision::FailRecord, "{kind}");
        }
    }

    #[test]
    fn io_timeout_is_transient() {
        let err = RemoteError::from(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(err.kind, ErrorKind::TransientNetwork);
        assert!(err.is_retryable());
    }

    #[test]
    fn io_permission_denied_is_authorization() {
        let err = RemoteError::from(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(err.kind, ErrorKind::Authorization);
    }

    #[test]
    fn display_includes_kind() {
        let err = RemoteError::not_found("id 7");
        assert_eq!(format!("{err}"), "NotFoundError: id 7");
    }
}
