//! Featline Core - shared infrastructure for feature store data movement
//!
//! Record model, error taxonomy, collaborator traits, retry and throttle
//! control, job context, atomic output files and file codecs used by the
//! transfer and export engines.

pub mod cancel;
pub mod codec;
pub mod context;
pub mod error;
pub mod logging;
pub mod ports;
pub mod progress;
pub mod record;
pub mod retry;
pub mod sink;
pub mod throttle;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use codec::{CodecError, FileFormat, InputEntry, read_entries, write_records};
pub use context::{EventSink, JobContext, ProgressEvent};
pub use error::{ErrorKind, RemoteError, RetryDecision, decision_for};
pub use logging::init_logging;
pub use ports::{
    ExportPage, FeatureDefinition, FeatureGroup, FeatureType, MetadataService,
    OfflineStoreConfig, OnlineStore, QueryEngine, QueryEstimate, QueryId, QueryState,
    ResultCursor,
};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use record::{DEFAULT_EVENT_TIME, Record, RecordLayout, Value};
pub use retry::{CallFailure, RetryPolicy, retry_with_backoff};
pub use sink::AtomicFile;
pub use throttle::ThrottleSignal;
