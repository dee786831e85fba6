//! Featline Export - offline store query to a local file
//!
//! Builds the query, waits for the engine, then streams the result in fixed
//! size chunks through the optional online-compatibility transform into a
//! CSV, JSON-lines or Parquet file that is only published on success.

pub mod error;
pub mod job;
pub mod pipeline;
pub mod query;
pub mod transform;
pub mod writer;

pub use error::ExportError;
pub use job::{
    DEFAULT_CHUNK_SIZE, DEFAULT_DATABASE, ExportFormat, ExportJob, QuerySpec, TransformConfig,
    parse_column_mapping,
};
pub use pipeline::{DryRunReport, ExportOutcome, ExportSummary, export};
pub use query::{build_query, resolve_table_name, table_candidates};
pub use transform::{CompatTransform, EVENT_TIME_SYNONYMS, RowRejection};
pub use writer::ChunkWriter;
