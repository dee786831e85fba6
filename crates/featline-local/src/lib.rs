//! Featline Local - file and DuckDB backed collaborators
//!
//! A TOML feature-group catalog, a JSON-file online store and a DuckDB query
//! engine over a Parquet offline store. Together they let the transfer and
//! export engines run against a local directory tree.

pub mod catalog;
pub mod cursor;
pub mod offline;
pub mod online;

pub use catalog::TomlCatalog;
pub use cursor::{ParquetResultCursor, batch_to_records};
pub use offline::DuckDbQueryEngine;
pub use online::FileOnlineStore;
