//! DuckDB query engine over a Parquet offline store
//!
//! Layout: `<root>/<database>/<table>/*.parquet`. Every table directory with
//! at least one Parquet file is exposed as the view `"<database>"."<table>"`.
//! Submitted queries run on their own thread and connection and are
//! materialized with `COPY ... TO` a Parquet file at the output location.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use duckdb::Connection;
use featline_core::{QueryEngine, QueryEstimate, QueryId, QueryState, RemoteError, ResultCursor};

use crate::cursor::ParquetResultCursor;

struct QueryEntry {
    state: QueryState,
    result: PathBuf,
    cancelled: Arc<AtomicBool>,
}

type QueryTable = Arc<Mutex<HashMap<QueryId, QueryEntry>>>;

pub struct DuckDbQueryEngine {
    root: PathBuf,
    /// Used when a job gives no output location
    results_dir: PathBuf,
    account_id: Option<String>,
    queries: QueryTable,
    next_id: AtomicU64,
}

impl DuckDbQueryEngine {
    pub fn new(root: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            results_dir: results_dir.into(),
            account_id: None,
            queries: Arc::default(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    fn set_state(queries: &QueryTable, id: &QueryId, state: QueryState) {
        if let Ok(mut map) = queries.lock() {
            if let Some(entry) = map.get_mut(id) {
                // A cancelled query stays cancelled
                if entry.state != QueryState::Cancelled {
                    entry.state = state;
                }
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<QueryId, QueryEntry>>, RemoteError> {
        self.queries
            .lock()
            .map_err(|_| RemoteError::transient("query table poisoned"))
    }
}

/// Open an in-memory connection with every offline table as a view.
pub fn connect(root: &Path) -> duckdb::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    for stmt in create_table_views(root) {
        conn.execute_batch(&stmt)?;
    }
    Ok(conn)
}

/// `CREATE SCHEMA` / `CREATE VIEW` statements for the offline tables under `root`.
pub fn create_table_views(root: &Path) -> Vec<String> {
    let mut stmts = Vec::new();
    for database in subdirectories(root) {
        let db_dir = root.join(&database);
        let tables: Vec<String> = subdirectories(&db_dir)
            .into_iter()
            .filter(|t| has_parquet_files(&db_dir.join(t)))
            .collect();
        if tables.is_empty() {
            continue;
        }
        stmts.push(format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(&database)
        ));
        for table in tables {
            let pattern = db_dir.join(&table).join("*.parquet");
            stmts.push(format!(
                "CREATE OR REPLACE VIEW {}.{} AS SELECT * FROM read_parquet({})",
                quote_ident(&database),
                quote_ident(&table),
                quote_literal(&pattern.to_string_lossy())
            ));
        }
    }
    stmts
}

fn has_parquet_files(dir: &Path) -> bool {
    let pattern = dir.join("*.parquet");
    glob::glob(&pattern.to_string_lossy())
        .ok()
        .and_then(|mut g| g.next())
        .is_some()
}

/// Sorted names of the directories directly under `dir`.
fn subdirectories(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn sql_error(e: duckdb::Error) -> RemoteError {
    RemoteError::validation(e.to_string())
}

/// Run `sql` to completion, writing its result to `result`.
fn run_query(root: &Path, sql: &str, result: &Path) -> duckdb::Result<()> {
    let conn = connect(root)?;
    conn.execute_batch(&format!(
        "COPY ({sql}) TO {} (FORMAT PARQUET)",
        quote_literal(&result.to_string_lossy())
    ))
}

impl QueryEngine for DuckDbQueryEngine {
    fn submit(&self, sql: &str, output_location: &str) -> Result<QueryId, RemoteError> {
        let location = if output_location.trim().is_empty() {
            self.results_dir.clone()
        } else {
            PathBuf::from(output_location)
        };
        std::fs::create_dir_all(&location)?;

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let hash = blake3::hash(sql.as_bytes()).to_hex();
        let id = QueryId(format!("{}-{n}", &hash.as_str()[..12]));
        let result = location.join(format!("{id}.parquet"));
        let cancelled = Arc::new(AtomicBool::new(false));

        self.lock()?.insert(
            id.clone(),
            QueryEntry {
                state: QueryState::Submitted,
                result: result.clone(),
                cancelled: cancelled.clone(),
            },
        );

        log::debug!("Query {id} submitted: {sql}");
        let queries = self.queries.clone();
        let root = self.root.clone();
        let sql = sql.to_string();
        let thread_id = id.clone();
        std::thread::Builder::new()
            .name(format!("query-{id}"))
            .spawn(move || {
                Self::set_state(&queries, &thread_id, QueryState::Running);
                let outcome = run_query(&root, &sql, &result);
                if cancelled.load(Ordering::SeqCst) {
                    let _ = std::fs::remove_file(&result);
                    return;
                }
                let state = match outcome {
                    Ok(()) => QueryState::Succeeded,
                    Err(e) => {
                        log::debug!("Query {thread_id} failed: {e}");
                        QueryState::Failed(e.to_string())
                    }
                };
                Self::set_state(&queries, &thread_id, state);
            })?;
        Ok(id)
    }

    fn poll(&self, id: &QueryId) -> Result<QueryState, RemoteError> {
        self.lock()?
            .get(id)
            .map(|e| e.state.clone())
            .ok_or_else(|| RemoteError::not_found(format!("unknown query {id}")))
    }

    fn open_results(
        &self,
        id: &QueryId,
        page_size: usize,
    ) -> Result<Box<dyn ResultCursor>, RemoteError> {
        let result = {
            let map = self.lock()?;
            let entry = map
                .get(id)
                .ok_or_else(|| RemoteError::not_found(format!("unknown query {id}")))?;
            if entry.state != QueryState::Succeeded {
                return Err(RemoteError::validation(format!(
                    "query {id} has no result (state {})",
                    entry.state
                )));
            }
            entry.result.clone()
        };
        Ok(Box::new(ParquetResultCursor::open(&result, page_size)?))
    }

    fn estimate(&self, sql: &str) -> Result<QueryEstimate, RemoteError> {
        let conn = connect(&self.root).map_err(sql_error)?;
        let rows: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM ({sql})"), [], |r| r.get(0))
            .map_err(sql_error)?;

        let mut stmt = conn
            .prepare(&format!("SELECT * FROM ({sql}) LIMIT 0"))
            .map_err(sql_error)?;
        let described = stmt.query([]).map_err(sql_error)?;
        let columns = described.as_ref().map(|s| s.column_count());

        Ok(QueryEstimate {
            rows: u64::try_from(rows).ok(),
            columns,
        })
    }

    fn list_tables(&self, database: &str) -> Result<Vec<String>, RemoteError> {
        let dir = self.root.join(database);
        if !dir.is_dir() {
            return Err(RemoteError::not_found(format!(
                "database '{database}' not found under {}",
                self.root.display()
            )));
        }
        Ok(subdirectories(&dir))
    }

    fn cancel(&self, id: &QueryId) -> Result<(), RemoteError> {
        let mut map = self.lock()?;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| RemoteError::not_found(format!("unknown query {id}")))?;
        if !entry.state.is_terminal() {
            entry.cancelled.store(true, Ordering::SeqCst);
            entry.state = QueryState::Cancelled;
            log::info!("Cancelled query {id}");
        }
        Ok(())
    }

    fn account_id(&self) -> Option<String> {
        self.account_id.clone()
    }
}

impl std::fmt::Debug for DuckDbQueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbQueryEngine")
            .field("root", &self.root)
            .field("results_dir", &self.results_dir)
            .finish_non_exhaustive()
    }
}
