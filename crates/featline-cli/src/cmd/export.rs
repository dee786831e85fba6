//! export subcommand - offline store query to a CSV / JSON-lines / Parquet file

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use featline_core::{CancelToken, FeatureGroup, JobContext, QueryEngine, SharedProgress};
use featline_export::{
    ExportError, ExportFormat, ExportJob, ExportOutcome, QuerySpec, TransformConfig, export,
    parse_column_mapping, resolve_table_name,
};
use featline_local::DuckDbQueryEngine;

use super::{EXIT_CANCELLED, describe_group, open_catalog, split_list};
use crate::config::Config;
use crate::render;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Feature group to export
    pub feature_group: String,

    /// Output file path
    pub output_file: PathBuf,

    /// Output format: csv, json (JSON lines) or parquet
    #[arg(short, long, default_value = "csv")]
    pub format: ExportFormat,

    /// Maximum number of rows
    #[arg(long)]
    pub limit: Option<u64>,

    /// SQL WHERE condition
    #[arg(long = "where")]
    pub where_clause: Option<String>,

    /// Columns to export (comma-separated)
    #[arg(long)]
    pub columns: Option<String>,

    /// ORDER BY expression
    #[arg(long)]
    pub order_by: Option<String>,

    /// gzip csv/json output, ZSTD-compress parquet pages
    #[arg(long)]
    pub compress: bool,

    /// Rows per written chunk [default: 10000]
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Where the engine materializes query results
    #[arg(long)]
    pub output_location: Option<String>,

    /// Offline store database [default: from the feature group, else sagemaker_featurestore]
    #[arg(long)]
    pub database: Option<String>,

    /// Rewrite rows so bulk-put can ingest them
    #[arg(long)]
    pub online_compatible: bool,

    /// Column renames, e.g. "event_time:EventTime,customer_id:record_id"
    #[arg(long)]
    pub column_mapping: Option<String>,

    /// Rewrite rows and add the event-time field where it is missing
    #[arg(long)]
    pub add_event_time: bool,

    /// Record identifier field name [default: from the feature group]
    #[arg(long)]
    pub record_identifier: Option<String>,

    /// Seconds to wait for the query before giving up
    #[arg(long)]
    pub max_wait: Option<u64>,

    /// Show the query and estimates without exporting
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(
    args: ExportArgs,
    config: &Config,
    cancel: &CancelToken,
    progress: &SharedProgress,
) -> Result<ExitCode> {
    let catalog = open_catalog(config)?;
    let group = describe_group(catalog.as_ref(), &args.feature_group)?;

    let mut engine = DuckDbQueryEngine::new(
        config.store.offline_root.clone(),
        config.store.results_location.clone(),
    );
    if let Some(account) = &config.store.account_id {
        engine = engine.with_account_id(account.clone());
    }

    let database = args
        .database
        .clone()
        .or_else(|| group.offline.as_ref().map(|o| o.database.clone()))
        .unwrap_or_else(|| config.export.database.clone());
    let table = resolve_table(&group, &database, &engine)?;

    let mut query = QuerySpec::new(&database, table);
    query.columns = args.columns.as_deref().map(split_list).unwrap_or_default();
    query.where_clause = args.where_clause.clone();
    query.order_by = args.order_by.clone();
    query.limit = args.limit;

    let mut job = ExportJob::new(query, &args.output_file, args.format);
    job.chunk_size = args.chunk_size.unwrap_or(config.export.chunk_size);
    job.compress = args.compress;
    job.transform = transform_config(&args, &group)?;
    job.output_location = args
        .output_location
        .clone()
        .unwrap_or_else(|| config.store.results_location.display().to_string());
    job.poll_interval = Duration::from_millis(config.export.poll_interval_ms);
    job.max_wait = Duration::from_secs(args.max_wait.unwrap_or(config.export.max_wait_secs));
    job.retry = config.transfer.retry_policy();
    job.dry_run = args.dry_run;

    log::info!("Exporting '{}' to {}", group.name, args.output_file.display());
    log::info!("  Format: {}{}", job.format, if job.compress { " (compressed)" } else { "" });

    let (sink, spinner) = render::export_events(progress);
    let ctx = JobContext::new().with_cancel(cancel.clone()).with_events(sink);
    let result = export(&job, &engine, &ctx);
    spinner.finish_and_clear();

    match result {
        Ok(ExportOutcome::DryRun(report)) => {
            render::print_dry_run(
                &group.name,
                &args.output_file.display().to_string(),
                &report,
            );
            Ok(ExitCode::SUCCESS)
        }
        Ok(ExportOutcome::Completed(summary)) => {
            render::print_export_summary(&summary);
            if summary.rows_rejected > 0 {
                log::warn!("{} rows were rejected", summary.rows_rejected);
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(ExportError::Cancelled) => {
            log::warn!("Export cancelled, no output written");
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        Err(e) => Err(e).context("Export failed"),
    }
}

/// Table configured on the feature group, else looked up in the database.
fn resolve_table(
    group: &FeatureGroup,
    database: &str,
    engine: &DuckDbQueryEngine,
) -> Result<String> {
    if let Some(table) = group.offline.as_ref().and_then(|o| o.table.clone()) {
        return Ok(table);
    }
    let tables = engine
        .list_tables(database)
        .with_context(|| format!("Failed to list tables in '{database}'"))?;
    let account = engine.account_id();
    match resolve_table_name(&group.name, &tables, account.as_deref()) {
        Some(table) => Ok(table),
        None => bail!(
            "No offline table found for '{}' in '{database}' (tables: {})",
            group.name,
            tables.join(", ")
        ),
    }
}

fn transform_config(args: &ExportArgs, group: &FeatureGroup) -> Result<Option<TransformConfig>> {
    if !(args.online_compatible || args.column_mapping.is_some() || args.add_event_time) {
        return Ok(None);
    }
    let column_mapping = match &args.column_mapping {
        Some(text) => parse_column_mapping(text)?,
        None => Vec::new(),
    };
    let record_identifier = args
        .record_identifier
        .clone()
        .unwrap_or_else(|| group.record_identifier.clone());
    Ok(Some(TransformConfig {
        column_mapping,
        event_time: group.event_time.clone(),
        ..TransformConfig::new(record_identifier)
    }))
}
