//! bulk-get subcommand - fetch records by identifier from the online store

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use featline_core::codec::write_records_to;
use featline_core::{CancelToken, FileFormat, Record, SharedProgress, write_records};
use featline_transfer::TransferOp;

use super::{TransferTuning, run_transfer, split_list, transfer_exit_code};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct BulkGetArgs {
    /// Feature group to read from
    pub feature_group: String,

    /// File listing the identifiers to fetch (.json, .jsonl, .ndjson or .csv)
    pub input_file: PathBuf,

    /// Write fetched records here, format by extension (default: JSON lines on stdout)
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,

    /// Only return these features (comma-separated)
    #[arg(long)]
    pub feature_names: Option<String>,

    /// Set the event time of fetched records to the current UTC time
    #[arg(long)]
    pub current_time: bool,

    /// Write the per-record result log here (.json for JSON, otherwise text)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[command(flatten)]
    pub tuning: TransferTuning,
}

pub fn run(
    args: BulkGetArgs,
    config: &Config,
    cancel: &CancelToken,
    progress: &SharedProgress,
) -> Result<ExitCode> {
    let op = TransferOp::Get {
        feature_names: args.feature_names.as_deref().map(split_list),
        current_time: args.current_time,
    };
    let report = run_transfer(
        op,
        &args.feature_group,
        &args.input_file,
        &args.tuning,
        config,
        cancel,
        progress,
    )?;

    let records: Vec<Record> = report.fetched_records().cloned().collect();
    match &args.output_file {
        Some(path) => {
            write_records(path, &records)
                .with_context(|| format!("Failed to write records: {}", path.display()))?;
            log::info!("Wrote {} records to {}", records.len(), path.display());
        }
        None => {
            write_records_to(std::io::stdout().lock(), FileFormat::JsonLines, &records)
                .context("Failed to write records to stdout")?;
        }
    }

    if let Some(path) = &args.log_file {
        report
            .write_log(path)
            .with_context(|| format!("Failed to write result log: {}", path.display()))?;
    }
    Ok(transfer_exit_code(&report))
}
