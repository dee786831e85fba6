//! bulk-put subcommand - upsert records from a file into the online store

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use featline_core::{CancelToken, SharedProgress};
use featline_transfer::TransferOp;

use super::{TransferTuning, run_transfer, transfer_exit_code};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct BulkPutArgs {
    /// Feature group to write to
    pub feature_group: String,

    /// Input file (.json, .jsonl, .ndjson or .csv)
    pub input_file: PathBuf,

    /// Write the per-record result log here (.json for JSON, otherwise text)
    #[arg(short, long)]
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub tuning: TransferTuning,
}

pub fn run(
    args: BulkPutArgs,
    config: &Config,
    cancel: &CancelToken,
    progress: &SharedProgress,
) -> Result<ExitCode> {
    let report = run_transfer(
        TransferOp::Put,
        &args.feature_group,
        &args.input_file,
        &args.tuning,
        config,
        cancel,
        progress,
    )?;

    if let Some(path) = &args.output_file {
        report
            .write_log(path)
            .with_context(|| format!("Failed to write result log: {}", path.display()))?;
        log::info!("Result log: {}", path.display());
    }
    Ok(transfer_exit_code(&report))
}
