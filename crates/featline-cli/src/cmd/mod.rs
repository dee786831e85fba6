//! Subcommands and the plumbing they share

pub mod bulk_get;
pub mod bulk_put;
pub mod export;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use featline_core::{
    CancelToken, FeatureGroup, JobContext, MetadataService, SharedProgress, read_entries,
};
use featline_local::{FileOnlineStore, TomlCatalog};
use featline_transfer::{JobStatus, TransferOp, TransferReport, transfer};

use crate::config::Config;
use crate::render;

/// Exit status after a user interrupt
pub const EXIT_CANCELLED: u8 = 130;

/// Per-run overrides for the `[transfer]` config section.
#[derive(Args, Debug, Default)]
pub struct TransferTuning {
    /// Records per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Concurrent calls against the online store
    #[arg(long, short = 'w')]
    pub max_workers: Option<usize>,

    /// Total attempts per record for retryable errors
    #[arg(long)]
    pub max_retries: Option<u32>,
}

pub fn open_catalog(config: &Config) -> Result<Arc<TomlCatalog>> {
    TomlCatalog::load(&config.store.catalog).map(Arc::new)
}

pub fn describe_group(catalog: &dyn MetadataService, name: &str) -> Result<FeatureGroup> {
    catalog
        .describe(name)
        .with_context(|| format!("Failed to describe feature group '{name}'"))
}

/// Comma-separated names, blanks dropped
pub fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Load input, run `op` against the file online store and print the summary.
pub fn run_transfer(
    op: TransferOp,
    group_name: &str,
    input_file: &Path,
    tuning: &TransferTuning,
    config: &Config,
    cancel: &CancelToken,
    progress: &SharedProgress,
) -> Result<TransferReport> {
    let catalog = open_catalog(config)?;
    let group = describe_group(catalog.as_ref(), group_name)?;
    if !group.online_enabled {
        bail!("Feature group '{group_name}' has no online store");
    }

    let entries = read_entries(input_file)
        .with_context(|| format!("Failed to read input: {}", input_file.display()))?;
    log::info!("Read {} entries from {}", entries.len(), input_file.display());

    let mut options = config.transfer.options();
    if let Some(n) = tuning.batch_size {
        options.batch_size = n;
    }
    if let Some(n) = tuning.max_workers {
        options.max_workers = n;
    }
    if let Some(n) = tuning.max_retries {
        options.retry.max_retries = n;
    }

    let store = FileOnlineStore::new(config.store.online_root.clone(), catalog);
    let ctx = JobContext::new()
        .with_cancel(cancel.clone())
        .with_throttle(config.transfer.throttle())
        .with_events(render::transfer_events(progress, op.name()));

    let report = transfer(entries, &op, &group, &store, &options, &ctx)?;
    render::print_transfer_report(op.name(), group_name, &report);
    Ok(report)
}

/// 130 when interrupted, 1 when any record failed or was not attempted.
pub fn transfer_exit_code(report: &TransferReport) -> ExitCode {
    if report.status == JobStatus::Cancelled {
        log::warn!("Interrupted: {} records were not attempted", report.counts.incomplete);
        ExitCode::from(EXIT_CANCELLED)
    } else if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_drops_blanks() {
        assert_eq!(split_list(" age, ,score ,"), vec!["age", "score"]);
        assert!(split_list("").is_empty());
    }
}
