//! featline - bulk transfer and export for feature stores
//!
//! Moves keyed records between local files and the online store, and exports
//! offline store tables to CSV, JSON lines or Parquet.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use featline_core::CancelToken;

mod cmd;
mod config;
mod render;

use config::Config;

#[derive(Parser)]
#[command(name = "featline")]
#[command(about = "Bulk transfer and export for feature stores")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./featline.toml or ~/.config/featline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Write records from a file into a feature group's online store
    BulkPut(cmd::bulk_put::BulkPutArgs),
    /// Fetch records listed in a file from a feature group's online store
    BulkGet(cmd::bulk_get::BulkGetArgs),
    /// Export a feature group's offline store to a file
    Export(cmd::export::ExportArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(featline_core::ProgressContext::new());

    // Logging:
    //   TTY:     warn unless --debug, progress bars show activity
    //   non-TTY: info unless --quiet, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = cli.quiet || (is_tty && !cli.debug);
    if let Err(e) = featline_core::init_logging(quiet, cli.debug, multi) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, progress: &featline_core::SharedProgress) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    let cancel = CancelToken::new();
    register_signals(&cancel)?;

    match cli.command {
        Command::BulkPut(args) => cmd::bulk_put::run(args, &config, &cancel, progress),
        Command::BulkGet(args) => cmd::bulk_get::run(args, &config, &cancel, progress),
        Command::Export(args) => cmd::export::run(args, &config, &cancel, progress),
        Command::Config => {
            show_config(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// First SIGINT/SIGTERM cancels the job; a second one exits immediately.
fn register_signals(cancel: &CancelToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;

    for signal in [SIGINT, SIGTERM] {
        flag::register_conditional_shutdown(signal, cmd::EXIT_CANCELLED as i32, cancel.flag())
            .context("Failed to register signal handler")?;
        flag::register(signal, cancel.flag()).context("Failed to register signal handler")?;
    }
    Ok(())
}

fn show_config(config: &Config) {
    let store = &config.store;
    let t = &config.transfer;
    let e = &config.export;
    render::print_summary(
        "Setting",
        &[
            ("Catalog", store.catalog.display().to_string()),
            ("Online store", store.online_root.display().to_string()),
            ("Offline store", store.offline_root.display().to_string()),
            ("Query results", store.results_location.display().to_string()),
            (
                "Account",
                store.account_id.clone().unwrap_or_else(|| "not set".into()),
            ),
            ("Batch size", t.batch_size.to_string()),
            ("Workers", t.max_workers.to_string()),
            ("Max retries", t.max_retries.to_string()),
            (
                "Backoff",
                format!("{}ms base, {}ms max", t.base_delay_ms, t.max_delay_ms),
            ),
            (
                "Throttle",
                format!(
                    "{}ms cooldown, lifted after {} calm calls",
                    t.throttle_cooldown_ms, t.throttle_decay
                ),
            ),
            ("Chunk size", e.chunk_size.to_string()),
            ("Database", e.database.clone()),
            ("Poll interval", format!("{}ms", e.poll_interval_ms)),
            ("Max wait", format!("{}s", e.max_wait_secs)),
        ],
    );
}
