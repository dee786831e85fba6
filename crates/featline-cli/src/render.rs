//! Progress bars and summary tables for engine events

use std::sync::OnceLock;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use featline_core::progress::fmt_bytes;
use featline_core::{ProgressEvent, SharedProgress, fmt_num};
use featline_export::{DryRunReport, ExportSummary};
use featline_transfer::TransferReport;
use indicatif::ProgressBar;

/// Failures listed individually in the transfer summary
const MAX_LISTED_FAILURES: usize = 10;

/// Event sink for transfers: a records bar in a TTY, per-batch log lines otherwise.
pub fn transfer_events(
    progress: &SharedProgress,
    label: &str,
) -> impl Fn(&ProgressEvent) + Send + Sync + 'static {
    let progress = progress.clone();
    let label = label.to_string();
    let bar: OnceLock<ProgressBar> = OnceLock::new();
    move |event| match event {
        ProgressEvent::TransferStarted { records, batches } => {
            log::debug!("{label}: {records} records in {batches} batches");
            let _ = bar.set(progress.records_bar(&label, *records as u64));
        }
        ProgressEvent::RecordCompleted { .. } => {
            if let Some(pb) = bar.get() {
                pb.inc(1);
            }
        }
        ProgressEvent::BatchCompleted {
            batch,
            succeeded,
            failed,
            skipped,
            records_done,
            records_total,
        } => {
            if !progress.is_tty() {
                log::info!(
                    "Batch {}: {succeeded} ok, {failed} failed, {skipped} skipped ({}/{})",
                    batch + 1,
                    fmt_num(*records_done),
                    fmt_num(*records_total)
                );
            }
            if records_done == records_total {
                if let Some(pb) = bar.get() {
                    pb.finish();
                }
            }
        }
        _ => {}
    }
}

/// Event sink for exports, plus the spinner it drives.
pub fn export_events(
    progress: &SharedProgress,
) -> (impl Fn(&ProgressEvent) + Send + Sync + 'static, ProgressBar) {
    let spinner = progress.stage_line("export");
    let line = spinner.clone();
    let is_tty = progress.is_tty();
    let sink = move |event: &ProgressEvent| match event {
        ProgressEvent::QueryState { query_id, state } => {
            line.set_message(format!("query {query_id}: {state}"));
            if !is_tty {
                log::info!("Query {query_id}: {state}");
            }
        }
        ProgressEvent::ChunkWritten {
            chunk,
            rows,
            rejected,
            rows_total,
        } => {
            line.set_message(format!("{} rows written", fmt_num(*rows_total)));
            if !is_tty {
                log::info!(
                    "Chunk {chunk}: {rows} rows, {rejected} rejected ({} total)",
                    fmt_num(*rows_total)
                );
            }
        }
        _ => {}
    };
    (sink, spinner)
}

/// Print a key-value summary table on stderr
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

pub fn print_transfer_report(operation: &str, group: &str, report: &TransferReport) {
    let c = &report.counts;
    let secs = report.elapsed.as_secs_f64();
    let mut rows = vec![
        ("Feature group", group.to_string()),
        ("Records", fmt_num(report.len())),
        ("Succeeded", fmt_num(c.succeeded)),
        ("Failed", fmt_num(c.failed)),
        ("Skipped", fmt_num(c.skipped)),
        ("Not attempted", fmt_num(c.incomplete)),
        ("Status", report.status.to_string()),
        ("Elapsed", format!("{secs:.1}s")),
    ];
    if c.succeeded > 0 && secs > 0.0 {
        rows.push(("Throughput", format!("{:.0} records/s", c.succeeded as f64 / secs)));
    }
    print_summary(&format!("Bulk {operation}"), &rows);

    if c.failed == 0 {
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Record").fg(Color::Cyan),
            Cell::new("Error").fg(Color::Cyan),
            Cell::new("Message").fg(Color::Cyan),
        ]);
    for (index, kind, message) in report.failures().take(MAX_LISTED_FAILURES) {
        table.add_row(vec![
            Cell::new(index),
            Cell::new(kind).fg(Color::Red),
            Cell::new(message),
        ]);
    }
    eprintln!("\n{table}");
    if c.failed > MAX_LISTED_FAILURES {
        eprintln!("... and {} more failures", c.failed - MAX_LISTED_FAILURES);
    }
}

pub fn print_export_summary(summary: &ExportSummary) {
    let mut rows = vec![
        ("Query", summary.query_id.to_string()),
        ("Output", summary.output.display().to_string()),
        ("Rows read", fmt_num(summary.rows_read)),
        ("Rows written", fmt_num(summary.rows_written)),
        ("Rows rejected", fmt_num(summary.rows_rejected)),
        ("Chunks", fmt_num(summary.chunks_written)),
        ("Size", fmt_bytes(summary.bytes_written)),
        ("Elapsed", format!("{:.1}s", summary.elapsed.as_secs_f64())),
    ];
    for r in &summary.rejection_samples {
        rows.push(("Rejected", r.to_string()));
    }
    print_summary("Export", &rows);
}

pub fn print_dry_run(group: &str, output: &str, report: &DryRunReport) {
    let unknown = || "unknown".to_string();
    print_summary(
        "Dry run",
        &[
            ("Feature group", group.to_string()),
            ("Output", output.to_string()),
            ("Query", report.query.clone()),
            (
                "Estimated rows",
                report
                    .estimated_rows
                    .map(|n| fmt_num(n as usize))
                    .unwrap_or_else(unknown),
            ),
            (
                "Estimated columns",
                report
                    .estimated_columns
                    .map(fmt_num)
                    .unwrap_or_else(unknown),
            ),
            (
                "Estimated size",
                report
                    .estimated_bytes
                    .map(fmt_bytes)
                    .unwrap_or_else(unknown),
            ),
        ],
    );
    eprintln!("Remove --dry-run to run the export.");
}
