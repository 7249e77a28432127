//! Run report output.
//!
//! Supports debug pretty-printing, per-stage log lines and a JSON file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::pipeline::RunReport;

/// Logs the report using Rust's debug pretty-print format.
pub fn print_pretty(report: &RunReport) {
    debug!("{:#?}", report);
}

/// One log line per stage, then a summary.
pub fn log_report(report: &RunReport) {
    for summary in &report.stages {
        info!(
            stage = %summary.stage,
            file = summary.file,
            origin = ?summary.origin,
            rows = summary.rows,
            elapsed_ms = summary.elapsed_ms,
            "Stage summary"
        );
    }
    info!(
        data_dir = %report.data_dir.display(),
        regenerate = report.regenerate,
        elapsed_ms = report.elapsed_ms,
        "Run summary"
    );
}

/// Writes the report as pretty JSON, creating parent directories.
pub fn write_report_json(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("writing report {}", path.display()))?;
    debug!(path = %path.display(), "Run report written");
    Ok(())
}
