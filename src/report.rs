//! JSON run report.
//!
//! When a report directory is configured, the final [`RunSummary`] is written
//! next to previous runs:
//!
//! ```text
//! report_dir/
//! └── 2025-05-06/
//!     ├── run-093000.json
//!     └── run-153000.json
//! ```

use crate::processor::RunSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

#[derive(Debug, Serialize)]
struct RunReport<'a> {
    finished_at: String,
    version: &'static str,
    #[serde(flatten)]
    summary: &'a RunSummary,
}

/// Write `summary` under `report_dir` and return the file path.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir.display()))]
pub async fn write_summary(
    summary: &RunSummary,
    report_dir: &Path,
    finished_at: DateTime<Utc>,
) -> Result<PathBuf, Box<dyn Error>> {
    let report = RunReport {
        finished_at: finished_at.to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        summary,
    };
    let json = serde_json::to_string_pretty(&report)?;

    let day_dir = report_dir.join(finished_at.format("%Y-%m-%d").to_string());
    if let Err(e) = fs::create_dir_all(&day_dir).await {
        error!(dir = %day_dir.display(), error = %e, "Failed to create report dir");
        return Err(e.into());
    }

    let path = day_dir.join(format!("run-{}.json", finished_at.format("%H%M%S")));
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(path)
}
