//! JSON output formatting
//!
//! Serializes a plan report for machines: per-group results and summaries,
//! overall totals and timing.

use crate::coordinator::{GroupReport, PlanReport};
use crate::stats::PlanSummary;
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Duration with both seconds and human-readable format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonDuration {
    pub seconds: f64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_secs_f64(seconds: f64) -> Self {
        let human = format_duration_human(Duration::from_secs_f64(seconds.max(0.0)));
        Self { seconds, human }
    }
}

/// Top-level JSON document
#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub generated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub elapsed: JsonDuration,
    pub overall: &'a PlanSummary,
    pub overall_success_percent: usize,
    pub groups: Vec<JsonGroup<'a>>,
}

#[derive(Debug, Serialize)]
pub struct JsonGroup<'a> {
    #[serde(flatten)]
    pub report: &'a GroupReport,
    pub success_percent: usize,
}

/// Build the JSON document for `report`
pub fn build_json_report(report: &PlanReport) -> JsonReport<'_> {
    JsonReport {
        generated_at: Utc::now(),
        started_at: report.started_at,
        elapsed: JsonDuration::from_secs_f64(report.elapsed_seconds),
        overall: &report.overall,
        overall_success_percent: report.overall.success_percent(),
        groups: report
            .groups
            .iter()
            .map(|group| JsonGroup {
                report: group,
                success_percent: group.summary.success_percent(),
            })
            .collect(),
    }
}

/// Write the JSON report to `output_path`
pub fn write_json_output(output_path: &Path, report: &PlanReport, pretty: bool) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create JSON output {}", output_path.display()))?;
    let writer = BufWriter::new(file);
    let document = build_json_report(report);

    if pretty {
        serde_json::to_writer_pretty(writer, &document)?;
    } else {
        serde_json::to_writer(writer, &document)?;
    }

    Ok(())
}

/// Format duration in human-readable format
fn format_duration_human(d: Duration) -> String {
    let millis = d.as_millis() as u64;

    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.3}s", d.as_secs_f64())
    } else if millis < 3_600_000 {
        format!("{:.2}m", d.as_secs_f64() / 60.0)
    } else {
        format!("{:.2}h", d.as_secs_f64() / 3600.0)
    }
}
