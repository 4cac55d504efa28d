//! Phase report artifacts under `.delegator/reports/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::report::PhaseReport;

#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub json_path: PathBuf,
    pub markdown_path: PathBuf,
}

impl ReportPaths {
    pub fn new(reports_dir: &Path, phase: u32) -> Self {
        Self {
            json_path: reports_dir.join(format!("phase-{phase}.json")),
            markdown_path: reports_dir.join(format!("phase-{phase}.md")),
        }
    }
}

#[derive(Serialize)]
struct ReportRecord<'a> {
    generated_at: String,
    #[serde(flatten)]
    report: &'a PhaseReport,
}

/// Write the JSON and markdown forms of `report`, replacing earlier runs of the phase.
pub fn write_phase_report(
    reports_dir: &Path,
    report: &PhaseReport,
    generated_at: DateTime<Utc>,
) -> Result<ReportPaths> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports dir {}", reports_dir.display()))?;
    let paths = ReportPaths::new(reports_dir, report.phase);
    let stamp = generated_at.to_rfc3339_opts(SecondsFormat::Secs, true);

    let record = ReportRecord {
        generated_at: stamp.clone(),
        report,
    };
    let mut json = serde_json::to_string_pretty(&record).context("serialize phase report")?;
    json.push('\n');
    fs::write(&paths.json_path, json)
        .with_context(|| format!("write {}", paths.json_path.display()))?;

    let markdown = format!("<!-- generated {stamp} -->\n{}", report.render_markdown());
    fs::write(&paths.markdown_path, markdown)
        .with_context(|| format!("write {}", paths.markdown_path.display()))?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::core::types::ExecutionMode;

    #[test]
    fn writes_json_and_markdown_with_timestamp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let report = PhaseReport::new(4, "Ship".to_string(), ExecutionMode::Parallel, Vec::new());
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).single().expect("time");

        let paths = write_phase_report(&temp.path().join("reports"), &report, at).expect("write");

        assert!(paths.json_path.ends_with("phase-4.json"));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.json_path).expect("read")).expect("json");
        assert_eq!(json["generated_at"], "2026-03-01T12:30:00Z");
        assert_eq!(json["phase"], 4);
        assert_eq!(json["mode"], "parallel");
        let markdown = fs::read_to_string(&paths.markdown_path).expect("read");
        assert!(markdown.starts_with("<!-- generated 2026-03-01T12:30:00Z -->\n# Phase 4: Ship"));
    }
}
