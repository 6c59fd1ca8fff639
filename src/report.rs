//! Report Builder - Severity, Planned Skips, Renderings
//!
//! Pure aggregation over findings. Writing the two renderings to disk is a
//! separate call.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{ParagraphTasks, SheetTasks};
use crate::hashing::{canonical_digest, InputDigests};
use crate::scan::PlaceholderSummary;
use crate::simulate::SimulateStatus;
use crate::validation::{Finding, Level, TagCategory};
use crate::ENGINE_VERSION;

pub const REPORT_JSON: &str = "validator_report.json";
pub const REPORT_MARKDOWN: &str = "validator_report.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Error,
}

impl Severity {
    /// Maximum finding level, `Ok` when there are none.
    pub fn from_findings(findings: &[Finding]) -> Self {
        match findings.iter().map(|f| f.level).max() {
            Some(Level::Error) => Self::Error,
            Some(Level::Warning) => Self::Warning,
            None => Self::Ok,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcelInfo {
    pub sheets: Vec<String>,
    /// Workbook the sheet names were read from.
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphsInfo {
    pub all: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSkips {
    pub sheets: Vec<String>,
    pub paragraphs: Vec<String>,
}

impl PlannedSkips {
    /// Sorted, unique tag targets of `sheet` / `para` findings.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let targets = |category: TagCategory| -> Vec<String> {
            findings
                .iter()
                .filter_map(|f| f.tag.as_ref())
                .filter(|t| t.category == category)
                .map(|t| t.id.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };
        Self {
            sheets: targets(TagCategory::Sheet),
            paragraphs: targets(TagCategory::Para),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulateInfo {
    pub enabled: bool,
    pub ok: Option<bool>,
    pub error: Option<String>,
}

impl SimulateInfo {
    pub fn disabled() -> Self {
        Self::default()
    }
}

impl From<SimulateStatus> for SimulateInfo {
    fn from(status: SimulateStatus) -> Self {
        Self {
            enabled: true,
            ok: Some(status.ok),
            error: status.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub severity: Severity,
    pub engine_version: String,
    pub excel: ExcelInfo,
    pub sheets: Vec<String>,
    pub paragraphs: ParagraphsInfo,
    pub findings: Vec<Finding>,
    pub planned_skips: PlannedSkips,
    pub simulate: SimulateInfo,
    pub placeholders: PlaceholderSummary,
    pub inputs: InputDigests,
}

impl ValidationReport {
    pub fn count(&self, level: Level) -> usize {
        self.findings.iter().filter(|f| f.level == level).count()
    }

    /// SHA-256 of the report's canonical JSON.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        canonical_digest(self)
    }
}

/// Assemble a report. Severity and planned skips are derived, never passed in.
pub fn make_report(
    sheets: &SheetTasks,
    paragraphs: &ParagraphTasks,
    excel: ExcelInfo,
    findings: Vec<Finding>,
    placeholders: PlaceholderSummary,
    simulate: SimulateInfo,
    inputs: InputDigests,
) -> ValidationReport {
    ValidationReport {
        severity: Severity::from_findings(&findings),
        engine_version: ENGINE_VERSION.to_string(),
        excel,
        sheets: sheets.names(),
        paragraphs: ParagraphsInfo {
            all: paragraphs.names(),
        },
        planned_skips: PlannedSkips::from_findings(&findings),
        findings,
        simulate,
        placeholders,
        inputs,
    }
}

fn fmt_option<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map_or_else(|| "none".to_string(), |v| v.to_string())
}

/// Human-readable rendering with a fixed section order.
pub fn render_markdown(report: &ValidationReport) -> String {
    Markdown(report).to_string()
}

struct Markdown<'a>(&'a ValidationReport);

impl fmt::Display for Markdown<'_> {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        writeln!(out, "# Validator Report")?;
        writeln!(out, "- severity: **{}**", report.severity.as_str())?;
        writeln!(
            out,
            "- findings: {} error(s), {} warning(s)",
            report.count(Level::Error),
            report.count(Level::Warning)
        )?;
        writeln!(out, "- excel sheets: {}", report.excel.sheets.len())?;
        writeln!(
            out,
            "- config sheets: {}, paragraphs: {}",
            report.sheets.len(),
            report.paragraphs.all.len()
        )?;
        writeln!(
            out,
            "- planned_skips: sheets=[{}], paragraphs=[{}]",
            report.planned_skips.sheets.join(", "),
            report.planned_skips.paragraphs.join(", ")
        )?;
        writeln!(
            out,
            "- simulate_render: enabled={}, ok={}, error={}",
            report.simulate.enabled,
            fmt_option(&report.simulate.ok),
            fmt_option(&report.simulate.error)
        )?;
        writeln!(out)?;

        let ph = &report.placeholders;
        writeln!(out, "## Template Placeholders (clean)")?;
        for (title, items) in [
            ("Variables", &ph.variables),
            ("Paragraph IDs", &ph.paragraphs),
            ("Others", &ph.others),
        ] {
            if items.is_empty() {
                continue;
            }
            writeln!(out, "- **{title}**")?;
            for item in items {
                writeln!(out, "  - `{item}`")?;
            }
        }
        writeln!(out)?;

        writeln!(out, "## Findings")?;
        if report.findings.is_empty() {
            writeln!(out, "- (none)")?;
        }
        for f in &report.findings {
            let level = match f.level {
                Level::Warning => "WARNING",
                Level::Error => "ERROR",
            };
            writeln!(out, "- **{level}** | {}: {}", f.stage.as_str(), f.msg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Write `validator_report.json` and `validator_report.md` under `logs_dir`.
pub fn write_report_files(
    report: &ValidationReport,
    logs_dir: &Path,
) -> Result<(PathBuf, PathBuf), ReportError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ReportError::Io { path, source }
    };
    fs::create_dir_all(logs_dir).map_err(io_err(logs_dir))?;

    let json_path = logs_dir.join(REPORT_JSON);
    fs::write(&json_path, serde_json::to_string_pretty(report)?).map_err(io_err(&json_path))?;
    let md_path = logs_dir.join(REPORT_MARKDOWN);
    fs::write(&md_path, render_markdown(report)).map_err(io_err(&md_path))?;

    info!(dir = %logs_dir.display(), "report files written");
    Ok((json_path, md_path))
}
