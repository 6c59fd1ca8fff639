//! Validation Pipeline - Single Entry Point
//!
//! Every run loads, checks, scans, optionally simulates and reports in that
//! order. Expected-shape problems become findings; only unexpected I/O
//! failures come back as `PipelineError`.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{
    ConfigLayout, ParagraphTasks, ProviderCatalog, SheetTasks, PARAGRAPH_TASKS_FILE,
    SHEET_TASKS_FILE,
};
use crate::hashing::InputDigests;
use crate::report::{make_report, ExcelInfo, SimulateInfo, ValidationReport};
use crate::scan::{scan_placeholders, PlaceholderSummary, ScanError};
use crate::simulate::simulate_render;
use crate::validation::{document_findings, Finding, RuleContext, RuleEngine, Stage};
use crate::workbook::{find_data_source, sheet_names, WorkbookError};
use crate::yaml::load_strict;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config directory not found: {0}")]
    ConfigDirNotFound(PathBuf),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Workbook(#[from] WorkbookError),

    #[error("failed to digest inputs: {0}")]
    Digest(#[from] io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub config_dir: PathBuf,
    /// Explicit workbook; otherwise the first `*.xls*` under `input/`.
    #[serde(default)]
    pub data_source: Option<PathBuf>,
    #[serde(default)]
    pub simulate_render: bool,
}

impl ValidationRequest {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_source: None,
            simulate_render: false,
        }
    }
}

/// The validation pipeline - owns the rule engine, holds no per-run state.
pub struct ValidationPipeline {
    engine: RuleEngine,
}

impl ValidationPipeline {
    pub fn new() -> Self {
        Self {
            engine: RuleEngine::new(),
        }
    }

    /// Validate one project configuration directory.
    ///
    /// This is the ONLY validation entry point.
    pub fn validate(&self, request: &ValidationRequest) -> Result<ValidationReport, PipelineError> {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        if !request.config_dir.is_dir() {
            return Err(PipelineError::ConfigDirNotFound(request.config_dir.clone()));
        }
        let layout = ConfigLayout::new(&request.config_dir);
        let mut findings: Vec<Finding> = vec![];

        let sheet_load = load_strict(&layout.sheet_tasks());
        let (sheets, shape) = match SheetTasks::from_value(&sheet_load.data) {
            Ok(tasks) => (tasks, None),
            Err(e) => (SheetTasks::default(), Some(e)),
        };
        findings.extend(document_findings(SHEET_TASKS_FILE, &sheet_load, shape.as_ref()));

        let para_load = load_strict(&layout.paragraph_tasks());
        let (paragraphs, shape) = match ParagraphTasks::from_value(&para_load.data) {
            Ok(tasks) => (tasks, None),
            Err(e) => (ParagraphTasks::default(), Some(e)),
        };
        findings.extend(document_findings(PARAGRAPH_TASKS_FILE, &para_load, shape.as_ref()));

        let providers = ProviderCatalog::for_layout(&layout);
        let (excel, excel_findings) = self.open_workbook(&layout, request.data_source.as_deref())?;
        findings.extend(excel_findings);

        let placeholders = scan_placeholders(&layout.template())?;

        let ctx = RuleContext {
            layout: &layout,
            sheets: &sheets,
            paragraphs: &paragraphs,
            excel_sheets: excel.source.as_ref().map(|_| excel.sheets.as_slice()),
            placeholders: &placeholders,
            providers: &providers,
        };
        findings.extend(self.engine.run(&ctx));

        let simulate = if request.simulate_render {
            let (sim_findings, status) = simulate_render(&layout, &sheets, &paragraphs)?;
            findings.extend(sim_findings);
            SimulateInfo::from(status)
        } else {
            SimulateInfo::disabled()
        };

        let inputs = InputDigests::for_layout(&layout)?;
        let report = make_report(
            &sheets,
            &paragraphs,
            excel,
            findings,
            PlaceholderSummary::from_raw(&placeholders),
            simulate,
            inputs,
        );
        info!(
            severity = report.severity.as_str(),
            findings = report.findings.len(),
            skip_sheets = report.planned_skips.sheets.len(),
            skip_paragraphs = report.planned_skips.paragraphs.len(),
            "validation complete"
        );
        Ok(report)
    }

    /// Sheet names of the data source. An explicit workbook must be
    /// readable; a discovered legacy `.xls` only disables alignment.
    fn open_workbook(
        &self,
        layout: &ConfigLayout,
        explicit: Option<&Path>,
    ) -> Result<(ExcelInfo, Vec<Finding>), PipelineError> {
        if let Some(path) = explicit {
            return Ok((
                ExcelInfo {
                    sheets: sheet_names(path)?,
                    source: Some(path.display().to_string()),
                },
                vec![],
            ));
        }

        let Some(path) = find_data_source(&layout.input_dir())? else {
            info!(
                dir = %layout.input_dir().display(),
                "no workbook found, excel alignment skipped"
            );
            return Ok((ExcelInfo::default(), vec![]));
        };
        match sheet_names(&path) {
            Ok(sheets) => Ok((
                ExcelInfo {
                    sheets,
                    source: Some(path.display().to_string()),
                },
                vec![],
            )),
            Err(WorkbookError::Unsupported(p)) => {
                warn!(workbook = %p.display(), "legacy workbook format, excel alignment skipped");
                Ok((
                    ExcelInfo::default(),
                    vec![Finding::warning(
                        Stage::Excel,
                        format!(
                            "workbook {} uses the legacy .xls format; sheet alignment was not checked",
                            p.display()
                        ),
                    )],
                ))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate with a fresh pipeline.
pub fn validate(request: &ValidationRequest) -> Result<ValidationReport, PipelineError> {
    ValidationPipeline::new().validate(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Severity;
    use crate::validation::{Level, TagCategory};
    use std::fs;

    fn project(sheets: &str, paragraphs: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let layout = ConfigLayout::new(dir.path());
        fs::create_dir_all(layout.business_configs()).unwrap();
        fs::write(layout.sheet_tasks(), sheets).unwrap();
        fs::write(layout.paragraph_tasks(), paragraphs).unwrap();
        dir
    }

    #[test]
    fn test_missing_config_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate(&ValidationRequest::new(dir.path().join("nope"))).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigDirNotFound(_)));
    }

    #[test]
    fn test_top_level_sequence_downgrades_to_error_finding() {
        let dir = project("- a\n- b\n", "");
        let report = validate(&ValidationRequest::new(dir.path())).unwrap();
        assert_eq!(report.severity, Severity::Error);
        assert!(report.sheets.is_empty());
        assert!(report
            .findings
            .iter()
            .any(|f| f.stage == Stage::Yaml
                && f.level == Level::Error
                && f.msg.contains("a sequence")));
    }

    #[test]
    fn test_duplicate_keys_reported_last_wins() {
        let dir = project("A:\n  keys: {x: number}\nA:\n  keys: {y: number}\n", "");
        let report = validate(&ValidationRequest::new(dir.path())).unwrap();
        assert_eq!(report.sheets, vec!["A"]);
        let dup = report.findings.iter().find(|f| f.stage == Stage::Yaml).unwrap();
        assert_eq!(dup.level, Level::Warning);
        assert!(dup.msg.contains("sheet_tasks.yaml:3"), "{}", dup.msg);
    }

    #[test]
    fn test_no_workbook_skips_alignment() {
        let dir = project("A:\n  keys: {x: number}\n", "");
        let report = validate(&ValidationRequest::new(dir.path())).unwrap();
        assert!(report.excel.sheets.is_empty());
        assert!(report.excel.source.is_none());
        assert!(!report.findings.iter().any(|f| f.stage == Stage::Excel));
    }

    #[test]
    fn test_discovered_legacy_workbook_warns() {
        let dir = project("A:\n  keys: {x: number}\n", "");
        let input = ConfigLayout::new(dir.path()).input_dir();
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("data.xls"), b"").unwrap();
        let report = validate(&ValidationRequest::new(dir.path())).unwrap();
        assert!(report
            .findings
            .iter()
            .any(|f| f.stage == Stage::Excel && f.tag.is_none() && f.msg.contains("legacy")));
    }

    #[test]
    fn test_explicit_unreadable_workbook_fails() {
        let dir = project("", "");
        let path = dir.path().join("broken.xlsx");
        fs::write(&path, b"not a zip").unwrap();
        let request = ValidationRequest {
            data_source: Some(path),
            ..ValidationRequest::new(dir.path())
        };
        assert!(matches!(validate(&request), Err(PipelineError::Workbook(_))));
    }

    #[test]
    fn test_missing_template_tagged() {
        let dir = project("", "");
        let report = validate(&ValidationRequest::new(dir.path())).unwrap();
        assert!(report
            .findings
            .iter()
            .any(|f| f.tag.as_ref().is_some_and(|t| t.category == TagCategory::Template)));
        assert!(report.inputs.template.is_none());
        assert!(report.inputs.sheet_tasks.is_some());
    }
}
