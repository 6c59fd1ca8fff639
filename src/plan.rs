//! Execution Plan - What Downstream Stages May Process
//!
//! Derived from a report by set difference; the report is not touched.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::report::{Severity, ValidationReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub severity: Severity,
    pub sheets_skip: Vec<String>,
    pub paras_skip: Vec<String>,
    pub sheets_exec: Vec<String>,
    pub paras_exec: Vec<String>,
}

impl ExecutionPlan {
    pub fn from_report(report: &ValidationReport) -> Self {
        Self::derive(
            report.severity,
            &report.excel.sheets,
            &report.paragraphs.all,
            &report.planned_skips.sheets,
            &report.planned_skips.paragraphs,
        )
    }

    /// `exec = all - skip`, sorted.
    pub fn derive(
        severity: Severity,
        all_sheets: &[String],
        all_paragraphs: &[String],
        sheets_skip: &[String],
        paras_skip: &[String],
    ) -> Self {
        Self {
            severity,
            sheets_skip: sorted(sheets_skip),
            paras_skip: sorted(paras_skip),
            sheets_exec: difference(all_sheets, sheets_skip),
            paras_exec: difference(all_paragraphs, paras_skip),
        }
    }

    pub fn runs_sheet(&self, sheet: &str) -> bool {
        self.sheets_exec.iter().any(|s| s == sheet)
    }

    pub fn runs_paragraph(&self, id: &str) -> bool {
        self.paras_exec.iter().any(|p| p == id)
    }
}

fn sorted(items: &[String]) -> Vec<String> {
    items.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
}

fn difference(all: &[String], skip: &[String]) -> Vec<String> {
    let all: BTreeSet<&String> = all.iter().collect();
    let skip: BTreeSet<&String> = skip.iter().collect();
    all.difference(&skip).map(|s| (*s).clone()).collect()
}
