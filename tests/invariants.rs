//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees end to end, on project
//! directories built from scratch with synthetic `.docx` / `.xlsx` archives.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use docgate_core::{
    config::ConfigLayout,
    hashing::file_digest,
    load_lenient, load_strict,
    scan::scan_placeholders,
    validate, ExecutionPlan, Finding, Level, Severity, Stage, TagCategory, ValidationReport,
    ValidationRequest,
};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#;

fn write_zip(path: &Path, parts: &[(&str, String)]) {
    let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, body) in parts {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// One `<w:p>` per line, each line split across two runs the way Word does.
fn wordml(root: &str, lines: &[&str]) -> String {
    let body: String = lines
        .iter()
        .map(|line| {
            let cut = line.char_indices().nth(line.chars().count() / 2).map_or(0, |(i, _)| i);
            let (a, b) = line.split_at(cut);
            format!(
                r#"<w:p><w:r><w:t xml:space="preserve">{}</w:t></w:r><w:r><w:rPr><w:b/></w:rPr><w:t xml:space="preserve">{}</w:t></w:r></w:p>"#,
                escape(a),
                escape(b)
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:{root} xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:{root}>"#
    )
}

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = ConfigLayout::new(dir.path());
        fs::create_dir_all(layout.business_configs()).unwrap();
        fs::create_dir_all(layout.prompts_dir()).unwrap();
        fs::create_dir_all(layout.template().parent().unwrap()).unwrap();
        fs::write(layout.sheet_tasks(), "").unwrap();
        fs::write(layout.paragraph_tasks(), "").unwrap();
        Self { dir }
    }

    fn layout(&self) -> ConfigLayout {
        ConfigLayout::new(self.dir.path())
    }

    fn sheets(self, yaml: &str) -> Self {
        fs::write(self.layout().sheet_tasks(), yaml).unwrap();
        self
    }

    fn paragraphs(self, yaml: &str) -> Self {
        fs::write(self.layout().paragraph_tasks(), yaml).unwrap();
        self
    }

    fn prompt(self, name: &str) -> Self {
        fs::write(self.layout().prompts_dir().join(name), "Summarise the data.").unwrap();
        self
    }

    fn template(self, lines: &[&str]) -> Self {
        self.template_with_header(lines, &[])
    }

    fn template_with_header(self, lines: &[&str], header: &[&str]) -> Self {
        let extra = if header.is_empty() {
            vec![]
        } else {
            vec![("word/header1.xml", wordml("hdr", header))]
        };
        self.template_with_parts(lines, extra)
    }

    /// Main part plus extra header/footer parts, written in the given order.
    fn template_with_parts(self, lines: &[&str], extra: Vec<(&str, String)>) -> Self {
        let mut parts = vec![
            ("[Content_Types].xml", CONTENT_TYPES.to_string()),
            ("word/document.xml", wordml("document", lines)),
        ];
        parts.extend(extra);
        write_zip(&self.layout().template(), &parts);
        self
    }

    fn workbook(self, sheets: &[&str]) -> Self {
        let input = self.layout().input_dir();
        fs::create_dir_all(&input).unwrap();
        let entries: String = sheets
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let id = i + 1;
                format!(r#"<sheet name="{}" sheetId="{id}" r:id="rId{id}"/>"#, escape(s))
            })
            .collect();
        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>{entries}</sheets></workbook>"#
        );
        write_zip(
            &input.join("data.xlsx"),
            &[
                ("[Content_Types].xml", CONTENT_TYPES.to_string()),
                ("xl/workbook.xml", workbook),
            ],
        );
        self
    }

    fn request(&self) -> ValidationRequest {
        ValidationRequest::new(self.dir.path())
    }

    fn validate(&self) -> ValidationReport {
        validate(&self.request()).unwrap()
    }

    fn simulate(&self) -> ValidationReport {
        validate(&ValidationRequest {
            simulate_render: true,
            ..self.request()
        })
        .unwrap()
    }

    fn template_path(&self) -> PathBuf {
        self.layout().template()
    }
}

fn tagged<'a>(report: &'a ValidationReport, category: TagCategory, id: &str) -> Vec<&'a Finding> {
    report.findings.iter().filter(|f| f.has_tag(category, id)).collect()
}

#[test]
fn invariant_scenario_a_clean_sheet_is_not_skipped() {
    let project = Project::new()
        .prompt("summary.txt")
        .sheets("Summary:\n  prompt: summary.txt\n  keys:\n    score: number\n")
        .template(&["Score: {{ Summary.score }}"])
        .workbook(&["Summary"]);

    let report = project.validate();
    let mentions_summary = |f: &Finding| {
        f.msg.contains("Summary") || f.tag.as_ref().is_some_and(|t| t.id.contains("Summary"))
    };
    assert!(
        !report.findings.iter().any(mentions_summary),
        "{:#?}",
        report.findings
    );
    assert!(!report.planned_skips.sheets.contains(&"Summary".to_string()));
    assert_eq!(report.severity, Severity::Ok);
    assert_eq!(report.excel.sheets, vec!["Summary"]);
}

#[test]
fn invariant_scenario_b_unknown_sheet_variable_is_one_error() {
    let project = Project::new().template(&["{{ Missing.x }} and again {{ Missing.x | upper }}"]);
    let report = project.validate();
    let hits = tagged(&report, TagCategory::TplVar, "Missing.x");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].level, Level::Error);
    assert_eq!(hits[0].stage, Stage::Template);
}

#[test]
fn invariant_scenario_c_fill_paragraph_in_template_warns() {
    let project = Project::new()
        .paragraphs("Conclusion:\n  mode: fill\n")
        .template(&["{{ Conclusion }}"]);
    let report = project.validate();
    let hits = tagged(&report, TagCategory::TplPara, "Conclusion");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].level, Level::Warning);
    assert!(hits[0].msg.contains("generated text"));
    assert!(hits[0].msg.contains("fill"));
}

#[test]
fn invariant_scenario_d_duplicate_key_last_wins() {
    let project = Project::new().sheets("a: 1\nb: 2\na: 3\n").template(&["x"]);
    let path = project.layout().sheet_tasks();

    let strict = load_strict(&path);
    assert_eq!(strict.data["a"].as_i64(), Some(3));
    assert_eq!(strict.duplicates.len(), 1);
    assert_eq!(strict.duplicates[0].key, "a");
    assert_eq!(strict.duplicates[0].location, "sheet_tasks.yaml:3");

    let lenient = load_lenient(&path).unwrap();
    assert_eq!(lenient, strict.data);

    let report = project.validate();
    let dups: Vec<_> = report.findings.iter().filter(|f| f.stage == Stage::Yaml).collect();
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0].level, Level::Warning);
    assert!(dups[0].msg.contains("sheet_tasks.yaml:3"));
}

#[test]
fn invariant_every_repeat_is_recorded() {
    let project = Project::new().sheets("a: 1\na: 2\na: 3\nb: {x: 1, x: 2}\n");
    let strict = load_strict(&project.layout().sheet_tasks());
    let keys: Vec<_> = strict.duplicates.iter().map(|d| d.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "a", "x"]);
    assert_eq!(strict.data["a"].as_i64(), Some(3));
    assert_eq!(strict.data["b"]["x"].as_i64(), Some(2));
}

#[test]
fn invariant_malformed_footer_still_scanned_in_archive_order() {
    let broken_footer = r#"<w:ftr xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:p><w:t>{{ Foot }}</w:p></w:ftr>"#;
    let project = Project::new().template_with_parts(
        &["Total {{ A.b }}"],
        vec![
            ("word/footer2.xml", broken_footer.to_string()),
            ("word/header1.xml", wordml("hdr", &["Page {{ Head }}"])),
        ],
    );

    let found = scan_placeholders(&project.template_path()).unwrap();
    assert_eq!(found, vec!["A.b", "Foot", "Head"]);
    assert!(found.iter().all(|p| !p.contains("<w:")));
}

#[test]
fn invariant_scanner_idempotent_and_markup_free() {
    let project = Project::new().template_with_header(
        &[
            "Dear {{ Client.name }},",
            "{{ Intro }} & <more>",
            "{%p if Summary.score %}{{ Summary.score | round }}{%p endif %}",
        ],
        &["Header {{ Client.code }}"],
    );
    let path = project.template_path();

    let first = scan_placeholders(&path).unwrap();
    let second = scan_placeholders(&path).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec!["Client.name", "Intro", "Summary.score | round", "Client.code"]
    );
    for expr in &first {
        assert!(!expr.contains("<w:"), "{expr}");
        assert!(!expr.contains("</w:p>"), "{expr}");
    }
}

#[test]
fn invariant_validation_never_modifies_template() {
    let project = Project::new().template(&["{{ Missing.x }}", "{{ Other }}"]);
    let before = file_digest(&project.template_path()).unwrap();
    let report = project.simulate();
    let after = file_digest(&project.template_path()).unwrap();
    assert_eq!(before, after);
    assert_eq!(report.inputs.template, before);
}

#[test]
fn invariant_undeclared_paragraph_placeholder_one_warning() {
    let project = Project::new().template(&["{{ Foo }}", "{{ Foo }} {{ Bar }}"]);
    let report = project.validate();
    for id in ["Foo", "Bar"] {
        let hits = tagged(&report, TagCategory::TplPara, id);
        assert_eq!(hits.len(), 1, "{id}");
        assert_eq!(hits[0].level, Level::Warning);
    }
}

#[test]
fn invariant_declared_sheet_undeclared_field_is_warning() {
    let project = Project::new()
        .sheets("Summary:\n  keys: {score: number}\n")
        .template(&["{{ Summary.other }}"]);
    let report = project.validate();
    let hits = tagged(&report, TagCategory::TplVar, "Summary.other");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].level, Level::Warning);
}

#[test]
fn invariant_simulation_covers_declarations() {
    let project = Project::new()
        .prompt("intro.txt")
        .sheets("Summary:\n  keys:\n    score: number\n    tags: array[string]\n    note: text\n")
        .paragraphs("Intro:\n  prompt: intro.txt\n")
        .template(&[
            "{{ Intro }}",
            "Score {{ Summary.score }} note {{ Summary.note }}",
            "{%p for t in Summary.tags %}{{ t }}{%p endfor %}",
        ]);
    let report = project.simulate();
    assert!(report.simulate.enabled);
    assert_eq!(report.simulate.ok, Some(true), "{:?}", report.simulate.error);
    assert!(!report.findings.iter().any(|f| f.stage == Stage::Render));
}

#[test]
fn invariant_simulation_reports_undefined_names() {
    let project = Project::new()
        .sheets("Summary:\n  keys: {score: number}\n")
        .template(&["{{ Summary.score }} {{ Unknown }}"]);
    let report = project.simulate();
    assert_eq!(report.simulate.ok, Some(false));
    assert!(report.simulate.error.as_deref().is_some_and(|e| e.contains("undefined")));
    let render: Vec<_> = report.findings.iter().filter(|f| f.stage == Stage::Render).collect();
    assert_eq!(render.len(), 1);
    assert_eq!(render[0].level, Level::Error);
    assert_eq!(report.severity, Severity::Error);
}

#[test]
fn invariant_simulation_missing_template() {
    let project = Project::new();
    let report = project.simulate();
    assert_eq!(report.simulate.ok, Some(false));
    assert_eq!(report.simulate.error.as_deref(), Some("template_not_found"));
}

#[test]
fn invariant_severity_derived_from_findings() {
    let projects = [
        Project::new().template(&["plain text"]),
        Project::new().template(&["{{ Undeclared }}"]),
        Project::new().template(&["{{ Missing.x }}"]),
        Project::new(),
    ];
    let expected = [Severity::Ok, Severity::Warning, Severity::Error, Severity::Error];
    for (project, want) in projects.iter().zip(expected) {
        let report = project.validate();
        let has_error = report.findings.iter().any(|f| f.level == Level::Error);
        let has_warning = report.findings.iter().any(|f| f.level == Level::Warning);
        let derived = if has_error {
            Severity::Error
        } else if has_warning {
            Severity::Warning
        } else {
            Severity::Ok
        };
        assert_eq!(report.severity, derived);
        assert_eq!(report.severity, want);
    }
}

#[test]
fn invariant_planned_skips_follow_tags() {
    let project = Project::new()
        .prompt("ok.txt")
        .sheets(
            "Summary:\n  prompt: ok.txt\n  keys: {score: number}\nAbsent:\n  prompt: ok.txt\n  keys: {x: number}\n",
        )
        .paragraphs("Intro:\n  prompt: ok.txt\n  keys: [Summary.score, Nowhere.x]\nClosing:\n  mode: fill\n  keys: [Summary.score]\n")
        .template(&["{{ Summary.score }} {{ Intro }} {{ Summary.bogus }}"])
        .workbook(&["Summary"]);
    let report = project.validate();

    assert_eq!(report.planned_skips.sheets, vec!["Absent"]);
    assert_eq!(report.planned_skips.paragraphs, vec!["Intro"]);
    // template findings never skip a sheet
    assert_eq!(tagged(&report, TagCategory::TplVar, "Summary.bogus").len(), 1);

    let plan = ExecutionPlan::from_report(&report);
    assert_eq!(plan.sheets_exec, vec!["Summary"]);
    assert_eq!(plan.paras_exec, vec!["Closing"]);
}

#[test]
fn invariant_unsafe_prompt_is_error_and_skipped() {
    let project = Project::new()
        .sheets("Summary:\n  prompt: ../../etc/passwd\n  keys: {score: number}\n")
        .template(&["{{ Summary.score }}"]);
    let report = project.validate();
    let hits = tagged(&report, TagCategory::Sheet, "Summary");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].level, Level::Error);
    assert_eq!(report.planned_skips.sheets, vec!["Summary"]);
}

#[test]
fn invariant_report_deterministic() {
    let project = Project::new()
        .sheets("Summary:\n  keys: {score: number}\n")
        .paragraphs("Summary:\n  keys: [Summary.score]\n")
        .template(&["{{ Summary.score }} {{ Ghost }}"]);
    let a = project.validate();
    let b = project.validate();
    assert_eq!(a, b);
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    assert_eq!(
        tagged(&a, TagCategory::Para, "Summary")
            .iter()
            .filter(|f| f.stage == Stage::Naming)
            .count(),
        1
    );
}

#[test]
fn invariant_report_serializes_contract_shape() {
    let project = Project::new().template(&["{{ Missing.x }}"]);
    let value = serde_json::to_value(project.validate()).unwrap();
    for key in [
        "severity",
        "excel",
        "sheets",
        "paragraphs",
        "findings",
        "planned_skips",
        "simulate",
        "placeholders",
        "inputs",
    ] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
    let finding = value["findings"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["tag"][0] == "tpl-var")
        .cloned()
        .unwrap();
    assert_eq!(finding["level"], "error");
    assert_eq!(finding["where"], "TEMPLATE");
    assert_eq!(finding["tag"], serde_json::json!(["tpl-var", "Missing.x"]));
    assert_eq!(value["placeholders"]["variables"][0], "Missing.x");
}

#[cfg(feature = "test-hooks")]
#[test]
fn invariant_every_run_goes_through_validate() {
    use docgate_core::pipeline::get_validation_call_count;

    let project = Project::new();
    let before = get_validation_call_count();
    let _ = project.validate();
    let _ = ExecutionPlan::from_report(&project.validate());
    assert!(get_validation_call_count() >= before + 2);
}
