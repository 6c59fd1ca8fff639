//! Validation System - Rule Engine
//!
//! Rules produce structured findings; they never fail. The report derives
//! severity and the planned-skip sets from the findings alone.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{
    ConfigError, ConfigLayout, ModeSpec, ParagraphMode, ParagraphTasks, ProviderCatalog,
    SheetTasks, TEMPLATE_FILE,
};
use crate::scan::{classify, PlaceholderKind};
use crate::yaml::StrictLoad;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    Error,
}

/// Stage that produced a finding (the report's `where`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Yaml,
    Config,
    Excel,
    Key,
    Naming,
    Template,
    Render,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yaml => "YAML",
            Self::Config => "CONFIG",
            Self::Excel => "EXCEL",
            Self::Key => "KEY",
            Self::Naming => "NAMING",
            Self::Template => "TEMPLATE",
            Self::Render => "RENDER",
        }
    }
}

/// What a finding is about. Only `Sheet` and `Para` feed planned skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagCategory {
    Sheet,
    Para,
    Field,
    Template,
    Provider,
    TplVar,
    TplPara,
}

/// Serialized as a `[category, id]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "(TagCategory, String)", from = "(TagCategory, String)")]
pub struct Tag {
    pub category: TagCategory,
    pub id: String,
}

impl From<Tag> for (TagCategory, String) {
    fn from(tag: Tag) -> Self {
        (tag.category, tag.id)
    }
}

impl From<(TagCategory, String)> for Tag {
    fn from((category, id): (TagCategory, String)) -> Self {
        Self { category, id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub level: Level,
    #[serde(rename = "where")]
    pub stage: Stage,
    pub msg: String,
    #[serde(default)]
    pub tag: Option<Tag>,
}

impl Finding {
    pub fn warning(stage: Stage, msg: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            stage,
            msg: msg.into(),
            tag: None,
        }
    }

    pub fn error(stage: Stage, msg: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            stage,
            msg: msg.into(),
            tag: None,
        }
    }

    pub fn tagged(mut self, category: TagCategory, id: impl Into<String>) -> Self {
        self.tag = Some(Tag {
            category,
            id: id.into(),
        });
        self
    }

    pub fn has_tag(&self, category: TagCategory, id: &str) -> bool {
        self.tag
            .as_ref()
            .is_some_and(|t| t.category == category && t.id == id)
    }
}

/// Everything a rule may look at. Built once per validation run.
pub struct RuleContext<'a> {
    pub layout: &'a ConfigLayout,
    pub sheets: &'a SheetTasks,
    pub paragraphs: &'a ParagraphTasks,
    /// Tab names of the data source; `None` when no workbook was found.
    pub excel_sheets: Option<&'a [String]>,
    /// Scanner output, first-seen order.
    pub placeholders: &'a [String],
    pub providers: &'a ProviderCatalog,
}

/// Validation rule trait - produces findings
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding>;
}

/// Findings for one loaded configuration document: every duplicate key, a
/// parse failure, or a top-level shape failure.
pub fn document_findings(
    document: &str,
    load: &StrictLoad,
    shape: Option<&ConfigError>,
) -> Vec<Finding> {
    let mut findings: Vec<Finding> = load
        .duplicates
        .iter()
        .map(|d| {
            Finding::warning(
                Stage::Yaml,
                format!(
                    "{document}: duplicate key `{}` at {}; the last value wins",
                    d.key, d.location
                ),
            )
        })
        .collect();
    if let Some(error) = &load.error {
        findings.push(Finding::error(
            Stage::Yaml,
            format!("{document} could not be loaded: {error}"),
        ));
    }
    if let Some(e) = shape {
        findings.push(Finding::error(
            Stage::Yaml,
            format!("{e}; treated as empty"),
        ));
    }
    findings
}

enum PromptIssue {
    Missing,
    Unsafe,
    NotFound(PathBuf),
    Directory(PathBuf),
}

/// Resolve a prompt path under the prompts root.
fn resolve_prompt(layout: &ConfigLayout, rel: Option<&str>) -> Result<PathBuf, PromptIssue> {
    let rel = match rel.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return Err(PromptIssue::Missing),
    };
    if !is_safe_relative(Path::new(rel)) {
        return Err(PromptIssue::Unsafe);
    }
    let abs = layout.prompts_dir().join(rel);
    if abs.is_dir() {
        Err(PromptIssue::Directory(abs))
    } else if abs.is_file() {
        Ok(abs)
    } else {
        Err(PromptIssue::NotFound(abs))
    }
}

/// Relative, and never stepping above its root.
pub fn is_safe_relative(path: &Path) -> bool {
    !path.is_absolute()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn check_provider(
    providers: &ProviderCatalog,
    owner: &str,
    provider: Option<&str>,
) -> Option<Finding> {
    let name = provider.map(str::trim).filter(|p| !p.is_empty())?;
    let msg = match providers.get(name) {
        None => format!(
            "{owner}: unknown provider `{name}` (known: {})",
            providers.names().join(", ")
        ),
        Some(spec) => {
            let present = std::env::var_os(&spec.key_env).is_some_and(|v| !v.is_empty());
            if present {
                return None;
            }
            format!(
                "{owner}: provider `{name}` needs environment variable {}, which is not set",
                spec.key_env
            )
        }
    };
    Some(Finding::warning(Stage::Config, msg).tagged(TagCategory::Provider, name))
}

// --- Concrete Rules ---

/// Shapes, prompt files, field declarations, providers and the template file.
pub struct StructureRule;

impl StructureRule {
    fn check_sheets(&self, ctx: &RuleContext<'_>, findings: &mut Vec<Finding>) {
        for entry in &ctx.sheets.entries {
            let sheet = entry.name.as_str();
            let Some(cfg) = &entry.config else {
                findings.push(
                    Finding::warning(
                        Stage::Config,
                        format!("sheet {sheet}: configuration is not a mapping, skipped"),
                    )
                    .tagged(TagCategory::Sheet, sheet),
                );
                continue;
            };

            match resolve_prompt(ctx.layout, cfg.prompt.as_deref()) {
                Ok(_) => {}
                Err(PromptIssue::Missing) => findings.push(
                    Finding::warning(
                        Stage::Config,
                        format!("sheet {sheet}: missing prompt, skipped"),
                    )
                    .tagged(TagCategory::Sheet, sheet),
                ),
                Err(PromptIssue::NotFound(p)) => findings.push(
                    Finding::warning(
                        Stage::Config,
                        format!("sheet {sheet}: prompt file not found: {}", p.display()),
                    )
                    .tagged(TagCategory::Sheet, sheet),
                ),
                Err(PromptIssue::Unsafe) => findings.push(
                    Finding::error(
                        Stage::Config,
                        format!(
                            "sheet {sheet}: prompt path `{}` must be relative to prompts/ without `..`",
                            cfg.prompt.as_deref().unwrap_or_default()
                        ),
                    )
                    .tagged(TagCategory::Sheet, sheet),
                ),
                Err(PromptIssue::Directory(p)) => findings.push(
                    Finding::error(
                        Stage::Config,
                        format!("sheet {sheet}: prompt path is a directory: {}", p.display()),
                    )
                    .tagged(TagCategory::Sheet, sheet),
                ),
            }

            if cfg.keys.is_empty() {
                findings.push(
                    Finding::warning(
                        Stage::Config,
                        format!("sheet {sheet}: keys must be a non-empty mapping, skipped"),
                    )
                    .tagged(TagCategory::Sheet, sheet),
                );
            }
            for field in &cfg.keys {
                let path = format!("{sheet}.{}", field.name);
                if field.name.is_empty() || field.name.contains('.') {
                    findings.push(
                        Finding::error(
                            Stage::Config,
                            format!("field names must be non-empty and contain no '.': `{path}`"),
                        )
                        .tagged(TagCategory::Field, path.clone()),
                    );
                }
                if field.field_type.is_none() {
                    findings.push(
                        Finding::warning(
                            Stage::Config,
                            format!(
                                "unsupported type `{}` for `{path}`, treated as string",
                                field.declared
                            ),
                        )
                        .tagged(TagCategory::Field, path),
                    );
                }
            }

            findings.extend(check_provider(
                ctx.providers,
                &format!("sheet {sheet}"),
                cfg.provider.as_deref(),
            ));
        }
    }

    fn check_paragraphs(&self, ctx: &RuleContext<'_>, findings: &mut Vec<Finding>) {
        for entry in &ctx.paragraphs.entries {
            let pid = entry.name.as_str();
            let Some(task) = &entry.config else {
                findings.push(
                    Finding::warning(
                        Stage::Config,
                        format!("paragraph {pid}: configuration is not a mapping, skipped"),
                    )
                    .tagged(TagCategory::Para, pid),
                );
                continue;
            };

            match &task.mode {
                ModeSpec::Invalid(m) => {
                    findings.push(
                        Finding::warning(
                            Stage::Config,
                            format!("paragraph {pid}: mode `{m}` is neither generate nor fill, skipped"),
                        )
                        .tagged(TagCategory::Para, pid),
                    );
                    continue;
                }
                ModeSpec::Explicit(ParagraphMode::Generate)
                | ModeSpec::Inferred(ParagraphMode::Generate) => {
                    let issue = match resolve_prompt(ctx.layout, task.prompt.as_deref()) {
                        Ok(_) => None,
                        Err(PromptIssue::Missing) => Some("missing prompt".to_string()),
                        Err(PromptIssue::Unsafe) => Some(format!(
                            "prompt path `{}` must be relative to prompts/ without `..`",
                            task.prompt.as_deref().unwrap_or_default()
                        )),
                        Err(PromptIssue::NotFound(p)) => {
                            Some(format!("prompt file not found: {}", p.display()))
                        }
                        Err(PromptIssue::Directory(p)) => {
                            Some(format!("prompt path is a directory: {}", p.display()))
                        }
                    };
                    if let Some(issue) = issue {
                        findings.push(
                            Finding::error(Stage::Config, format!("paragraph {pid}: {issue}"))
                                .tagged(TagCategory::Para, pid),
                        );
                    }
                }
                ModeSpec::Explicit(ParagraphMode::Fill)
                | ModeSpec::Inferred(ParagraphMode::Fill) => {
                    if task.prompt.is_some() {
                        findings.push(
                            Finding::warning(
                                Stage::Config,
                                format!("paragraph {pid}: prompt is ignored in fill mode"),
                            )
                            .tagged(TagCategory::Para, pid),
                        );
                    }
                }
            }

            if task.keys_malformed {
                findings.push(
                    Finding::warning(
                        Stage::Config,
                        format!("paragraph {pid}: keys is not a list of references, ignored"),
                    )
                    .tagged(TagCategory::Para, pid),
                );
            }

            findings.extend(check_provider(
                ctx.providers,
                &format!("paragraph {pid}"),
                task.provider.as_deref(),
            ));
        }
    }
}

impl ValidationRule for StructureRule {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = vec![];
        self.check_sheets(ctx, &mut findings);
        self.check_paragraphs(ctx, &mut findings);

        let template = ctx.layout.template();
        if !template.is_file() {
            findings.push(
                Finding::error(
                    Stage::Config,
                    format!("template not found: {}", template.display()),
                )
                .tagged(TagCategory::Template, TEMPLATE_FILE),
            );
        }
        findings
    }
}

/// Every declared sheet must exist in the workbook.
pub struct ExcelAlignmentRule;

impl ValidationRule for ExcelAlignmentRule {
    fn name(&self) -> &'static str {
        "excel_alignment"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let Some(excel) = ctx.excel_sheets else {
            return vec![];
        };
        let present: HashSet<&str> = excel.iter().map(String::as_str).collect();
        ctx.sheets
            .entries
            .iter()
            .filter(|e| !present.contains(e.name.as_str()))
            .map(|e| {
                Finding::warning(
                    Stage::Excel,
                    format!("sheet {} does not exist in the workbook, skipped", e.name),
                )
                .tagged(TagCategory::Sheet, e.name.clone())
            })
            .collect()
    }
}

/// Paragraph keys must name declared `sheet.field` pairs.
pub struct KeyReferenceRule;

impl ValidationRule for KeyReferenceRule {
    fn name(&self) -> &'static str {
        "key_reference"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = vec![];
        for entry in &ctx.paragraphs.entries {
            let Some(task) = &entry.config else { continue };
            let pid = entry.name.as_str();
            for key in &task.keys {
                let Some((sheet, field)) = key.split_once('.') else {
                    findings.push(
                        Finding::warning(Stage::Key, format!("{pid}: key `{key}` has no '.'"))
                            .tagged(TagCategory::Para, pid),
                    );
                    continue;
                };
                if !ctx.sheets.contains(sheet) {
                    findings.push(
                        Finding::error(
                            Stage::Key,
                            format!("{pid}: key `{key}` references unknown sheet"),
                        )
                        .tagged(TagCategory::Para, pid),
                    );
                } else if !ctx.sheets.declares_field(sheet, field) {
                    findings.push(
                        Finding::warning(
                            Stage::Key,
                            format!("{pid}: key `{key}` is not declared in {sheet}.keys"),
                        )
                        .tagged(TagCategory::Para, pid),
                    );
                }
            }
        }
        findings
    }
}

/// A paragraph named like a sheet shadows it in the render context.
pub struct NamingConflictRule;

impl ValidationRule for NamingConflictRule {
    fn name(&self) -> &'static str {
        "naming_conflict"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        ctx.paragraphs
            .entries
            .iter()
            .filter(|e| ctx.sheets.contains(&e.name))
            .map(|e| {
                Finding::warning(
                    Stage::Naming,
                    format!(
                        "paragraph {} has the same name as a sheet; the render context is ambiguous",
                        e.name
                    ),
                )
                .tagged(TagCategory::Para, e.name.clone())
            })
            .collect()
    }
}

/// Cross-reference scanned placeholders against both configurations.
pub struct TemplateReferenceRule;

impl ValidationRule for TemplateReferenceRule {
    fn name(&self) -> &'static str {
        "template_reference"
    }

    fn check(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut findings = vec![];
        let mut seen_paths: HashSet<String> = HashSet::new();
        let mut used_ids: HashSet<String> = HashSet::new();

        for expr in ctx.placeholders {
            match classify(expr) {
                PlaceholderKind::Variables(paths) => {
                    for path in paths {
                        if !seen_paths.insert(path.clone()) {
                            continue;
                        }
                        let mut parts = path.split('.');
                        let sheet = parts.next().unwrap_or_default();
                        let field = parts.next().unwrap_or_default();
                        if !ctx.sheets.contains(sheet) {
                            findings.push(
                                Finding::error(
                                    Stage::Template,
                                    format!("template variable `{path}` references an unknown sheet"),
                                )
                                .tagged(TagCategory::TplVar, path.clone()),
                            );
                        } else if !ctx.sheets.declares_field(sheet, field) {
                            findings.push(
                                Finding::warning(
                                    Stage::Template,
                                    format!("template variable `{path}` is not declared in {sheet}.keys"),
                                )
                                .tagged(TagCategory::TplVar, path.clone()),
                            );
                        }
                    }
                }
                PlaceholderKind::Paragraph(id) => {
                    if !ctx.paragraphs.contains(&id) {
                        findings.push(
                            Finding::warning(
                                Stage::Template,
                                format!("template paragraph `{id}` is not declared in paragraph_tasks"),
                            )
                            .tagged(TagCategory::TplPara, id.clone()),
                        );
                    } else {
                        let mode = ctx.paragraphs.get(&id).and_then(|t| t.mode());
                        if mode != Some(ParagraphMode::Generate) {
                            let configured = mode.map_or("invalid", |m| m.as_str());
                            findings.push(
                                Finding::warning(
                                    Stage::Template,
                                    format!(
                                        "template expects generated text for `{id}`, but it is configured as {configured}"
                                    ),
                                )
                                .tagged(TagCategory::TplPara, id.clone()),
                            );
                        }
                    }
                    used_ids.insert(id);
                }
                PlaceholderKind::Opaque => {}
            }
        }

        for pid in ctx.paragraphs.generate_ids() {
            if !used_ids.contains(pid) {
                findings.push(
                    Finding::warning(
                        Stage::Template,
                        format!("paragraph `{pid}` is configured as generate but the template never uses it"),
                    )
                    .tagged(TagCategory::Para, pid),
                );
            }
        }
        findings
    }
}

/// Runs the rules in a fixed order and concatenates their findings.
pub struct RuleEngine {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(StructureRule),
                Box::new(ExcelAlignmentRule),
                Box::new(KeyReferenceRule),
                Box::new(NamingConflictRule),
                Box::new(TemplateReferenceRule),
            ],
        }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn run(&self, ctx: &RuleContext<'_>) -> Vec<Finding> {
        let mut all_findings = vec![];
        for rule in &self.rules {
            let findings = rule.check(ctx);
            tracing::debug!(rule = rule.name(), count = findings.len(), "rule checked");
            all_findings.extend(findings);
        }
        all_findings
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}
