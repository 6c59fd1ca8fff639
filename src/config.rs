//! Task Configuration - Typed Views Over Loaded YAML
//!
//! The typed views are forgiving: every entry that parses as a
//! mapping is kept, with malformed parts recorded in-shape so the rule engine
//! can report them instead of the loader rejecting the whole document.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::warn;

use crate::yaml::{load_lenient, LoadError};

pub const SHEET_TASKS_FILE: &str = "sheet_tasks.yaml";
pub const PARAGRAPH_TASKS_FILE: &str = "paragraph_tasks.yaml";
pub const PROVIDERS_FILE: &str = "llm.yaml";
pub const TEMPLATE_FILE: &str = "report_template.docx";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{document} must be a mapping at the top level, found {found}")]
    NotAMapping {
        document: &'static str,
        found: &'static str,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid provider catalog: {0}")]
    Providers(#[from] serde_yaml::Error),
}

/// Fixed on-disk layout of a project configuration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    pub root: PathBuf,
}

impl ConfigLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn business_configs(&self) -> PathBuf {
        self.root.join("business_configs")
    }

    pub fn sheet_tasks(&self) -> PathBuf {
        self.business_configs().join(SHEET_TASKS_FILE)
    }

    pub fn paragraph_tasks(&self) -> PathBuf {
        self.business_configs().join(PARAGRAPH_TASKS_FILE)
    }

    pub fn providers(&self) -> PathBuf {
        self.business_configs().join(PROVIDERS_FILE)
    }

    /// Root every prompt path is resolved against.
    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join("prompts")
    }

    pub fn template(&self) -> PathBuf {
        self.root.join("template").join(TEMPLATE_FILE)
    }

    /// Default directory searched for the tabular data source.
    pub fn input_dir(&self) -> PathBuf {
        self.root.join("input")
    }
}

/// Declared type of an extracted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "array[string]")]
    StringArray,
}

impl FieldType {
    pub fn parse(declared: &str) -> Option<Self> {
        match declared {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "array[string]" => Some(Self::StringArray),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::StringArray => "array[string]",
        }
    }
}

/// One `field: type` entry of a sheet's `keys`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    /// Type text as written, kept for messages.
    pub declared: String,
    /// `None` when the declared type is unsupported.
    pub field_type: Option<FieldType>,
}

impl FieldDecl {
    /// Unsupported types are handled as strings.
    pub fn effective_type(&self) -> FieldType {
        self.field_type.unwrap_or(FieldType::String)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetTaskConfig {
    pub prompt: Option<String>,
    /// Ordered as written. Empty when `keys` is missing or not a mapping.
    pub keys: Vec<FieldDecl>,
    pub provider: Option<String>,
}

impl SheetTaskConfig {
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.keys.iter().find(|f| f.name == name)
    }

    fn from_mapping(map: &Mapping) -> Self {
        let keys = match map.get("keys") {
            Some(Value::Mapping(fields)) => fields
                .iter()
                .map(|(k, t)| {
                    let declared = scalar_text(t).unwrap_or_default();
                    FieldDecl {
                        name: scalar_text(k).unwrap_or_default(),
                        field_type: FieldType::parse(&declared),
                        declared,
                    }
                })
                .collect(),
            _ => vec![],
        };
        Self {
            prompt: map.get("prompt").and_then(scalar_text),
            keys,
            provider: map.get("provider").and_then(scalar_text),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetEntry {
    pub name: String,
    /// `None` when the entry is not a mapping.
    pub config: Option<SheetTaskConfig>,
}

/// Declared sheets, in document order.
#[derive(Debug, Clone, Default)]
pub struct SheetTasks {
    pub entries: Vec<SheetEntry>,
}

impl SheetTasks {
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = top_level_mapping(value, SHEET_TASKS_FILE)?;
        let entries = map
            .iter()
            .map(|(k, v)| SheetEntry {
                name: scalar_text(k).unwrap_or_default(),
                config: v.as_mapping().map(SheetTaskConfig::from_mapping),
            })
            .collect();
        Ok(Self { entries })
    }

    /// Lenient load for execution time.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_value(&load_lenient(path)?)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn contains(&self, sheet: &str) -> bool {
        self.entries.iter().any(|e| e.name == sheet)
    }

    pub fn get(&self, sheet: &str) -> Option<&SheetTaskConfig> {
        self.entries
            .iter()
            .find(|e| e.name == sheet)
            .and_then(|e| e.config.as_ref())
    }

    pub fn declares_field(&self, sheet: &str, field: &str) -> bool {
        self.get(sheet).is_some_and(|c| c.field(field).is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParagraphMode {
    Generate,
    Fill,
}

impl ParagraphMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Fill => "fill",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeSpec {
    Explicit(ParagraphMode),
    /// `generate` when a `prompt` key is present, else `fill`.
    Inferred(ParagraphMode),
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphTaskConfig {
    pub mode: ModeSpec,
    pub prompt: Option<String>,
    /// Dotted `sheet.field` references, as written.
    pub keys: Vec<String>,
    /// `keys` was present but not a list of scalars.
    pub keys_malformed: bool,
    pub provider: Option<String>,
}

impl ParagraphTaskConfig {
    pub fn mode(&self) -> Option<ParagraphMode> {
        match &self.mode {
            ModeSpec::Explicit(m) | ModeSpec::Inferred(m) => Some(*m),
            ModeSpec::Invalid(_) => None,
        }
    }

    pub fn is_generate(&self) -> bool {
        self.mode() == Some(ParagraphMode::Generate)
    }

    fn from_mapping(map: &Mapping) -> Self {
        let mode = match map.get("mode").and_then(scalar_text) {
            Some(m) if m.is_empty() => infer_mode(map),
            Some(m) => match m.as_str() {
                "generate" => ModeSpec::Explicit(ParagraphMode::Generate),
                "fill" => ModeSpec::Explicit(ParagraphMode::Fill),
                _ => ModeSpec::Invalid(m),
            },
            None => infer_mode(map),
        };

        let (keys, keys_malformed) = match map.get("keys") {
            None | Some(Value::Null) => (vec![], false),
            Some(Value::Sequence(items)) => {
                let keys: Vec<String> = items.iter().filter_map(scalar_text).collect();
                let malformed = keys.len() != items.len();
                (keys, malformed)
            }
            Some(_) => (vec![], true),
        };

        Self {
            mode,
            prompt: map.get("prompt").and_then(scalar_text),
            keys,
            keys_malformed,
            provider: map.get("provider").and_then(scalar_text),
        }
    }
}

fn infer_mode(map: &Mapping) -> ModeSpec {
    if map.contains_key("prompt") {
        ModeSpec::Inferred(ParagraphMode::Generate)
    } else {
        ModeSpec::Inferred(ParagraphMode::Fill)
    }
}

#[derive(Debug, Clone)]
pub struct ParagraphEntry {
    pub name: String,
    pub config: Option<ParagraphTaskConfig>,
}

/// Declared paragraphs, in document order.
#[derive(Debug, Clone, Default)]
pub struct ParagraphTasks {
    pub entries: Vec<ParagraphEntry>,
}

impl ParagraphTasks {
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = top_level_mapping(value, PARAGRAPH_TASKS_FILE)?;
        let entries = map
            .iter()
            .map(|(k, v)| ParagraphEntry {
                name: scalar_text(k).unwrap_or_default(),
                config: v.as_mapping().map(ParagraphTaskConfig::from_mapping),
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_value(&load_lenient(path)?)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.name == id)
    }

    pub fn get(&self, id: &str) -> Option<&ParagraphTaskConfig> {
        self.entries
            .iter()
            .find(|e| e.name == id)
            .and_then(|e| e.config.as_ref())
    }

    /// Identifiers of paragraphs whose text is produced by generation.
    pub fn generate_ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.config.as_ref().is_some_and(|c| c.is_generate()))
            .map(|e| e.name.as_str())
            .collect()
    }
}

/// Connection details for one model provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Environment variable holding the credential.
    pub key_env: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Known providers, from `llm.yaml` or the built-in set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCatalog {
    providers: BTreeMap<String, ProviderSpec>,
}

impl ProviderCatalog {
    pub fn builtin() -> Self {
        let providers = [
            ("openai", "OPENAI_API_KEY"),
            ("qwen", "DASHSCOPE_API_KEY"),
            ("deepseek", "DEEPSEEK_API_KEY"),
        ]
        .into_iter()
        .map(|(name, key_env)| {
            (
                name.to_string(),
                ProviderSpec {
                    key_env: key_env.to_string(),
                    model_name: None,
                    base_url: None,
                },
            )
        })
        .collect();
        Self { providers }
    }

    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let providers: BTreeMap<String, ProviderSpec> = serde_yaml::from_value(value)?;
        Ok(Self { providers })
    }

    /// Catalog for a layout; falls back to the built-in set when `llm.yaml`
    /// is absent or unreadable.
    pub fn for_layout(layout: &ConfigLayout) -> Self {
        let path = layout.providers();
        if !path.is_file() {
            return Self::builtin();
        }
        match load_lenient(&path)
            .map_err(ConfigError::from)
            .and_then(Self::from_value)
        {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "provider catalog unusable, using built-in providers");
                Self::builtin()
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderSpec> {
        self.providers.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn top_level_mapping<'v>(
    value: &'v Value,
    document: &'static str,
) -> Result<std::borrow::Cow<'v, Mapping>, ConfigError> {
    match value {
        Value::Mapping(map) => Ok(std::borrow::Cow::Borrowed(map)),
        Value::Null => Ok(std::borrow::Cow::Owned(Mapping::new())),
        other => Err(ConfigError::NotAMapping {
            document,
            found: kind_name(other),
        }),
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Text of a scalar node; `None` for collections. Null reads as empty.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Tagged(t) => scalar_text(&t.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::parse_str;

    fn value(src: &str) -> Value {
        parse_str(src, "test.yaml").unwrap().0
    }

    #[test]
    fn test_sheet_tasks_keep_order_and_types() {
        let tasks = SheetTasks::from_value(&value(
            "Summary:\n  prompt: s.txt\n  keys:\n    score: number\n    tags: array[string]\n    note: text\n",
        ))
        .unwrap();
        let cfg = tasks.get("Summary").unwrap();
        let names: Vec<_> = cfg.keys.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["score", "tags", "note"]);
        assert_eq!(cfg.keys[0].field_type, Some(FieldType::Number));
        assert_eq!(cfg.keys[1].field_type, Some(FieldType::StringArray));
        assert_eq!(cfg.keys[2].field_type, None);
        assert_eq!(cfg.keys[2].effective_type(), FieldType::String);
        assert!(tasks.declares_field("Summary", "score"));
        assert!(!tasks.declares_field("Summary", "missing"));
    }

    #[test]
    fn test_non_mapping_entry_kept_without_config() {
        let tasks = SheetTasks::from_value(&value("Summary: 3\n")).unwrap();
        assert_eq!(tasks.names(), vec!["Summary"]);
        assert!(tasks.get("Summary").is_none());
    }

    #[test]
    fn test_top_level_sequence_rejected() {
        let err = SheetTasks::from_value(&value("- a\n- b\n")).unwrap_err();
        assert!(err.to_string().contains("a sequence"));
    }

    #[test]
    fn test_null_document_is_empty() {
        let tasks = ParagraphTasks::from_value(&Value::Null).unwrap();
        assert!(tasks.entries.is_empty());
    }

    #[test]
    fn test_mode_inference() {
        let tasks = ParagraphTasks::from_value(&value(
            "A:\n  prompt: a.txt\nB:\n  keys: [S.x]\nC:\n  mode: fill\n  prompt: c.txt\nD:\n  mode: rewrite\n",
        ))
        .unwrap();
        assert_eq!(tasks.get("A").unwrap().mode, ModeSpec::Inferred(ParagraphMode::Generate));
        assert_eq!(tasks.get("B").unwrap().mode, ModeSpec::Inferred(ParagraphMode::Fill));
        assert_eq!(tasks.get("C").unwrap().mode, ModeSpec::Explicit(ParagraphMode::Fill));
        assert_eq!(tasks.get("D").unwrap().mode(), None);
        assert_eq!(tasks.generate_ids(), vec!["A"]);
    }

    #[test]
    fn test_paragraph_keys_not_a_list() {
        let tasks = ParagraphTasks::from_value(&value("A:\n  keys: S.x\n")).unwrap();
        let cfg = tasks.get("A").unwrap();
        assert!(cfg.keys_malformed);
        assert!(cfg.keys.is_empty());
    }

    #[test]
    fn test_provider_catalog_from_yaml() {
        let catalog = ProviderCatalog::from_value(value(
            "local:\n  key_env: LOCAL_KEY\n  model_name: m1\n",
        ))
        .unwrap();
        assert_eq!(catalog.get("local").unwrap().key_env, "LOCAL_KEY");
        assert!(catalog.get("openai").is_none());
    }

    #[test]
    fn test_lenient_load_keeps_last_value_and_rejects_missing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ConfigLayout::new(dir.path());
        std::fs::create_dir_all(layout.business_configs()).unwrap();
        std::fs::write(
            layout.sheet_tasks(),
            "A:\n  keys: {x: number}\nA:\n  keys: {y: number}\n",
        )
        .unwrap();
        let sheets = SheetTasks::load(&layout.sheet_tasks()).unwrap();
        assert_eq!(sheets.names(), vec!["A"]);
        assert_eq!(sheets.get("A").unwrap().keys[0].name, "y");

        assert!(matches!(
            ParagraphTasks::load(&layout.paragraph_tasks()),
            Err(ConfigError::Load(LoadError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_layout_paths() {
        let layout = ConfigLayout::new("/proj/configs");
        assert!(layout.sheet_tasks().ends_with("business_configs/sheet_tasks.yaml"));
        assert!(layout.template().ends_with("template/report_template.docx"));
    }
}
