//! Agent Registry - Capability-Keyed Factories
//!
//! Extractors and paragraph generators are looked up by a capability tag.
//! The caller populates the registry at startup and passes it explicitly.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::coerce::{coerce_fields, CoercedField};
use crate::config::{ConfigLayout, FieldDecl, SheetTasks};
use crate::plan::ExecutionPlan;

pub const DEFAULT_PROVIDER: &str = "qwen";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no extractor registered for `{0}`")]
    UnknownExtractor(String),

    #[error("no paragraph generator registered for `{0}`")]
    UnknownGenerator(String),
}

/// Failure inside an agent implementation.
#[derive(Debug, Error)]
#[error("{agent} failed: {message}")]
pub struct AgentError {
    pub agent: String,
    pub message: String,
}

/// Inputs for extracting one sheet.
#[derive(Debug, Clone)]
pub struct ExtractorSpec {
    pub sheet: String,
    pub fields: Vec<FieldDecl>,
    pub prompt_path: PathBuf,
    pub provider: String,
}

/// Inputs for generating one paragraph.
#[derive(Debug, Clone)]
pub struct GeneratorSpec {
    pub paragraph: String,
    pub prompt_path: PathBuf,
    pub provider: String,
    /// Extracted data, `{sheet: {field: value}}`.
    pub context: Value,
}

pub trait Extractor {
    fn extract(&self) -> Result<Map<String, Value>, AgentError>;
}

pub trait ParagraphGenerator {
    fn generate(&self) -> Result<String, AgentError>;
}

pub type ExtractorFactory = Box<dyn Fn(ExtractorSpec) -> Box<dyn Extractor> + Send + Sync>;
pub type GeneratorFactory = Box<dyn Fn(GeneratorSpec) -> Box<dyn ParagraphGenerator> + Send + Sync>;

#[derive(Default)]
pub struct AgentRegistry {
    extractors: HashMap<String, ExtractorFactory>,
    generators: HashMap<String, GeneratorFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_extractor<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(ExtractorSpec) -> Box<dyn Extractor> + Send + Sync + 'static,
    {
        self.extractors.insert(tag.into(), Box::new(factory));
    }

    pub fn register_generator<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(GeneratorSpec) -> Box<dyn ParagraphGenerator> + Send + Sync + 'static,
    {
        self.generators.insert(tag.into(), Box::new(factory));
    }

    pub fn extractor(
        &self,
        tag: &str,
        spec: ExtractorSpec,
    ) -> Result<Box<dyn Extractor>, RegistryError> {
        let factory = self
            .extractors
            .get(tag)
            .ok_or_else(|| RegistryError::UnknownExtractor(tag.to_string()))?;
        Ok(factory(spec))
    }

    pub fn generator(
        &self,
        tag: &str,
        spec: GeneratorSpec,
    ) -> Result<Box<dyn ParagraphGenerator>, RegistryError> {
        let factory = self
            .generators
            .get(tag)
            .ok_or_else(|| RegistryError::UnknownGenerator(tag.to_string()))?;
        Ok(factory(spec))
    }

    pub fn extractor_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    pub fn generator_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.generators.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

/// Run the `tag` extractor over every sheet the plan executes and coerce
/// the results to their declared types.
///
/// An agent failure skips that sheet; an unknown tag fails the whole call.
pub fn extract_planned(
    registry: &AgentRegistry,
    tag: &str,
    layout: &ConfigLayout,
    sheets: &SheetTasks,
    plan: &ExecutionPlan,
    percent_as_fraction: bool,
) -> Result<BTreeMap<String, Vec<(String, CoercedField)>>, RegistryError> {
    let mut extracted = BTreeMap::new();
    for sheet in &plan.sheets_exec {
        let Some(cfg) = sheets.get(sheet) else {
            debug!(sheet = %sheet, "sheet not configured, not extracted");
            continue;
        };
        let spec = ExtractorSpec {
            sheet: sheet.clone(),
            fields: cfg.keys.clone(),
            prompt_path: layout
                .prompts_dir()
                .join(cfg.prompt.as_deref().unwrap_or_default()),
            provider: cfg
                .provider
                .clone()
                .unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
        };
        let extractor = registry.extractor(tag, spec)?;
        match extractor.extract() {
            Ok(values) => {
                let fields = coerce_fields(sheet, &values, &cfg.keys, percent_as_fraction);
                extracted.insert(sheet.clone(), fields);
            }
            Err(e) => warn!(sheet = %sheet, error = %e, "extraction failed, sheet skipped"),
        }
    }
    Ok(extracted)
}
