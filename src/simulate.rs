//! Render Simulation - Dry Run With Synthetic Data
//!
//! The synthetic context has the production shape: `{sheet: {field: value}}`
//! for every declared field and `{paragraph: marker}` for every generate-mode
//! paragraph. Rendering is strict: any undefined name fails the pass. Nothing
//! is written.

use std::borrow::Cow;
use std::error::Error as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use minijinja::{Environment, UndefinedBehavior};
use tracing::{debug, info};

use crate::config::{ConfigLayout, FieldType, ParagraphTasks, SheetTasks};
use crate::scan::{extract_text, ScanError};
use crate::validation::{Finding, Stage};

pub const FAKE_NUMBER: f64 = 123.45;
pub const FAKE_TEXT: &str = "sample text";
pub const TEMPLATE_NOT_FOUND: &str = "template_not_found";

static SCOPED_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([%{])(?:p|tr|tc|r)\s+").unwrap());

/// Outcome of one simulated render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulateStatus {
    pub ok: bool,
    pub error: Option<String>,
}

pub fn fake_value(field_type: FieldType) -> Value {
    match field_type {
        FieldType::Number => json!(FAKE_NUMBER),
        FieldType::StringArray => json!(["alpha", "beta"]),
        FieldType::String => json!(FAKE_TEXT),
    }
}

pub fn generated_marker(paragraph: &str) -> String {
    format!("[GENERATED:{paragraph}]")
}

/// Context covering every declared field and generate-mode paragraph.
///
/// Paragraph markers are inserted after sheets, so a paragraph sharing a
/// sheet's name replaces it, as in the production context.
pub fn build_fake_context(sheets: &SheetTasks, paragraphs: &ParagraphTasks) -> Map<String, Value> {
    let mut ctx = Map::new();
    for entry in &sheets.entries {
        let fields: Map<String, Value> = entry
            .config
            .iter()
            .flat_map(|c| c.keys.iter())
            .map(|f| (f.name.clone(), fake_value(f.effective_type())))
            .collect();
        ctx.insert(entry.name.clone(), Value::Object(fields));
    }
    for pid in paragraphs.generate_ids() {
        ctx.insert(pid.to_string(), Value::String(generated_marker(pid)));
    }
    ctx
}

/// Rewrite paragraph/row/cell/run scoped tags (`{%p if x %}`, `{{r v }}`)
/// to their plain form.
pub fn normalise_scoped_tags(text: &str) -> Cow<'_, str> {
    SCOPED_TAG_RE.replace_all(text, "{${1} ")
}

/// Strictly render template text against a context.
///
/// Jinja syntax, undefined names fail, `dict.items()` style methods resolve.
pub fn render_text(source: &str, ctx: &Map<String, Value>) -> Result<String, String> {
    let source = normalise_scoped_tags(source);
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
    env.render_str(&source, ctx)
        .map_err(|e| describe_error(&e, &source))
}

fn describe_error(e: &minijinja::Error, source: &str) -> String {
    let mut message = e.to_string();
    if let Some(snippet) = e.range().and_then(|r| source.get(r)) {
        message.push_str(&format!(" near `{snippet}`"));
    }
    let mut cause = e.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}

/// Dry-run the project template. Expected failures come back as findings;
/// only an unreadable template archive is an `Err`.
pub fn simulate_render(
    layout: &ConfigLayout,
    sheets: &SheetTasks,
    paragraphs: &ParagraphTasks,
) -> Result<(Vec<Finding>, SimulateStatus), ScanError> {
    let template = layout.template();
    if !template.is_file() {
        return Ok((
            vec![Finding::error(
                Stage::Render,
                format!("template not found: {}", template.display()),
            )],
            SimulateStatus {
                ok: false,
                error: Some(TEMPLATE_NOT_FOUND.to_string()),
            },
        ));
    }

    let ctx = build_fake_context(sheets, paragraphs);
    debug!(entries = ctx.len(), "synthetic context built");
    let text = extract_text(&template)?;

    match render_text(&text, &ctx) {
        Ok(_) => {
            info!("simulated render succeeded");
            Ok((vec![], SimulateStatus { ok: true, error: None }))
        }
        Err(message) => {
            info!(error = %message, "simulated render failed");
            Ok((
                vec![Finding::error(
                    Stage::Render,
                    format!("simulated render failed: {message}"),
                )],
                SimulateStatus {
                    ok: false,
                    error: Some(message),
                },
            ))
        }
    }
}
