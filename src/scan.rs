//! Placeholder Scanner - Template Introspection
//!
//! A `.docx` template is a zip container of WordprocessingML parts. Word
//! freely splits one visible `{{ expr }}` across several runs, so the scanner
//! rebuilds the visible text from `<w:t>` nodes before matching expressions.
//! The source file is only ever read.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::LazyLock;

use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

pub const MAIN_PART: &str = "word/document.xml";
pub const WORDML_NS: &[u8] = b"http://schemas.openxmlformats.org/wordprocessingml/2006/main";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{\s*(.+?)\s*\}\}").unwrap());
static VAR_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)+").unwrap());
static SIMPLE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*$").unwrap());
static STRING_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap());

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read template: {0}")]
    Io(#[from] io::Error),

    #[error("template is not a readable archive: {0}")]
    Archive(#[from] ZipError),
}

/// Shape of one placeholder expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// One or more `sheet.field` paths, possibly wrapped in filters.
    Variables(Vec<String>),
    /// A bare identifier, read as a paragraph reference.
    Paragraph(String),
    /// Anything else: calls, loops, literals.
    Opaque,
}

/// Classify an expression's inner text.
///
/// Quoted literals are ignored when looking for paths, so `'a.txt'` is not a
/// variable reference.
pub fn classify(expr: &str) -> PlaceholderKind {
    let expr = expr.trim();
    let unquoted = STRING_LITERAL_RE.replace_all(expr, " ");
    let mut paths: Vec<String> = Vec::new();
    for m in VAR_PATH_RE.find_iter(&unquoted) {
        if !paths.iter().any(|p| p == m.as_str()) {
            paths.push(m.as_str().to_string());
        }
    }
    if !paths.is_empty() {
        return PlaceholderKind::Variables(paths);
    }
    if SIMPLE_ID_RE.is_match(expr) {
        return PlaceholderKind::Paragraph(expr.to_string());
    }
    PlaceholderKind::Opaque
}

/// Scanned placeholders grouped by shape, as carried in the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderSummary {
    pub variables: Vec<String>,
    pub paragraphs: Vec<String>,
    pub others: Vec<String>,
    /// Every scanned expression, first-seen order.
    pub raw: Vec<String>,
}

impl PlaceholderSummary {
    pub fn from_raw(raw: &[String]) -> Self {
        let mut variables = Vec::new();
        let mut paragraphs = Vec::new();
        let mut others = Vec::new();
        for expr in raw {
            match classify(expr) {
                PlaceholderKind::Variables(paths) => variables.extend(paths),
                PlaceholderKind::Paragraph(id) => paragraphs.push(id),
                PlaceholderKind::Opaque => others.push(expr.trim().to_string()),
            }
        }
        for list in [&mut variables, &mut paragraphs, &mut others] {
            list.sort();
            list.dedup();
        }
        Self {
            variables,
            paragraphs,
            others,
            raw: raw.to_vec(),
        }
    }
}

/// Placeholder inner expressions of a template, deduplicated in first-seen order.
///
/// A missing template yields an empty list.
pub fn scan_placeholders(path: &Path) -> Result<Vec<String>, ScanError> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let text = extract_text(path)?;
    let found = extract_expressions(&text);
    debug!(template = %path.display(), count = found.len(), "placeholders scanned");
    Ok(found)
}

/// Match `{{ ... }}` expressions in linear text.
pub fn extract_expressions(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|expr| seen.insert(expr.clone()))
        .collect()
}

/// Visible text of the main document part followed by every header and
/// footer part, joined by newlines.
pub fn extract_text(path: &Path) -> Result<String, ScanError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;

    let mut parts = vec![MAIN_PART.to_string()];
    parts.extend(
        archive
            .file_names()
            .filter(|name| is_header_or_footer(name))
            .map(str::to_string),
    );

    let mut texts = Vec::with_capacity(parts.len());
    for part in &parts {
        let bytes = match read_part(&mut archive, part)? {
            Some(b) => b,
            None => {
                texts.push(String::new());
                continue;
            }
        };
        let text = match run_text(&bytes) {
            Ok(t) => t,
            Err(e) => {
                warn!(part = %part, error = %e, "part is not well-formed XML, decoding raw bytes");
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };
        texts.push(text);
    }
    Ok(texts.join("\n"))
}

fn is_header_or_footer(name: &str) -> bool {
    (name.starts_with("word/header") || name.starts_with("word/footer")) && name.ends_with(".xml")
}

fn read_part(archive: &mut ZipArchive<File>, name: &str) -> Result<Option<Vec<u8>>, ScanError> {
    let mut file = match archive.by_name(name) {
        Ok(f) => f,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

/// Concatenate the text of every WordprocessingML `<t>` element in document order.
pub(crate) fn run_text(xml: &[u8]) -> Result<String, String> {
    let mut reader = NsReader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_resolved_event_into(&mut buf) {
            Ok((ResolveResult::Bound(Namespace(ns)), Event::Start(e)))
                if ns == WORDML_NS && e.local_name().as_ref() == b"t" =>
            {
                in_text = true;
            }
            Ok((ResolveResult::Bound(Namespace(ns)), Event::End(e)))
                if ns == WORDML_NS && e.local_name().as_ref() == b"t" =>
            {
                in_text = false;
            }
            Ok((_, Event::Text(t))) if in_text => {
                out.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok((_, Event::CData(c))) if in_text => {
                out.push_str(&String::from_utf8_lossy(&c));
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
        buf.clear();
    }
    Ok(out)
}
