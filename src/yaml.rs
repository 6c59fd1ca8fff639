//! YAML Loading - Strict and Lenient
//!
//! Both loaders drive the same event-level node builder, so the document the
//! validator approved is exactly the document execution reads: a repeated
//! mapping key keeps its first position and takes its last value.
//!
//! The strict loader never fails. It reports duplicates with their source
//! line and turns every other problem into an error string.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Number, Value};
use thiserror::Error;
use tracing::debug;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

/// A mapping key defined more than once in the same mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateKeyRecord {
    pub key: String,
    /// `<file>:<line>` of the repeated occurrence.
    pub location: String,
}

/// Three-way outcome of [`load_strict`].
#[derive(Debug, Clone)]
pub struct StrictLoad {
    pub data: Value,
    pub duplicates: Vec<DuplicateKeyRecord>,
    pub error: Option<String>,
}

impl StrictLoad {
    fn failed(message: String) -> Self {
        Self {
            data: Value::Mapping(Mapping::new()),
            duplicates: vec![],
            error: Some(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{path} not found")]
    NotFound { path: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// Load a document for validation: duplicates recorded, failures reported in-band.
pub fn load_strict(path: &Path) -> StrictLoad {
    let origin = origin_name(path);
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return StrictLoad::failed(format!("{} not found", path.display()));
        }
        Err(e) => return StrictLoad::failed(format!("{}: {}", path.display(), e)),
    };

    match parse_str(&source, &origin) {
        Ok((data, duplicates)) => {
            debug!(file = %origin, duplicates = duplicates.len(), "strict load complete");
            StrictLoad {
                data,
                duplicates,
                error: None,
            }
        }
        Err(message) => StrictLoad::failed(message),
    }
}

/// Load a document for execution: no duplicate tracking, errors raised.
pub fn load_lenient(path: &Path) -> Result<Value, LoadError> {
    let shown = path.display().to_string();
    let source = fs::read_to_string(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            LoadError::NotFound { path: shown.clone() }
        } else {
            LoadError::Io {
                path: shown.clone(),
                source: e,
            }
        }
    })?;

    parse_str(&source, &origin_name(path))
        .map(|(value, _)| value)
        .map_err(|message| LoadError::Parse {
            path: shown,
            message,
        })
}

/// Parse YAML text into a value plus every duplicate key encountered.
///
/// `origin` prefixes duplicate locations. An empty stream yields `Null`.
pub fn parse_str(source: &str, origin: &str) -> Result<(Value, Vec<DuplicateKeyRecord>), String> {
    let mut builder = NodeBuilder::new(origin);
    let mut parser = Parser::new(source.chars());
    parser
        .load(&mut builder, false)
        .map_err(|e| e.to_string())?;
    Ok((builder.root.unwrap_or(Value::Null), builder.duplicates))
}

fn origin_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

struct PendingKey {
    value: Value,
    repr: String,
    mark: Marker,
}

enum Frame {
    Sequence {
        items: Vec<Value>,
        anchor: usize,
        mark: Marker,
    },
    Mapping {
        map: Mapping,
        seen: HashSet<String>,
        key: Option<PendingKey>,
        anchor: usize,
        mark: Marker,
    },
}

struct NodeBuilder<'a> {
    origin: &'a str,
    stack: Vec<Frame>,
    anchors: HashMap<usize, Value>,
    root: Option<Value>,
    duplicates: Vec<DuplicateKeyRecord>,
}

impl<'a> NodeBuilder<'a> {
    fn new(origin: &'a str) -> Self {
        Self {
            origin,
            stack: vec![],
            anchors: HashMap::new(),
            root: None,
            duplicates: vec![],
        }
    }

    fn remember(&mut self, anchor: usize, value: &Value) {
        if anchor > 0 {
            self.anchors.insert(anchor, value.clone());
        }
    }

    /// Attach a finished node to its parent.
    fn complete(&mut self, value: Value, mark: Marker, repr: Option<String>) {
        match self.stack.last_mut() {
            None => {
                if self.root.is_none() {
                    self.root = Some(value);
                }
            }
            Some(Frame::Sequence { items, .. }) => items.push(value),
            Some(Frame::Mapping { map, seen, key, .. }) => match key.take() {
                None => {
                    let repr = repr.unwrap_or_else(|| key_repr(&value));
                    *key = Some(PendingKey { value, repr, mark });
                }
                Some(pending) => {
                    if !seen.insert(pending.repr.clone()) {
                        self.duplicates.push(DuplicateKeyRecord {
                            location: format!("{}:{}", self.origin, pending.mark.line()),
                            key: pending.repr,
                        });
                    }
                    map.insert(pending.value, value);
                }
            },
        }
    }
}

impl MarkedEventReceiver for NodeBuilder<'_> {
    fn on_event(&mut self, ev: Event, mark: Marker) {
        match ev {
            Event::Scalar(text, style, anchor, ..) => {
                let value = resolve_scalar(&text, &style);
                self.remember(anchor, &value);
                self.complete(value, mark, Some(text));
            }
            Event::Alias(anchor) => {
                let value = self.anchors.get(&anchor).cloned().unwrap_or(Value::Null);
                self.complete(value, mark, None);
            }
            Event::SequenceStart(anchor, ..) => self.stack.push(Frame::Sequence {
                items: vec![],
                anchor,
                mark,
            }),
            Event::MappingStart(anchor, ..) => self.stack.push(Frame::Mapping {
                map: Mapping::new(),
                seen: HashSet::new(),
                key: None,
                anchor,
                mark,
            }),
            Event::SequenceEnd | Event::MappingEnd => {
                let (value, anchor, start) = match self.stack.pop() {
                    Some(Frame::Sequence {
                        items,
                        anchor,
                        mark,
                    }) => (Value::Sequence(items), anchor, mark),
                    Some(Frame::Mapping {
                        map, anchor, mark, ..
                    }) => (Value::Mapping(map), anchor, mark),
                    None => return,
                };
                self.remember(anchor, &value);
                self.complete(value, start, None);
            }
            _ => {}
        }
    }
}

fn key_repr(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// YAML 1.2 core-schema resolution for plain scalars; quoted scalars stay strings.
fn resolve_scalar(text: &str, style: &TScalarStyle) -> Value {
    if !matches!(style, TScalarStyle::Plain) {
        return Value::String(text.to_string());
    }
    match text {
        "" | "~" | "null" | "Null" | "NULL" => return Value::Null,
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        ".inf" | ".Inf" | ".INF" | "+.inf" | "+.Inf" | "+.INF" => {
            return Value::Number(Number::from(f64::INFINITY))
        }
        "-.inf" | "-.Inf" | "-.INF" => return Value::Number(Number::from(f64::NEG_INFINITY)),
        ".nan" | ".NaN" | ".NAN" => return Value::Number(Number::from(f64::NAN)),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(Number::from(i));
    }
    let numeric_chars = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
    if numeric_chars && text.chars().any(|c| c.is_ascii_digit()) {
        if let Ok(f) = text.parse::<f64>() {
            return Value::Number(Number::from(f));
        }
    }
    Value::String(text.to_string())
}
