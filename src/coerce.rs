//! Value Coercion - Declared Type to Closed Variant
//!
//! Extraction returns loosely typed JSON. Each declared [`FieldType`] has one
//! coercion path into [`FieldValue`]; an absent value and an unparseable one
//! are distinct outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::{FieldDecl, FieldType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Number(f64),
    StringArray(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoerceError {
    #[error("cannot read {raw:?} as a number")]
    NotANumber { raw: String },

    #[error("expected a scalar or list for {expected}, found an object")]
    UnexpectedObject { expected: &'static str },
}

/// Outcome for one declared field of an extracted record.
#[derive(Debug, Clone, PartialEq)]
pub enum CoercedField {
    Present(FieldValue),
    Absent,
    Malformed(CoerceError),
}

impl CoercedField {
    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Present(v) => Some(v),
            _ => None,
        }
    }
}

/// Coerce one raw value. `Ok(None)` means absent (missing or JSON null).
pub fn coerce_value(
    field_type: FieldType,
    raw: Option<&Value>,
    percent_as_fraction: bool,
) -> Result<Option<FieldValue>, CoerceError> {
    let raw = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let value = match field_type {
        FieldType::Number => FieldValue::Number(to_number(raw, percent_as_fraction)?),
        FieldType::StringArray => FieldValue::StringArray(match raw {
            Value::Array(items) => items.iter().map(plain_text).collect(),
            Value::Object(_) => {
                return Err(CoerceError::UnexpectedObject {
                    expected: field_type.as_str(),
                })
            }
            other => vec![plain_text(other)],
        }),
        FieldType::String => FieldValue::String(plain_text(raw)),
    };
    Ok(Some(value))
}

/// Apply a sheet's field declarations to one extracted JSON object.
///
/// Declaration order is preserved; keys the declarations do not name are dropped.
pub fn coerce_fields(
    sheet: &str,
    values: &Map<String, Value>,
    decls: &[FieldDecl],
    percent_as_fraction: bool,
) -> Vec<(String, CoercedField)> {
    decls
        .iter()
        .map(|decl| {
            let outcome = match coerce_value(
                decl.effective_type(),
                values.get(&decl.name),
                percent_as_fraction,
            ) {
                Ok(Some(v)) => CoercedField::Present(v),
                Ok(None) => CoercedField::Absent,
                Err(e) => {
                    warn!(
                        sheet,
                        field = %decl.name,
                        declared = %decl.declared,
                        error = %e,
                        "coercion failed"
                    );
                    CoercedField::Malformed(e)
                }
            };
            (decl.name.clone(), outcome)
        })
        .collect()
}

fn to_number(raw: &Value, percent_as_fraction: bool) -> Result<f64, CoerceError> {
    if let Value::Number(n) = raw {
        if let Some(f) = n.as_f64() {
            return Ok(f);
        }
    }
    let text = plain_text(raw);
    let trimmed = text.trim();
    let is_percent = trimmed.ends_with('%');
    let cleaned: String = trimmed.chars().filter(|c| !matches!(c, ',' | '%')).collect();
    let number: f64 = cleaned
        .trim()
        .parse()
        .map_err(|_| CoerceError::NotANumber { raw: text.clone() })?;
    if !number.is_finite() {
        return Err(CoerceError::NotANumber { raw: text });
    }
    Ok(if is_percent && percent_as_fraction {
        number / 100.0
    } else {
        number
    })
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
