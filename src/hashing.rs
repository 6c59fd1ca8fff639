//! Hashing System - SHA-256 for Inputs and Reports
//!
//! Provides deterministic digests so two runs can be shown to have seen the
//! same inputs and produced the same report.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

use crate::config::ConfigLayout;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Digest of a file's bytes; `None` when the file does not exist.
pub fn file_digest(path: &Path) -> io::Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(sha256_hex(&bytes))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Digest of any serializable value's canonical JSON.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(value)?.as_bytes()))
}

/// Digests of the three validated artifacts. Absent files stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDigests {
    pub sheet_tasks: Option<String>,
    pub paragraph_tasks: Option<String>,
    pub template: Option<String>,
}

impl InputDigests {
    pub fn for_layout(layout: &ConfigLayout) -> io::Result<Self> {
        Ok(Self {
            sheet_tasks: file_digest(&layout.sheet_tasks())?,
            paragraph_tasks: file_digest(&layout.paragraph_tasks())?,
            template: file_digest(&layout.template())?,
        })
    }
}
