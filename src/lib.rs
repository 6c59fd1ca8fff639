//! Docgate Core - Pre-Flight Consistency Gate
//!
//! Checks that the sheet configuration, the paragraph configuration and the
//! document template agree with each other (and with the workbook) before any
//! extraction or generation is paid for.
//!
//! # The Five Laws (Non-Negotiable)
//! 1. Expected Problems Are Findings, Not Errors
//! 2. Validation Reads, Never Writes (the template is only ever opened)
//! 3. The Approved Document Is the Executed Document (last key wins, both loaders)
//! 4. Severity and Skips Are Derived, Never Asserted
//! 5. Agents Are Looked Up, Never Imported

pub mod coerce;
pub mod config;
pub mod hashing;
pub mod pipeline;
pub mod plan;
pub mod registry;
pub mod report;
pub mod scan;
pub mod simulate;
pub mod telemetry;
pub mod validation;
pub mod workbook;
pub mod yaml;

pub use config::{ConfigLayout, FieldType, ParagraphMode, ParagraphTasks, SheetTasks};
pub use hashing::{canonical_json, sha256_hex, InputDigests};
pub use pipeline::{validate, PipelineError, ValidationPipeline, ValidationRequest};
pub use plan::ExecutionPlan;
pub use registry::{AgentRegistry, Extractor, ParagraphGenerator, RegistryError};
pub use report::{Severity, ValidationReport};
pub use scan::{scan_placeholders, PlaceholderSummary};
pub use telemetry::init_tracing;
pub use validation::{Finding, Level, RuleEngine, Stage, TagCategory, ValidationRule};
pub use yaml::{load_lenient, load_strict, DuplicateKeyRecord};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
