//! Docgate CLI - pre-flight gate for report generation
//!
//! Commands: validate, plan
//! Outputs JSON to stdout, logs to stderr
//! Exit codes: 0 ok (or not strict), 1 strict and severity error, 2 validation itself failed

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info, Level};

use docgate_core::pipeline::{ValidationPipeline, ValidationRequest};
use docgate_core::report::{write_report_files, Severity, ValidationReport};
use docgate_core::{init_tracing, ExecutionPlan};

#[derive(Parser)]
#[command(name = "docgate-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Docgate CLI - config, workbook and template consistency gate")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format
    #[arg(
        long,
        global = true,
        value_enum,
        env = "DOCGATE_LOG_FORMAT",
        default_value_t = LogFormat::Text
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Args)]
struct Target {
    /// Project configuration directory
    #[arg(short, long, env = "DOCGATE_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Workbook to align against (default: first *.xls* in <config_dir>/input)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Dry-run the template with synthetic data
    #[arg(long)]
    simulate: bool,
}

impl Target {
    fn request(&self) -> ValidationRequest {
        ValidationRequest {
            config_dir: self.config_dir.clone(),
            data_source: self.input.clone(),
            simulate_render: self.simulate,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a project and write validator_report.{json,md}
    Validate {
        #[command(flatten)]
        target: Target,

        /// Exit 1 when the report severity is error
        #[arg(long)]
        strict: bool,

        /// Directory for the report files
        #[arg(long, default_value = "logs")]
        logs: PathBuf,
    },

    /// Print the execution plan derived from a validation run
    Plan {
        #[command(flatten)]
        target: Target,
    },
}

fn run_validate(target: &Target, logs: &Path) -> Result<ValidationReport> {
    let report = ValidationPipeline::new()
        .validate(&target.request())
        .context("validation failed")?;
    write_report_files(&report, logs).context("failed to write report files")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(report)
}

fn run_plan(target: &Target) -> Result<ExecutionPlan> {
    let report = ValidationPipeline::new()
        .validate(&target.request())
        .context("validation failed")?;
    let plan = ExecutionPlan::from_report(&report);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(plan)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.log_format == LogFormat::Json, level);

    match cli.command {
        Commands::Validate {
            target,
            strict,
            logs,
        } => match run_validate(&target, &logs) {
            Ok(report) => {
                info!(
                    severity = report.severity.as_str(),
                    simulate_enabled = report.simulate.enabled,
                    simulate_ok = ?report.simulate.ok,
                    skip_sheets = ?report.planned_skips.sheets,
                    skip_paragraphs = ?report.planned_skips.paragraphs,
                    "validation finished"
                );
                if strict && report.severity == Severity::Error {
                    ExitCode::from(1)
                } else {
                    ExitCode::SUCCESS
                }
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "validation aborted");
                println!("{}", serde_json::json!({ "error": message }));
                ExitCode::from(2)
            }
        },

        Commands::Plan { target } => match run_plan(&target) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                let message = format!("{e:#}");
                error!(error = %message, "planning aborted");
                println!("{}", serde_json::json!({ "error": message }));
                ExitCode::from(2)
            }
        },
    }
}
