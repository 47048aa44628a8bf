//! Binary entrypoint: analyze one log file or zip bundle from disk and write
//! the RcaReport JSON to stdout.
//!
//! Failures print an ErrorOutput object instead and exit with status 1.
//! Diagnostics go to stderr (`RUST_LOG`).

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rca_engine::features::feature_view;
use rca_engine::types::{AnalysisContext, Capabilities, ErrorOutput};
use rca_engine::{
  CancelToken, Config, Orchestrator, PairingTable, RcaError, Redactor, RuleSet, RunOptions, TestPlan, Upload,
};

#[derive(Debug, Parser)]
#[command(name = "rca-engine", about = "Root-cause analysis for provisioning logs")]
struct Args {
  /// .log, .txt or .zip file to analyze.
  input: PathBuf,

  /// Test plan JSON (array of steps or {"steps": [...]}).
  #[arg(long)]
  plan: Option<PathBuf>,

  /// Redaction pattern JSON. Built-in patterns when absent.
  #[arg(long)]
  redaction: Option<PathBuf>,

  /// Rule table JSON. Built-in rules when absent.
  #[arg(long)]
  rules: Option<PathBuf>,

  /// Causal pairing JSON. Built-in pairings when absent.
  #[arg(long)]
  pairings: Option<PathBuf>,

  #[arg(long)]
  deployment_method: Option<String>,

  #[arg(long)]
  test_environment: Option<String>,

  #[arg(long)]
  no_rules: bool,

  #[arg(long)]
  no_correlations: bool,

  /// Print the feature matrix instead of the report.
  #[arg(long)]
  features: bool,

  #[arg(long)]
  pretty: bool,
}

fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(io::stderr)
    .init();

  let args = Args::parse();
  if let Err(e) = run_binary(&args) {
    tracing::error!(error = %e, "analysis failed");
    let out = ErrorOutput::from_error(&e);
    let mut stdout = io::stdout().lock();
    let _ = serde_json::to_writer(&mut stdout, &out);
    let _ = writeln!(stdout);
    std::process::exit(1);
  }
}

fn run_binary(args: &Args) -> Result<(), RcaError> {
  let rules = match &args.rules {
    Some(path) => RuleSet::from_path(path)?,
    None => RuleSet::standard(),
  };
  let pairings = match &args.pairings {
    Some(path) => PairingTable::from_path(path)?,
    None => PairingTable::standard(),
  };
  let redactor = match &args.redaction {
    Some(path) => Redactor::from_path(path)?,
    None => Redactor::standard()?,
  };
  let test_plan = match &args.plan {
    Some(path) => Some(TestPlan::from_json(&std::fs::read_to_string(path)?)?),
    None => None,
  };

  let orchestrator = Orchestrator::new(Config::from_env(), rules, pairings)?;
  let options = RunOptions {
    capabilities: Capabilities {
      rules: !args.no_rules,
      correlations: !args.no_correlations,
      ..Capabilities::default()
    },
    test_plan,
    context: AnalysisContext {
      deployment_method: args.deployment_method.clone(),
      test_environment: args.test_environment.clone(),
      ..AnalysisContext::default()
    },
  };

  let intake = orchestrator.accept(read_upload(&args.input)?)?;
  let report = orchestrator.analyze(intake, &redactor, &options, &CancelToken::new())?;

  let mut out = io::BufWriter::new(io::stdout().lock());
  if args.features {
    let matrix = feature_view(&report, orchestrator.rules(), &options.context);
    write_json(&mut out, &matrix, args.pretty)?;
  } else {
    write_json(&mut out, &report, args.pretty)?;
  }
  writeln!(out)?;
  out.flush()?;
  Ok(())
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T, pretty: bool) -> Result<(), RcaError> {
  let result = if pretty {
    serde_json::to_writer_pretty(out, value)
  } else {
    serde_json::to_writer(out, value)
  };
  result.map_err(|e| RcaError::internal(format!("json encode: {}", e)))
}

fn read_upload(path: &Path) -> Result<Upload, RcaError> {
  let bytes = std::fs::read(path)?;
  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  Ok(Upload {
    file_name,
    content_type: None,
    declared_size: Some(bytes.len() as u64),
    bytes,
  })
}
