//! Binary entrypoint for the RCA upload service.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use rca_api::AppState;
use rca_engine::{Config, Orchestrator, PairingTable, RedactionSource, RuleSet};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let port: u16 = std::env::var("PORT").unwrap_or_else(|_| "5005".into()).parse()?;

  let rules = match std::env::var("RCA_RULES_CONFIG") {
    Ok(path) => RuleSet::from_path(Path::new(&path))?,
    Err(_) => RuleSet::standard(),
  };
  let pairings = match std::env::var("RCA_PAIRINGS_CONFIG") {
    Ok(path) => PairingTable::from_path(Path::new(&path))?,
    Err(_) => PairingTable::standard(),
  };
  let redaction = match std::env::var("RCA_REDACTION_CONFIG") {
    Ok(path) => RedactionSource::from_path(path),
    Err(_) => RedactionSource::builtin()?,
  };
  // Refuse to start on a broken pattern file.
  redaction.snapshot()?;

  let orchestrator = Orchestrator::new(Config::from_env(), rules, pairings)?;
  let state = Arc::new(AppState {
    orchestrator: Arc::new(orchestrator),
    redaction,
  });
  let app = rca_api::app(state);

  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  info!(%addr, "rca-api listening");

  let listener = tokio::net::TcpListener::bind(addr).await?;
  axum::serve(listener, app).await?;

  Ok(())
}
