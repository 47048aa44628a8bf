//! Shared, read-only service state.

use std::sync::Arc;

use rca_engine::{Orchestrator, RedactionSource};

pub struct AppState {
  pub orchestrator: Arc<Orchestrator>,
  /// Re-checked at the start of every run; never swapped mid-run.
  pub redaction: RedactionSource,
}
