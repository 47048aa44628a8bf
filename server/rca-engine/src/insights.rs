//! Boundary to optional external collaborators (ML insight model, AI summarizer).
//!
//! Collaborators only ever receive the redacted views built here: the
//! [`FeatureMatrix`] and the [`SummaryBundle`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::features::FeatureMatrix;
use crate::types::{AiSummary, Correlation, Event, EventId, Issue, MlInsights, RcaReport, RedactionAudit};

#[derive(Debug, Error)]
pub enum InsightError {
  #[error("collaborator unavailable: {0}")]
  Unavailable(String),

  #[error("collaborator failed: {0}")]
  Failed(String),
}

#[async_trait]
pub trait InsightModel: Send + Sync {
  async fn analyze(&self, features: &FeatureMatrix) -> Result<MlInsights, InsightError>;
}

#[async_trait]
pub trait Summarizer: Send + Sync {
  async fn summarize(&self, bundle: &SummaryBundle) -> Result<AiSummary, InsightError>;
}

/// Collaborators wired into one orchestrator. Either may be absent.
#[derive(Clone, Default)]
pub struct Collaborators {
  pub insight_model: Option<Arc<dyn InsightModel>>,
  pub summarizer: Option<Arc<dyn Summarizer>>,
}

impl std::fmt::Debug for Collaborators {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Collaborators")
      .field("insight_model", &self.insight_model.is_some())
      .field("summarizer", &self.summarizer.is_some())
      .finish()
  }
}

/// Redacted payload handed to a summarizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryBundle {
  pub run_id: String,
  pub events: Vec<Event>,
  pub issues: Vec<Issue>,
  pub correlations: Vec<Correlation>,
  pub redaction_audit: RedactionAudit,
  pub metadata: BTreeMap<String, String>,
  /// True when relevant events were dropped to respect the cap.
  pub truncated: bool,
}

/// Signal events plus every event an issue or correlation points at,
/// capped at `max_events` in timeline order.
pub fn summary_bundle(report: &RcaReport, max_events: usize) -> SummaryBundle {
  let mut wanted: BTreeSet<EventId> = report
    .events
    .iter()
    .filter(|e| e.level.is_signal())
    .map(|e| e.id)
    .collect();
  for issue in &report.issues {
    wanted.extend(issue.related_event_ids.iter().copied());
  }
  for correlation in &report.correlations {
    wanted.extend(correlation.event_ids.iter().copied());
  }

  let truncated = wanted.len() > max_events;
  let events = wanted
    .into_iter()
    .take(max_events)
    .filter_map(|id| report.event(id).cloned())
    .collect();

  SummaryBundle {
    run_id: report.run_id.clone(),
    events,
    issues: report.issues.clone(),
    correlations: report.correlations.clone(),
    redaction_audit: report.redaction_audit.clone(),
    metadata: report.metadata.clone(),
    truncated,
  }
}

/// Drop ids a model returned that do not exist in the report.
pub(crate) fn retain_known_ids(report: &RcaReport, mut insights: MlInsights) -> MlInsights {
  let known = |id: &EventId| report.event(*id).is_some();
  insights.anomalies.retain(known);
  for ids in insights.clusters.values_mut() {
    ids.retain(known);
  }
  insights.clusters.retain(|_, ids| !ids.is_empty());
  insights
}
