//! Numeric view of a report for statistical insight models.
//!
//! Built only from the finished report, so every row is redacted and every
//! `event_id` exists in the same report.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fingerprint::component_hash;
use crate::rules::RuleSet;
use crate::types::{AnalysisContext, EventId, Level, RcaReport};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
  pub event_id: EventId,
  pub level: Level,
  pub level_ordinal: u8,
  pub component_hash: u64,
  /// Milliseconds since the previous timestamped event; `None` for the first
  /// one and for events without a timestamp.
  pub time_delta_ms: Option<i64>,
  pub message_len: usize,
  pub parse_confidence: f64,
  /// One flag per entry of [`FeatureMatrix::rule_ids`].
  pub rule_matches: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureMatrix {
  pub rule_ids: Vec<String>,
  pub rows: Vec<FeatureRow>,
}

/// One row per report event, in timeline order.
pub fn feature_view(report: &RcaReport, rules: &RuleSet, context: &AnalysisContext) -> FeatureMatrix {
  let mut previous: Option<DateTime<Utc>> = None;
  let rows = report
    .events
    .iter()
    .map(|event| {
      let time_delta_ms = match (event.timestamp, previous) {
        (Some(now), Some(prev)) => Some((now - prev).num_milliseconds()),
        _ => None,
      };
      if event.timestamp.is_some() {
        previous = event.timestamp;
      }
      FeatureRow {
        event_id: event.id,
        level: event.level,
        level_ordinal: event.level.ordinal(),
        component_hash: component_hash(event.component.as_deref()),
        time_delta_ms,
        message_len: event.message.chars().count(),
        parse_confidence: event.parse_confidence,
        rule_matches: rules.match_vector(event, context),
      }
    })
    .collect();

  FeatureMatrix {
    rule_ids: rules.rule_ids(),
    rows,
  }
}
