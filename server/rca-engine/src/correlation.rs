//! Group related events on the timeline.
//!
//! Temporal: signal events (WARN and above) falling inside a sliding window
//! anchored at each signal event. Causal: configured antecedent → consequent
//! pairings seen within the same window.
//!
//! Strength: mean level weight × n/(n+2), plus a fixed bonus for causal
//! pairs, capped at 1 and rounded to 3 decimals.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RcaError;
use crate::timeline::Timeline;
use crate::types::{Correlation, CorrelationKind, Event, EventId, ReportWarning, Stage};

const CAUSAL_BONUS: f64 = 0.2;

// ---------------------------------------------------------------------------
// Pairing table
// ---------------------------------------------------------------------------

/// One antecedent → consequent pairing. Both sides are case-insensitive
/// substrings matched against component and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalPairing {
  pub name: String,
  pub antecedent: String,
  pub consequent: String,
}

impl CausalPairing {
  pub fn new(name: &str, antecedent: &str, consequent: &str) -> Self {
    Self {
      name: name.into(),
      antecedent: antecedent.into(),
      consequent: consequent.into(),
    }
  }
}

/// Read-only pairing table shared across runs.
#[derive(Debug, Clone)]
pub struct PairingTable {
  pairings: Vec<CausalPairing>,
}

impl PairingTable {
  pub fn new(pairings: Vec<CausalPairing>) -> Result<Self, RcaError> {
    let mut normalized = Vec::with_capacity(pairings.len());
    for (idx, p) in pairings.into_iter().enumerate() {
      let antecedent = p.antecedent.trim().to_lowercase();
      let consequent = p.consequent.trim().to_lowercase();
      if p.name.trim().is_empty() || antecedent.is_empty() || consequent.is_empty() {
        return Err(RcaError::PairingConfig(format!(
          "pairing {} needs name, antecedent and consequent",
          idx
        )));
      }
      normalized.push(CausalPairing {
        name: p.name,
        antecedent,
        consequent,
      });
    }
    Ok(Self {
      pairings: normalized,
    })
  }

  pub fn standard() -> Self {
    Self {
      pairings: vec![
        CausalPairing::new("driver_install_reboot", "driver install", "reboot required"),
        CausalPairing::new("service_dependency", "service", "dependency"),
        CausalPairing::new("disk_space_write", "disk space", "write failed"),
        CausalPairing::new("timeout_connection", "timeout", "connection"),
        CausalPairing::new("memory_allocation", "memory", "allocation"),
        CausalPairing::new("download_install", "download failed", "install failed"),
      ],
    }
  }

  /// JSON: an array of `{name, antecedent, consequent}`.
  pub fn from_json(json: &str) -> Result<Self, RcaError> {
    let pairings: Vec<CausalPairing> = serde_json::from_str(json)
      .map_err(|e| RcaError::PairingConfig(format!("invalid JSON: {}", e)))?;
    Self::new(pairings)
  }

  pub fn from_path(path: &Path) -> Result<Self, RcaError> {
    let json = std::fs::read_to_string(path)
      .map_err(|e| RcaError::PairingConfig(format!("{}: {}", path.display(), e)))?;
    Self::from_json(&json)
  }

  pub fn pairings(&self) -> &[CausalPairing] {
    &self.pairings
  }
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CorrelationOutcome {
  pub correlations: Vec<Correlation>,
  pub warnings: Vec<ReportWarning>,
}

fn round3(x: f64) -> f64 {
  (x * 1000.0).round() / 1000.0
}

fn strength(members: &[&Event], bonus: f64) -> f64 {
  if members.is_empty() {
    return 0.0;
  }
  let n = members.len() as f64;
  let mean = members.iter().map(|e| e.level.weight()).sum::<f64>() / n;
  round3((mean * n / (n + 2.0) + bonus).min(1.0))
}

struct Entry<'a> {
  event: &'a Event,
  ts: DateTime<Utc>,
  haystack: String,
}

/// Correlate a timeline. Pure function of its inputs.
pub fn correlate(timeline: &Timeline, pairings: &PairingTable, config: &Config) -> CorrelationOutcome {
  let mut outcome = CorrelationOutcome::default();

  let Some(width) = Duration::try_seconds(config.correlation_window_secs).filter(|w| *w > Duration::zero()) else {
    outcome.warnings.push(ReportWarning::new(
      Stage::Correlation,
      format!("invalid correlation window of {}s; correlation skipped", config.correlation_window_secs),
    ));
    return outcome;
  };

  // Events without an effective timestamp do not take part.
  let entries: Vec<Entry> = timeline
    .with_effective()
    .filter_map(|(event, ts)| {
      ts.map(|ts| Entry {
        event,
        ts,
        haystack: format!(
          "{} {}",
          event.component.as_deref().unwrap_or_default(),
          event.message
        )
        .to_lowercase(),
      })
    })
    .collect();

  let mut found = temporal(&entries, width, config.min_correlation_events.max(2), &mut outcome.warnings);
  found.extend(causal(&entries, pairings, width, &mut outcome.warnings));

  found.sort_by(|a, b| {
    a.window_start
      .cmp(&b.window_start)
      .then_with(|| a.kind.cmp(&b.kind))
      .then_with(|| a.event_ids.first().cmp(&b.event_ids.first()))
      .then_with(|| a.label.cmp(&b.label))
      .then_with(|| a.event_ids.cmp(&b.event_ids))
  });
  for (idx, c) in found.iter_mut().enumerate() {
    c.id = format!("cor-{:04}", idx + 1);
  }

  debug!(
    correlations = found.len(),
    eligible_events = entries.len(),
    "correlation complete"
  );
  outcome.correlations = found;
  outcome
}

fn temporal(
  entries: &[Entry],
  width: Duration,
  min_events: usize,
  warnings: &mut Vec<ReportWarning>,
) -> Vec<Correlation> {
  let signals: Vec<&Entry> = entries.iter().filter(|e| e.event.level.is_signal()).collect();
  let mut out = Vec::new();
  // Index (into `signals`) of the last member of the previously emitted window.
  let mut last_emitted: Option<usize> = None;

  for (i, anchor) in signals.iter().enumerate() {
    let Some(end) = anchor.ts.checked_add_signed(width) else {
      warn!(event = %anchor.event.id, "correlation window overflows time range");
      warnings.push(ReportWarning::new(
        Stage::Correlation,
        format!("window at event {} overflows the time range; skipped", anchor.event.id),
      ));
      continue;
    };
    let mut j = i;
    while j < signals.len() && signals[j].ts <= end {
      j += 1;
    }
    if j - i < min_events {
      continue;
    }
    if last_emitted.is_some_and(|last| j - 1 <= last) {
      continue;
    }
    let members: Vec<&Event> = signals[i..j].iter().map(|e| e.event).collect();
    out.push(Correlation {
      id: String::new(),
      kind: CorrelationKind::Temporal,
      label: None,
      window_start: anchor.ts,
      window_end: end,
      event_ids: members.iter().map(|e| e.id).collect(),
      strength: strength(&members, 0.0),
    });
    last_emitted = Some(j - 1);
  }
  out
}

fn causal(
  entries: &[Entry],
  pairings: &PairingTable,
  width: Duration,
  warnings: &mut Vec<ReportWarning>,
) -> Vec<Correlation> {
  let mut out: Vec<Correlation> = Vec::new();

  for pairing in pairings.pairings() {
    let mut seen: Vec<Vec<EventId>> = Vec::new();
    for (i, cause) in entries.iter().enumerate() {
      if !cause.haystack.contains(&pairing.antecedent) {
        continue;
      }
      let Some(end) = cause.ts.checked_add_signed(width) else {
        warnings.push(ReportWarning::new(
          Stage::Correlation,
          format!("window at event {} overflows the time range; skipped", cause.event.id),
        ));
        continue;
      };
      let effects: Vec<&Event> = entries[i + 1..]
        .iter()
        .take_while(|e| e.ts <= end)
        .filter(|e| e.haystack.contains(&pairing.consequent))
        .map(|e| e.event)
        .collect();
      if effects.is_empty() {
        continue;
      }

      let mut members = Vec::with_capacity(effects.len() + 1);
      members.push(cause.event);
      members.extend(effects);
      let ids: Vec<EventId> = members.iter().map(|e| e.id).collect();
      if seen.contains(&ids) {
        continue;
      }
      seen.push(ids.clone());

      out.push(Correlation {
        id: String::new(),
        kind: CorrelationKind::Causal,
        label: Some(pairing.name.clone()),
        window_start: cause.ts,
        window_end: end,
        event_ids: ids,
        strength: strength(&members, CAUSAL_BONUS),
      });
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::timeline::tests::{ev, timeline};
  use crate::types::Level;

  fn config() -> Config {
    Config::default()
  }

  #[test]
  fn signal_events_in_window_cluster() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 0)), Level::Error, None, "disk error"),
      ev("a.log", 2, Some((0, 2)), Level::Warn, None, "retrying"),
      ev("a.log", 3, Some((0, 3)), Level::Info, None, "noise"),
      ev("a.log", 4, Some((0, 30)), Level::Error, None, "late"),
    ]);
    let out = correlate(&t, &PairingTable::new(vec![]).unwrap(), &config());
    assert_eq!(out.correlations.len(), 1);
    let c = &out.correlations[0];
    assert_eq!(c.kind, CorrelationKind::Temporal);
    assert_eq!(c.event_ids, vec![EventId(1), EventId(2)]);
    assert_eq!(c.id, "cor-0001");
    // mean(0.7, 0.4) * 2/4
    assert_eq!(c.strength, 0.275);
  }

  #[test]
  fn window_contained_in_previous_is_not_repeated() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 0)), Level::Error, None, "a"),
      ev("a.log", 2, Some((0, 1)), Level::Error, None, "b"),
      ev("a.log", 3, Some((0, 2)), Level::Error, None, "c"),
    ]);
    let out = correlate(&t, &PairingTable::new(vec![]).unwrap(), &config());
    assert_eq!(out.correlations.len(), 1);
    assert_eq!(out.correlations[0].event_ids.len(), 3);
  }

  #[test]
  fn sliding_windows_can_overlap() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 0)), Level::Error, None, "a"),
      ev("a.log", 2, Some((0, 4)), Level::Error, None, "b"),
      ev("a.log", 3, Some((0, 8)), Level::Error, None, "c"),
    ]);
    let out = correlate(&t, &PairingTable::new(vec![]).unwrap(), &config());
    let sets: Vec<Vec<u64>> = out
      .correlations
      .iter()
      .map(|c| c.event_ids.iter().map(|id| id.0).collect())
      .collect();
    assert_eq!(sets, vec![vec![1, 2], vec![2, 3]]);
  }

  #[test]
  fn untimed_events_are_ignored() {
    let t = timeline(vec![
      ev("a.log", 1, None, Level::Error, None, "a"),
      ev("a.log", 2, None, Level::Error, None, "b"),
    ]);
    let out = correlate(&t, &PairingTable::standard(), &config());
    assert!(out.correlations.is_empty());
  }

  #[test]
  fn causal_pairing_links_antecedent_to_consequent() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 0)), Level::Info, Some("SoftPaq"), "Driver install started"),
      ev("a.log", 2, Some((0, 3)), Level::Info, None, "Reboot required to finish"),
    ]);
    let out = correlate(&t, &PairingTable::standard(), &config());
    let causal: Vec<&Correlation> = out
      .correlations
      .iter()
      .filter(|c| c.kind == CorrelationKind::Causal)
      .collect();
    assert_eq!(causal.len(), 1);
    assert_eq!(causal[0].label.as_deref(), Some("driver_install_reboot"));
    assert_eq!(causal[0].event_ids, vec![EventId(1), EventId(2)]);
    // mean(0.1, 0.1) * 2/4 + 0.2
    assert_eq!(causal[0].strength, 0.25);
  }

  #[test]
  fn causal_requires_consequent_inside_window() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 0)), Level::Info, None, "driver install"),
      ev("a.log", 2, Some((1, 0)), Level::Info, None, "reboot required"),
    ]);
    let out = correlate(&t, &PairingTable::standard(), &config());
    assert!(out.correlations.is_empty());
  }

  #[test]
  fn output_is_deterministic() {
    let build = || {
      timeline(vec![
        ev("b.log", 1, Some((0, 0)), Level::Error, None, "timeout talking to server"),
        ev("a.log", 1, Some((0, 1)), Level::Fatal, None, "connection refused"),
        ev("a.log", 2, Some((0, 2)), Level::Warn, None, "memory low"),
      ])
    };
    let a = correlate(&build(), &PairingTable::standard(), &config());
    let b = correlate(&build(), &PairingTable::standard(), &config());
    assert_eq!(a.correlations, b.correlations);
    assert!(!a.correlations.is_empty());
  }

  #[test]
  fn non_positive_window_warns() {
    let t = timeline(vec![ev("a.log", 1, Some((0, 0)), Level::Error, None, "x")]);
    let cfg = Config {
      correlation_window_secs: 0,
      ..Config::default()
    };
    let out = correlate(&t, &PairingTable::standard(), &cfg);
    assert!(out.correlations.is_empty());
    assert_eq!(out.warnings.len(), 1);
  }

  #[test]
  fn pairing_json_validation() {
    assert!(PairingTable::from_json("{").is_err());
    let err = PairingTable::from_json(r#"[{"name":"x","antecedent":"","consequent":"y"}]"#).unwrap_err();
    assert_eq!(err.code(), "E.SRV.005");
    let ok = PairingTable::from_json(r#"[{"name":"x","antecedent":"A","consequent":"B"}]"#).unwrap();
    assert_eq!(ok.pairings()[0].antecedent, "a");
  }
}
