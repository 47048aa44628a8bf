//! Pipeline composition: intake → parse + redact (per file, in parallel) →
//! barrier → timeline → correlation / rules / test plan → report.
//!
//! The orchestrator holds only immutable, process-wide tables. Everything a
//! run produces lives in that run's stack frame, so concurrent runs share no
//! mutable state.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::correlation::{correlate, PairingTable};
use crate::error::RcaError;
use crate::features::feature_view;
use crate::fingerprint;
use crate::insights::{retain_known_ids, summary_bundle, Collaborators};
use crate::intake::{self, Intake};
use crate::parser::{self, FormatRegistry};
use crate::redact::{RedactedEvents, Redactor};
use crate::rules::{evaluate, RuleSet};
use crate::testplan::{validate, TestPlan};
use crate::timeline::Timeline;
use crate::types::*;

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  pub capabilities: Capabilities,
  pub test_plan: Option<TestPlan>,
  pub context: AnalysisContext,
}

/// One blob after parse + redact.
struct FileResult {
  source_name: String,
  redacted: RedactedEvents,
  audit: RedactionAudit,
  demoted: usize,
}

/// Intake position of a blob paired with its outcome.
type Indexed = (usize, Result<FileResult, RcaError>);

pub struct Orchestrator {
  config: Arc<Config>,
  registry: Arc<FormatRegistry>,
  rules: Arc<RuleSet>,
  pairings: Arc<PairingTable>,
  collaborators: Collaborators,
}

impl Orchestrator {
  pub fn new(config: Config, rules: RuleSet, pairings: PairingTable) -> Result<Self, RcaError> {
    let registry = FormatRegistry::standard(config.detection_sample_lines)?;
    Ok(Self {
      config: Arc::new(config),
      registry: Arc::new(registry),
      rules: Arc::new(rules),
      pairings: Arc::new(pairings),
      collaborators: Collaborators::default(),
    })
  }

  pub fn with_defaults() -> Result<Self, RcaError> {
    Self::new(Config::default(), RuleSet::standard(), PairingTable::standard())
  }

  pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
    self.collaborators = collaborators;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn rules(&self) -> &RuleSet {
    &self.rules
  }

  /// Validate and extract one upload with this orchestrator's limits.
  pub fn accept(&self, upload: Upload) -> Result<Intake, RcaError> {
    intake::accept(upload, &self.config.intake)
  }

  /// Run the deterministic core. Insight slots are `disabled`, or
  /// `unavailable` when requested (collaborators only run from
  /// [`Orchestrator::analyze_with_insights`]).
  pub fn analyze(
    &self,
    intake: Intake,
    redactor: &Redactor,
    options: &RunOptions,
    cancel: &CancelToken,
  ) -> Result<RcaReport, RcaError> {
    let Intake { blobs, skipped } = intake;
    let run_id = fingerprint::run_id(&blobs);
    let mut warnings: Vec<ReportWarning> = skipped
      .iter()
      .map(|s| ReportWarning::new(Stage::Intake, format!("skipped {}: {}", s.name, s.reason)))
      .collect();

    // Parse + redact per file. Scope exit is the barrier.
    let files = self.parse_and_redact(&blobs, redactor, cancel)?;
    let files_parsed = files.len();

    let mut merged = RedactedEvents::default();
    let mut audit = RedactionAudit::default();
    for file in files {
      if file.redacted.is_empty() {
        warnings.push(ReportWarning::new(
          Stage::Parse,
          format!("{} yielded no log records", file.source_name),
        ));
      }
      if file.demoted > 0 {
        warnings.push(ReportWarning::new(
          Stage::Parse,
          format!("{} records in {} could not be parsed and were kept as UNKNOWN", file.demoted, file.source_name),
        ));
      }
      audit.absorb(&file.audit);
      merged.merge(file.redacted);
    }
    if merged.is_empty() {
      return Err(RcaError::EmptyInput);
    }
    check(cancel)?;

    let timeline = Timeline::build(merged);
    let caps = options.capabilities;

    let correlations = if caps.correlations {
      let outcome = correlate(&timeline, &self.pairings, &self.config);
      warnings.extend(outcome.warnings);
      outcome.correlations
    } else {
      Vec::new()
    };
    check(cancel)?;

    let issues = if caps.rules {
      let outcome = evaluate(&self.rules, &timeline, &options.context);
      warnings.extend(outcome.warnings);
      outcome.issues
    } else {
      Vec::new()
    };
    check(cancel)?;

    let test_results = options.test_plan.as_ref().map(|plan| validate(plan, &timeline));

    let metadata = parser::extract_metadata(timeline.events());
    let events = timeline.into_events();
    let summary = summarize(&events, &issues, files_parsed);

    info!(
      run_id = %run_id,
      events = summary.event_count,
      issues = issues.len(),
      correlations = correlations.len(),
      redactions = audit.match_count,
      "analysis complete"
    );

    Ok(RcaReport {
      run_id,
      events,
      issues,
      correlations,
      test_results,
      redaction_audit: audit,
      summary,
      metadata,
      warnings,
      skipped_inputs: skipped,
      ml_insights: initial_slot(caps.ml_insights),
      ai_summary: initial_slot(caps.ai_summary),
    })
  }

  /// [`Orchestrator::analyze`] on the blocking pool, then the optional ML and
  /// AI collaborators concurrently, each under the configured timeout.
  /// Collaborator failures never fail the run.
  pub async fn analyze_with_insights(
    self: Arc<Self>,
    intake: Intake,
    redactor: Arc<Redactor>,
    options: RunOptions,
    cancel: CancelToken,
  ) -> Result<RcaReport, RcaError> {
    let core = Arc::clone(&self);
    let run_options = options.clone();
    let run_cancel = cancel.clone();
    let mut report = tokio::task::spawn_blocking(move || {
      core.analyze(intake, &redactor, &run_options, &run_cancel)
    })
    .await
    .map_err(|e| RcaError::internal(format!("analysis task failed: {}", e)))??;
    check(&cancel)?;

    let caps = options.capabilities;
    let budget = self.config.insight_timeout;
    let budget_ms = budget.as_millis();

    let ml = async {
      if !caps.ml_insights {
        return InsightSlot::Disabled;
      }
      let Some(model) = &self.collaborators.insight_model else {
        return unavailable("no insight model configured");
      };
      let features = feature_view(&report, &self.rules, &options.context);
      match tokio::time::timeout(budget, model.analyze(&features)).await {
        Ok(Ok(result)) => InsightSlot::Available {
          result: retain_known_ids(&report, result),
        },
        Ok(Err(e)) => {
          warn!(error = %e, "insight model failed");
          unavailable(e.to_string())
        }
        Err(_) => {
          warn!(timeout_ms = budget_ms, "insight model timed out");
          unavailable(format!("timed out after {}ms", budget_ms))
        }
      }
    };

    let ai = async {
      if !caps.ai_summary {
        return InsightSlot::Disabled;
      }
      let Some(summarizer) = &self.collaborators.summarizer else {
        return unavailable("no summarizer configured");
      };
      let bundle = summary_bundle(&report, self.config.max_bundle_events);
      match tokio::time::timeout(budget, summarizer.summarize(&bundle)).await {
        Ok(Ok(result)) => InsightSlot::Available { result },
        Ok(Err(e)) => {
          warn!(error = %e, "summarizer failed");
          unavailable(e.to_string())
        }
        Err(_) => {
          warn!(timeout_ms = budget_ms, "summarizer timed out");
          unavailable(format!("timed out after {}ms", budget_ms))
        }
      }
    };

    let (ml_insights, ai_summary) = tokio::join!(ml, ai);
    if !ml_insights.is_available() && caps.ml_insights {
      report
        .warnings
        .push(ReportWarning::new(Stage::Insights, "ML insights unavailable"));
    }
    if !ai_summary.is_available() && caps.ai_summary {
      report
        .warnings
        .push(ReportWarning::new(Stage::Insights, "AI summary unavailable"));
    }
    report.ml_insights = ml_insights;
    report.ai_summary = ai_summary;
    Ok(report)
  }

  fn parse_and_redact(
    &self,
    blobs: &[RawBlob],
    redactor: &Redactor,
    cancel: &CancelToken,
  ) -> Result<Vec<FileResult>, RcaError> {
    let workers = self.config.parse_workers.clamp(1, blobs.len().max(1));
    let cursor = AtomicUsize::new(0);
    let next = &cursor;
    let registry = self.registry.as_ref();

    let collected: Result<Vec<Vec<Indexed>>, RcaError> = std::thread::scope(|scope| {
      let handles: Vec<_> = (0..workers)
        .map(|_| {
          scope.spawn(move || {
            let mut done = Vec::new();
            loop {
              let idx = next.fetch_add(1, Ordering::Relaxed);
              let Some(blob) = blobs.get(idx) else {
                break;
              };
              let result = parser::parse_blob(blob, registry, cancel).map(|parsed| {
                let (redacted, audit) = redactor.redact_file(parsed.events);
                FileResult {
                  source_name: parsed.source_name,
                  redacted,
                  audit,
                  demoted: parsed.demoted,
                }
              });
              let failed = result.is_err();
              done.push((idx, result));
              if failed {
                break;
              }
            }
            done
          })
        })
        .collect();
      handles
        .into_iter()
        .map(|h| h.join().map_err(|_| RcaError::internal("parse worker panicked")))
        .collect()
    });

    let mut indexed: Vec<Indexed> = collected?.into_iter().flatten().collect();
    indexed.sort_by_key(|(idx, _)| *idx);

    let mut files = Vec::with_capacity(indexed.len());
    for (_, result) in indexed {
      files.push(result?);
    }
    debug!(files = files.len(), workers, "parse barrier reached");
    Ok(files)
  }
}

fn check(cancel: &CancelToken) -> Result<(), RcaError> {
  if cancel.is_cancelled() {
    Err(RcaError::Cancelled)
  } else {
    Ok(())
  }
}

fn unavailable<T>(reason: impl Into<String>) -> InsightSlot<T> {
  InsightSlot::Unavailable {
    reason: reason.into(),
  }
}

fn initial_slot<T>(enabled: bool) -> InsightSlot<T> {
  if enabled {
    unavailable("collaborators run only in async analysis")
  } else {
    InsightSlot::Disabled
  }
}

fn summarize(events: &[Event], issues: &[Issue], files_parsed: usize) -> RcaSummary {
  let mut summary = RcaSummary {
    event_count: events.len(),
    files_parsed,
    rules_fired: issues.len(),
    ..RcaSummary::default()
  };
  for event in events {
    *summary.level_counts.entry(event.level).or_insert(0) += 1;
  }
  let categories: BTreeSet<&str> = issues.iter().map(|i| i.category.as_str()).collect();
  summary.categories_hit = categories.into_iter().map(String::from).collect();
  summary.highest_severity = issues.iter().map(|i| i.severity).max();
  summary
}
