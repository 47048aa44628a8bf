//! Core types for the RCA pipeline (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Intake
// ---------------------------------------------------------------------------

/// One uploaded file as received at the boundary.
#[derive(Debug, Clone)]
pub struct Upload {
  pub file_name: String,
  pub content_type: Option<String>,
  pub declared_size: Option<u64>,
  pub bytes: Vec<u8>,
}

/// Raw text blob extracted from an upload. Consumed by the parser.
#[derive(Debug, Clone)]
pub struct RawBlob {
  pub source_name: String,
  pub content: Vec<u8>,
  pub declared_size: u64,
}

/// Archive member rejected on its own while the rest of the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedInput {
  pub name: String,
  pub reason: String,
}

// ---------------------------------------------------------------------------
// Levels and severities (normalized)
// ---------------------------------------------------------------------------

/// Normalized log level. Declaration order is severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
  Unknown,
  Trace,
  Debug,
  Info,
  Warn,
  Error,
  Fatal,
}

impl Level {
  /// Normalize a raw level token. Surrounding brackets, colons and case are ignored.
  pub fn from_token(token: &str) -> Option<Self> {
    let t = token
      .trim_matches(|c: char| matches!(c, '[' | ']' | '<' | '>' | '(' | ')' | ':' | ',' | '|'))
      .to_ascii_uppercase();
    match t.as_str() {
      "TRACE" | "VERBOSE" => Some(Self::Trace),
      "DEBUG" | "DBG" => Some(Self::Debug),
      "INFO" | "INFORMATION" | "NOTICE" => Some(Self::Info),
      "WARN" | "WARNING" => Some(Self::Warn),
      "ERROR" | "ERR" => Some(Self::Error),
      "FATAL" | "CRITICAL" | "CRIT" | "EMERG" | "ALERT" | "PANIC" => Some(Self::Fatal),
      _ => None,
    }
  }

  /// WARN and above take part in temporal correlation.
  pub fn is_signal(self) -> bool {
    self >= Self::Warn
  }

  pub fn weight(self) -> f64 {
    match self {
      Self::Fatal => 1.0,
      Self::Error => 0.7,
      Self::Warn => 0.4,
      _ => 0.1,
    }
  }

  pub fn ordinal(self) -> u8 {
    self as u8
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Unknown => "UNKNOWN",
      Self::Trace => "TRACE",
      Self::Debug => "DEBUG",
      Self::Info => "INFO",
      Self::Warn => "WARN",
      Self::Error => "ERROR",
      Self::Fatal => "FATAL",
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Severity of a diagnostic finding, fixed per rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
  Low,
  Medium,
  High,
  Critical,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Event identifier, unique within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// One normalized log record (a line, or a line plus its continuation lines).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
  pub id: EventId,
  pub source_file: String,
  pub line_number: u32,
  pub line_count: u32,
  pub timestamp: Option<DateTime<Utc>>,
  pub level: Level,
  pub component: Option<String>,
  pub message: String,
  pub raw_line: String,
  pub redacted: bool,
  pub parse_confidence: f64,
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// Diagnostic finding aggregated over every event a rule matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
  pub id: String,
  pub rule_id: String,
  pub severity: Severity,
  pub category: String,
  pub description: String,
  pub recommendation: String,
  pub occurrences: u32,
  pub related_event_ids: Vec<EventId>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub first_seen: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
  Temporal,
  Causal,
}

/// Cluster of events related by time window or causal pairing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correlation {
  pub id: String,
  pub kind: CorrelationKind,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
  pub window_start: DateTime<Utc>,
  pub window_end: DateTime<Utc>,
  pub event_ids: Vec<EventId>,
  pub strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
  Pending,
  Passed,
  Failed,
  NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestStepResult {
  pub step_id: String,
  pub expected_pattern: String,
  pub status: StepStatus,
  pub matched_event_id: Option<EventId>,
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Optional operator-supplied context that gates context-specific rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisContext {
  #[serde(default)]
  pub deployment_method: Option<String>,
  #[serde(default)]
  pub test_environment: Option<String>,
  #[serde(default)]
  pub app_version: Option<String>,
  #[serde(default)]
  pub previous_version: Option<String>,
  #[serde(default)]
  pub build_changes: Option<String>,
}

impl AnalysisContext {
  pub fn get(&self, key: &str) -> Option<&str> {
    let v = match key {
      "deployment_method" => &self.deployment_method,
      "test_environment" => &self.test_environment,
      "app_version" => &self.app_version,
      "previous_version" => &self.previous_version,
      "build_changes" => &self.build_changes,
      _ => return None,
    };
    v.as_deref()
  }
}

/// Engine toggles for a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
  pub rules: bool,
  pub correlations: bool,
  pub ml_insights: bool,
  pub ai_summary: bool,
}

impl Default for Capabilities {
  fn default() -> Self {
    Self {
      rules: true,
      correlations: true,
      ml_insights: false,
      ai_summary: false,
    }
  }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedactionAudit {
  pub patterns_applied: Vec<String>,
  pub match_count: u64,
  pub matches_by_category: BTreeMap<String, u64>,
}

impl RedactionAudit {
  pub fn absorb(&mut self, other: &RedactionAudit) {
    for p in &other.patterns_applied {
      if !self.patterns_applied.contains(p) {
        self.patterns_applied.push(p.clone());
      }
    }
    self.match_count += other.match_count;
    for (category, n) in &other.matches_by_category {
      *self.matches_by_category.entry(category.clone()).or_insert(0) += n;
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Intake,
  Parse,
  Correlation,
  Rules,
  TestPlan,
  Insights,
}

/// Degradation attached to the report instead of failing the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportWarning {
  pub stage: Stage,
  pub message: String,
}

impl ReportWarning {
  pub fn new(stage: Stage, message: impl Into<String>) -> Self {
    Self {
      stage,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RcaSummary {
  pub event_count: usize,
  pub files_parsed: usize,
  pub rules_fired: usize,
  pub categories_hit: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub highest_severity: Option<Severity>,
  pub level_counts: BTreeMap<Level, usize>,
}

/// Result of an optional external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InsightSlot<T> {
  Disabled,
  Unavailable { reason: String },
  Available { result: T },
}

impl<T> InsightSlot<T> {
  pub fn is_available(&self) -> bool {
    matches!(self, Self::Available { .. })
  }
}

/// Output of an ML insight model, keyed by event ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MlInsights {
  #[serde(default)]
  pub anomalies: Vec<EventId>,
  #[serde(default)]
  pub clusters: BTreeMap<String, Vec<EventId>>,
  #[serde(default)]
  pub notes: Vec<String>,
}

/// Output of an AI summarizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiSummary {
  pub model: String,
  pub summary: String,
  #[serde(default)]
  pub root_cause: Option<String>,
  #[serde(default)]
  pub recommendations: Vec<String>,
}

/// Aggregate output of one analysis run. Read-only once returned.
#[derive(Debug, Clone, Serialize)]
pub struct RcaReport {
  pub run_id: String,
  pub events: Vec<Event>,
  pub issues: Vec<Issue>,
  pub correlations: Vec<Correlation>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub test_results: Option<Vec<TestStepResult>>,
  pub redaction_audit: RedactionAudit,
  pub summary: RcaSummary,
  pub metadata: BTreeMap<String, String>,
  pub warnings: Vec<ReportWarning>,
  pub skipped_inputs: Vec<SkippedInput>,
  pub ml_insights: InsightSlot<MlInsights>,
  pub ai_summary: InsightSlot<AiSummary>,
}

impl RcaReport {
  pub fn event(&self, id: EventId) -> Option<&Event> {
    // Ids are assigned 1..=N in timeline order.
    let idx = usize::try_from(id.0).ok()?.checked_sub(1)?;
    self.events.get(idx).filter(|e| e.id == id)
  }
}

// ---------------------------------------------------------------------------
// CLI / HTTP stream wrappers
// ---------------------------------------------------------------------------

/// Structured error output for rejected input.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub code: String,
  pub message: String,
}

impl ErrorOutput {
  pub fn from_error(err: &crate::RcaError) -> Self {
    Self {
      error: true,
      code: err.code().to_string(),
      message: err.public_message(),
    }
  }
}
