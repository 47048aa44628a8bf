//! Diagnostic rule table.
//!
//! Rules are evaluated independently against every event (union semantics):
//! one event may fire several rules, and every match of a rule is folded
//! into a single [`Issue`]. Issues are ordered by their first matching event.

use std::collections::BTreeMap;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RcaError;
use crate::fingerprint::issue_id;
use crate::timeline::Timeline;
use crate::types::{AnalysisContext, Event, EventId, Issue, Level, ReportWarning, Severity, Stage};

const CONTEXT_KEYS: &[&str] = &[
  "deployment_method",
  "test_environment",
  "app_version",
  "previous_version",
  "build_changes",
];

/// Rule only applies when the run context value for `key` contains any of
/// `any_of` (case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextGate {
  pub key: String,
  pub any_of: Vec<String>,
}

/// Serializable rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
  pub id: String,
  /// Case-insensitive regex over message and component.
  pub pattern: String,
  #[serde(default)]
  pub min_level: Option<Level>,
  /// Case-insensitive substring the component must contain.
  #[serde(default)]
  pub component: Option<String>,
  #[serde(default)]
  pub context: Option<ContextGate>,
  pub severity: Severity,
  pub category: String,
  pub description: String,
  /// Template; `{occurrences}`, `{component}`, `{first_seen}` and the
  /// context keys are substituted.
  pub recommendation: String,
}

#[derive(Debug)]
struct Rule {
  spec: RuleSpec,
  regex: Regex,
  component: Option<String>,
}

impl Rule {
  fn matches(&self, event: &Event, context: &AnalysisContext) -> bool {
    if let Some(gate) = &self.spec.context {
      let Some(value) = context.get(&gate.key) else {
        return false;
      };
      let value = value.to_lowercase();
      if !gate.any_of.iter().any(|v| value.contains(&v.to_lowercase())) {
        return false;
      }
    }
    if let Some(min) = self.spec.min_level {
      if event.level < min {
        return false;
      }
    }
    if let Some(want) = &self.component {
      let has = event
        .component
        .as_deref()
        .is_some_and(|c| c.to_lowercase().contains(want.as_str()));
      if !has {
        return false;
      }
    }
    self.regex.is_match(&event.message)
      || event.component.as_deref().is_some_and(|c| self.regex.is_match(c))
  }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleDocument {
  List(Vec<RuleSpec>),
  Wrapped { rules: Vec<RuleSpec> },
}

/// Compiled, read-only rule table.
#[derive(Debug)]
pub struct RuleSet {
  rules: Vec<Rule>,
  /// Rules dropped at compile time; repeated on every run's report.
  warnings: Vec<ReportWarning>,
}

impl RuleSet {
  /// Compile specs. Rules that fail to compile, and later rules reusing an
  /// id already taken, are skipped with a warning.
  pub fn compile(specs: Vec<RuleSpec>) -> Self {
    let mut rules: Vec<Rule> = Vec::with_capacity(specs.len());
    let mut warnings = Vec::new();
    for spec in specs {
      if rules.iter().any(|r| r.spec.id == spec.id) {
        warn!(rule = %spec.id, "duplicate rule id; rule skipped");
        warnings.push(ReportWarning::new(
          Stage::Rules,
          format!("rule {} skipped: duplicate id", spec.id),
        ));
        continue;
      }
      if let Some(gate) = &spec.context {
        if !CONTEXT_KEYS.contains(&gate.key.as_str()) {
          warn!(rule = %spec.id, key = %gate.key, "unknown context key; rule skipped");
          warnings.push(ReportWarning::new(
            Stage::Rules,
            format!("rule {} skipped: unknown context key {}", spec.id, gate.key),
          ));
          continue;
        }
      }
      match RegexBuilder::new(&spec.pattern).case_insensitive(true).build() {
        Ok(regex) => rules.push(Rule {
          component: spec.component.as_ref().map(|c| c.to_lowercase()),
          regex,
          spec,
        }),
        Err(e) => {
          warn!(rule = %spec.id, error = %e, "rule pattern does not compile; rule skipped");
          warnings.push(ReportWarning::new(
            Stage::Rules,
            format!("rule {} skipped: pattern does not compile", spec.id),
          ));
        }
      }
    }
    Self { rules, warnings }
  }

  pub fn standard() -> Self {
    Self::compile(standard_rules())
  }

  /// JSON: an array of rules, or `{"rules": [...]}`.
  pub fn from_json(json: &str) -> Result<Self, RcaError> {
    let doc: RuleDocument =
      serde_json::from_str(json).map_err(|e| RcaError::RuleConfig(format!("invalid JSON: {}", e)))?;
    let specs = match doc {
      RuleDocument::List(specs) | RuleDocument::Wrapped { rules: specs } => specs,
    };
    Ok(Self::compile(specs))
  }

  pub fn from_path(path: &Path) -> Result<Self, RcaError> {
    let json = std::fs::read_to_string(path)
      .map_err(|e| RcaError::RuleConfig(format!("{}: {}", path.display(), e)))?;
    Self::from_json(&json)
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  pub fn rule_ids(&self) -> Vec<String> {
    self.rules.iter().map(|r| r.spec.id.clone()).collect()
  }

  pub fn compile_warnings(&self) -> &[ReportWarning] {
    &self.warnings
  }

  /// Which rules match `event`, in table order.
  pub fn match_vector(&self, event: &Event, context: &AnalysisContext) -> Vec<bool> {
    self.rules.iter().map(|r| r.matches(event, context)).collect()
  }
}

#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
  pub issues: Vec<Issue>,
  pub warnings: Vec<ReportWarning>,
  /// Rule id → matched event ids, timeline order.
  pub matches: BTreeMap<String, Vec<EventId>>,
}

/// Run every rule over the timeline.
pub fn evaluate(rules: &RuleSet, timeline: &Timeline, context: &AnalysisContext) -> RuleOutcome {
  let mut hits: Vec<Vec<&Event>> = vec![Vec::new(); rules.rules.len()];
  for event in timeline.events() {
    for (idx, rule) in rules.rules.iter().enumerate() {
      if rule.matches(event, context) {
        hits[idx].push(event);
      }
    }
  }

  let mut ranked: Vec<(EventId, usize, Issue)> = Vec::new();
  let mut matches = BTreeMap::new();
  for (idx, (rule, events)) in rules.rules.iter().zip(hits).enumerate() {
    let Some(first) = events.first() else {
      continue;
    };
    let ids: Vec<EventId> = events.iter().map(|e| e.id).collect();
    let first_seen = events.iter().filter_map(|e| e.timestamp).min();
    let last_seen = events.iter().filter_map(|e| e.timestamp).max();
    let occurrences = u32::try_from(events.len()).unwrap_or(u32::MAX);
    let component = events.iter().find_map(|e| e.component.as_deref());

    let recommendation = render(
      &rule.spec.recommendation,
      occurrences,
      component,
      first_seen.map(|t| t.to_rfc3339()),
      context,
    );

    matches.insert(rule.spec.id.clone(), ids.clone());
    ranked.push((
      first.id,
      idx,
      Issue {
        id: issue_id(&rule.spec.id),
        rule_id: rule.spec.id.clone(),
        severity: rule.spec.severity,
        category: rule.spec.category.clone(),
        description: rule.spec.description.clone(),
        recommendation,
        occurrences,
        related_event_ids: ids,
        first_seen,
        last_seen,
      },
    ));
  }
  ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

  let issues: Vec<Issue> = ranked.into_iter().map(|(_, _, issue)| issue).collect();
  debug!(rules = rules.len(), issues = issues.len(), "rules evaluated");
  RuleOutcome {
    issues,
    warnings: rules.warnings.clone(),
    matches,
  }
}

fn render(
  template: &str,
  occurrences: u32,
  component: Option<&str>,
  first_seen: Option<String>,
  context: &AnalysisContext,
) -> String {
  let mut out = template
    .replace("{occurrences}", &occurrences.to_string())
    .replace("{component}", component.unwrap_or("unknown"))
    .replace("{first_seen}", first_seen.as_deref().unwrap_or("unknown"));
  for key in CONTEXT_KEYS {
    let token = format!("{{{}}}", key);
    if out.contains(&token) {
      out = out.replace(&token, context.get(key).unwrap_or("unknown"));
    }
  }
  out
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

struct Def {
  id: &'static str,
  pattern: &'static str,
  severity: Severity,
  category: &'static str,
  description: &'static str,
  recommendation: &'static str,
}

fn spec(d: Def) -> RuleSpec {
  RuleSpec {
    id: d.id.into(),
    pattern: d.pattern.into(),
    min_level: None,
    component: None,
    context: None,
    severity: d.severity,
    category: d.category.into(),
    description: d.description.into(),
    recommendation: d.recommendation.into(),
  }
}

fn gated(d: Def, key: &str, any_of: &[&str]) -> RuleSpec {
  RuleSpec {
    context: Some(ContextGate {
      key: key.into(),
      any_of: any_of.iter().map(|s| s.to_string()).collect(),
    }),
    ..spec(d)
  }
}

/// Provisioning-domain defaults.
pub fn standard_rules() -> Vec<RuleSpec> {
  use Severity::*;
  vec![
    spec(Def {
      id: "disk_full",
      pattern: r"disk full|insufficient (disk )?space|not enough (disk )?space",
      severity: High,
      category: "System",
      description: "System ran out of space during install.",
      recommendation: "Clear disk, shrink image, or resize partitions before retry ({occurrences} occurrences).",
    }),
    spec(Def {
      id: "bsod",
      pattern: r"blue screen|bugcheck|\bbsod\b",
      severity: Critical,
      category: "System",
      description: "BSOD detected during provisioning.",
      recommendation: "Collect memory dump. Analyze for faulty drivers or firmware issues.",
    }),
    spec(Def {
      id: "os_unsupported",
      pattern: r"os version not supported|unsupported os",
      severity: High,
      category: "SoftPaq",
      description: "Detected OS version incompatibility.",
      recommendation: "Use a CVA-supported SoftPaq compatible with the current OS.",
    }),
    spec(Def {
      id: "install_failed",
      pattern: r"install(ation)? failed|setup exited with error|failed to install",
      severity: High,
      category: "SoftPaq",
      description: "Install failure detected.",
      recommendation: "Match SoftPaq version with supported OS/CVA and reattempt install (first seen {first_seen}).",
    }),
    spec(Def {
      id: "signature_failed",
      pattern: r"signature verification failed",
      severity: High,
      category: "SoftPaq",
      description: "Installer failed due to signature check.",
      recommendation: "Re-download SoftPaq or disable Secure Boot temporarily.",
    }),
    spec(Def {
      id: "missing_dependency",
      pattern: r"dependency missing|missing dependency|prerequisite not found",
      severity: Medium,
      category: "SoftPaq",
      description: "Missing dependency or required component.",
      recommendation: "Verify prerequisite packages are installed first.",
    }),
    spec(Def {
      id: "bios_mismatch",
      pattern: r"bios mismatch|bios not supported",
      severity: High,
      category: "BIOS",
      description: "BIOS version mismatch detected.",
      recommendation: "Update BIOS to latest approved version before testing.",
    }),
    spec(Def {
      id: "fusion_agent_outdated",
      pattern: r"fusion agent.*\bold\b|\bold\b.*fusion agent",
      severity: Medium,
      category: "Fusion",
      description: "Outdated Fusion agent detected.",
      recommendation: "Install latest Fusion agent version before running test.",
    }),
    spec(Def {
      id: "component_missing",
      pattern: r"component missing",
      severity: Medium,
      category: "Image",
      description: "Component was not bundled correctly.",
      recommendation: "Check ML list and verify bundling in image server ({component}).",
    }),
    spec(Def {
      id: "platform_boot_error",
      pattern: r"red screen|failure\.flg",
      severity: High,
      category: "Platform",
      description: "Platform boot error detected.",
      recommendation: "Collect system.sav and escalate to Imaging or BIOS team.",
    }),
    spec(Def {
      id: "oobe_unbundle",
      pattern: r"oobe hang|unbundle failed",
      severity: Medium,
      category: "Image",
      description: "Unbundling/OOBE flow interrupted.",
      recommendation: "Check scripts or registry config related to OOBE post-dash.",
    }),
    spec(Def {
      id: "script_error",
      pattern: r"script error|syntax error",
      severity: High,
      category: "Automation",
      description: "Setup script failed due to syntax.",
      recommendation: "Validate custom install/unbundle scripts or task scheduler setup.",
    }),
    spec(Def {
      id: "connectivity",
      pattern: r"cannot connect to server|download failed|connection failed|unable to reach server|dns error|network unreachable",
      severity: Medium,
      category: "Connectivity",
      description: "Log shows network provisioning issue.",
      recommendation: "Check if image server is reachable and correctly mapped.",
    }),
    spec(Def {
      id: "timeout",
      pattern: r"timeout occurred|network timeout|timed out",
      severity: Medium,
      category: "Connectivity",
      description: "Timed out waiting for response.",
      recommendation: "Check network stability or image download size.",
    }),
    spec(Def {
      id: "driver_conflict",
      pattern: r"driver conflict|conflicting drivers|driver failed|unable to load driver|driver installation failed|missing driver",
      severity: High,
      category: "Driver",
      description: "Possible driver conflict during installation.",
      recommendation: "Remove conflicting drivers and install the platform-approved driver set ({component}).",
    }),
    spec(Def {
      id: "corrupt_media",
      pattern: r"corrupt iso|media unreadable|checksum failed|bad block|unexpected eof|invalid media|file read error|media error",
      severity: High,
      category: "Media",
      description: "Installation media appears to be corrupted or incomplete.",
      recommendation: "Re-create the installation media and verify its checksum.",
    }),
    spec(Def {
      id: "permission_denied",
      pattern: r"access denied|permission denied|requires admin privileges|not authorized|elevation required",
      severity: Medium,
      category: "Permissions",
      description: "Permission issue; process may require administrative access.",
      recommendation: "Run the installer elevated or fix ACLs on the target path.",
    }),
    spec(Def {
      id: "unsupported_hardware",
      pattern: r"unsupported hardware|cpu not supported|incompatible chipset|hardware requirement not met|unsupported platform",
      severity: High,
      category: "Hardware",
      description: "Detected unsupported or incompatible hardware.",
      recommendation: "Confirm the platform is on the supported hardware list for this build.",
    }),
    spec(Def {
      id: "version_mismatch",
      pattern: r"version mismatch|incompatible version|unsupported version",
      severity: Medium,
      category: "Compatibility",
      description: "Version compatibility issue detected.",
      recommendation: "Check compatibility between current ({app_version}) and previous ({previous_version}) versions.",
    }),
    RuleSpec {
      min_level: Some(Level::Fatal),
      ..spec(Def {
        id: "fatal_event",
        pattern: r".",
        severity: Critical,
        category: "System",
        description: "Fatal event logged.",
        recommendation: "Inspect the first fatal event ({first_seen}) and the events leading up to it.",
      })
    },
    gated(
      Def {
        id: "dash_imaging_failure",
        pattern: r"dash.*fail|fail.*dash",
        severity: High,
        category: "Deployment",
        description: "DASH imaging deployment failure detected.",
        recommendation: "Re-run DASH imaging and verify the image server bundle.",
      },
      "deployment_method",
      &["dash"],
    ),
    gated(
      Def {
        id: "softpaq_install_error",
        pattern: r"softpaq.*error|error.*softpaq",
        severity: High,
        category: "Deployment",
        description: "SoftPaq installation failure detected.",
        recommendation: "Check the SoftPaq exit code and match it with the supported OS/CVA.",
      },
      "deployment_method",
      &["softpaq"],
    ),
    gated(
      Def {
        id: "silent_install_interaction",
        pattern: r"user interaction|\bprompt",
        severity: High,
        category: "Deployment",
        description: "Silent installation failed; user interaction required.",
        recommendation: "Review silent install parameters and remove interactive components.",
      },
      "deployment_method",
      &["silent"],
    ),
    gated(
      Def {
        id: "certificate_in_staging",
        pattern: r"certificate.*invalid|invalid.*certificate",
        severity: Medium,
        category: "Environment",
        description: "Certificate validation issues in a pre-production environment.",
        recommendation: "Install the {test_environment} root certificates on the device.",
      },
      "test_environment",
      &["staging", "development"],
    ),
    gated(
      Def {
        id: "build_dependency_change",
        pattern: r"dependency|missing",
        severity: High,
        category: "Build",
        description: "Dependency issues correlate with recent build changes.",
        recommendation: "Review dependency changes: {build_changes}",
      },
      "build_changes",
      &["dependency"],
    ),
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::timeline::tests::{ev, timeline};

  fn ctx() -> AnalysisContext {
    AnalysisContext::default()
  }

  #[test]
  fn aggregates_matches_into_one_issue() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 0)), Level::Error, None, "disk full on C:"),
      ev("a.log", 2, Some((0, 5)), Level::Info, None, "ok"),
      ev("a.log", 3, Some((0, 9)), Level::Error, None, "Insufficient space for image"),
    ]);
    let out = evaluate(&RuleSet::standard(), &t, &ctx());
    let disk: Vec<&Issue> = out.issues.iter().filter(|i| i.rule_id == "disk_full").collect();
    assert_eq!(disk.len(), 1);
    assert_eq!(disk[0].occurrences, 2);
    assert_eq!(disk[0].related_event_ids, vec![EventId(1), EventId(3)]);
    assert_eq!(disk[0].severity, Severity::High);
    assert!(disk[0].recommendation.contains("2 occurrences"));
    assert!(disk[0].first_seen < disk[0].last_seen);
    assert_eq!(out.matches["disk_full"], vec![EventId(1), EventId(3)]);
  }

  #[test]
  fn union_semantics_fire_every_matching_rule() {
    let t = timeline(vec![ev(
      "a.log",
      1,
      Some((0, 0)),
      Level::Fatal,
      None,
      "bugcheck after driver failed",
    )]);
    let out = evaluate(&RuleSet::standard(), &t, &ctx());
    let ids: Vec<&str> = out.issues.iter().map(|i| i.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["bsod", "driver_conflict", "fatal_event"]);
  }

  #[test]
  fn issues_ordered_by_first_match() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 0)), Level::Error, None, "download failed"),
      ev("a.log", 2, Some((0, 1)), Level::Error, None, "disk full"),
    ]);
    let out = evaluate(&RuleSet::standard(), &t, &ctx());
    let ids: Vec<&str> = out.issues.iter().map(|i| i.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["connectivity", "disk_full"]);
  }

  #[test]
  fn context_rules_need_context() {
    let t = timeline(vec![ev("a.log", 1, None, Level::Error, None, "DASH step failed")]);
    let without = evaluate(&RuleSet::standard(), &t, &ctx());
    assert!(without.issues.iter().all(|i| i.rule_id != "dash_imaging_failure"));

    let with = AnalysisContext {
      deployment_method: Some("DASH".into()),
      ..AnalysisContext::default()
    };
    let out = evaluate(&RuleSet::standard(), &t, &with);
    assert!(out.issues.iter().any(|i| i.rule_id == "dash_imaging_failure"));
  }

  #[test]
  fn recommendation_renders_context() {
    let t = timeline(vec![ev("a.log", 1, None, Level::Error, None, "version mismatch in agent")]);
    let context = AnalysisContext {
      app_version: Some("2.1".into()),
      ..AnalysisContext::default()
    };
    let out = evaluate(&RuleSet::standard(), &t, &context);
    let issue = out.issues.iter().find(|i| i.rule_id == "version_mismatch").unwrap();
    assert!(issue.recommendation.contains("current (2.1)"));
    assert!(issue.recommendation.contains("previous (unknown)"));
  }

  #[test]
  fn bad_rule_is_skipped_with_warning() {
    let json = r#"[
      {"id":"bad","pattern":"(","severity":"LOW","category":"x","description":"d","recommendation":"r"},
      {"id":"good","pattern":"boom","severity":"HIGH","category":"x","description":"d","recommendation":"r"}
    ]"#;
    let rules = RuleSet::from_json(json).unwrap();
    assert_eq!(rules.rule_ids(), vec!["good"]);
    let t = timeline(vec![ev("a.log", 1, None, Level::Error, None, "boom")]);
    let out = evaluate(&rules, &t, &ctx());
    assert_eq!(out.issues.len(), 1);
    assert_eq!(out.warnings.len(), 1);
    assert_eq!(out.warnings[0].stage, Stage::Rules);
  }

  #[test]
  fn repeated_rule_id_keeps_first_rule() {
    let json = r#"[
      {"id":"dup","pattern":"disk","severity":"HIGH","category":"x","description":"first","recommendation":"r"},
      {"id":"dup","pattern":"full","severity":"LOW","category":"x","description":"second","recommendation":"r"}
    ]"#;
    let rules = RuleSet::from_json(json).unwrap();
    assert_eq!(rules.rule_ids(), vec!["dup"]);
    let t = timeline(vec![ev("a.log", 1, None, Level::Error, None, "disk full")]);
    let out = evaluate(&rules, &t, &ctx());
    let dup: Vec<_> = out.issues.iter().filter(|i| i.rule_id == "dup").collect();
    assert_eq!(dup.len(), 1);
    assert_eq!(dup[0].description, "first");
    assert_eq!(out.matches["dup"], vec![EventId(1)]);
    assert_eq!(out.warnings.len(), 1);
    assert!(out.warnings[0].message.contains("duplicate id"));
  }

  #[test]
  fn malformed_rule_json_is_config_error() {
    let err = RuleSet::from_json("{not json").unwrap_err();
    assert_eq!(err.code(), "E.SRV.005");
  }

  #[test]
  fn wrapped_rule_document() {
    let json = r#"{"rules":[{"id":"r","pattern":"x","min_level":"ERROR","component":"cbs","severity":"LOW","category":"c","description":"d","recommendation":"r"}]}"#;
    let rules = RuleSet::from_json(json).unwrap();
    let t = timeline(vec![
      ev("a.log", 1, None, Level::Error, Some("CBS"), "x happened"),
      ev("a.log", 2, None, Level::Warn, Some("CBS"), "x happened"),
      ev("a.log", 3, None, Level::Error, Some("DISM"), "x happened"),
    ]);
    let out = evaluate(&rules, &t, &ctx());
    assert_eq!(out.issues[0].related_event_ids, vec![EventId(1)]);
  }

  #[test]
  fn deterministic_issue_ids() {
    let t = timeline(vec![ev("a.log", 1, None, Level::Error, None, "disk full")]);
    let a = evaluate(&RuleSet::standard(), &t, &ctx());
    let b = evaluate(&RuleSet::standard(), &t, &ctx());
    assert_eq!(a.issues, b.issues);
    assert!(a.issues[0].id.starts_with("iss-"));
  }
}
