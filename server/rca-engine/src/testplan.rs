//! Ordered test-plan validation over the timeline.
//!
//! Steps are matched in order with a forward-only cursor. A step whose only
//! match lies behind the cursor ran out of order and is reported FAILED.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

use crate::error::RcaError;
use crate::timeline::Timeline;
use crate::types::{Event, StepStatus, TestStepResult};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepId {
  Text(String),
  Number(i64),
}

#[derive(Debug, Deserialize)]
struct StepDoc {
  #[serde(default, alias = "step_id")]
  id: Option<StepId>,
  #[serde(default, alias = "expected", alias = "name")]
  pattern: Option<String>,
  #[serde(default)]
  keywords: Vec<String>,
  #[serde(default)]
  regex: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanDoc {
  List(Vec<StepDoc>),
  Wrapped { steps: Vec<StepDoc> },
}

#[derive(Debug, Clone)]
enum Pattern {
  Literal(String),
  Regex(Regex),
}

impl Pattern {
  fn is_match(&self, text: &str) -> bool {
    match self {
      Self::Literal(needle) => text.to_lowercase().contains(needle.as_str()),
      Self::Regex(re) => re.is_match(text),
    }
  }
}

#[derive(Debug, Clone)]
pub struct TestStep {
  pub id: String,
  pub expected_pattern: String,
  pattern: Option<Pattern>,
  keywords: Vec<String>,
}

impl TestStep {
  fn matches(&self, event: &Event) -> bool {
    let fields = [Some(event.message.as_str()), event.component.as_deref()];
    fields.into_iter().flatten().any(|text| {
      self.pattern.as_ref().is_some_and(|p| p.is_match(text)) || {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
      }
    })
  }
}

/// Parsed, compiled test plan.
#[derive(Debug, Clone, Default)]
pub struct TestPlan {
  steps: Vec<TestStep>,
}

impl TestPlan {
  /// JSON: an array of steps or `{"steps": [...]}`.
  pub fn from_json(json: &str) -> Result<Self, RcaError> {
    let doc: PlanDoc =
      serde_json::from_str(json).map_err(|e| RcaError::InvalidTestPlan(format!("invalid JSON: {}", e)))?;
    let docs = match doc {
      PlanDoc::List(steps) | PlanDoc::Wrapped { steps } => steps,
    };

    let mut steps = Vec::with_capacity(docs.len());
    for (idx, doc) in docs.into_iter().enumerate() {
      let id = match doc.id {
        Some(StepId::Text(s)) if !s.trim().is_empty() => s,
        Some(StepId::Number(n)) => n.to_string(),
        _ => format!("step-{}", idx + 1),
      };
      let raw = doc.pattern.filter(|p| !p.trim().is_empty());
      let keywords: Vec<String> = doc
        .keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
      if raw.is_none() && keywords.is_empty() {
        return Err(RcaError::MissingField(format!("steps[{}].pattern", idx)));
      }

      let pattern = match &raw {
        Some(p) if doc.regex => Some(Pattern::Regex(
          RegexBuilder::new(p)
            .case_insensitive(true)
            .build()
            .map_err(|e| RcaError::InvalidTestPlan(format!("step {}: {}", id, e)))?,
        )),
        Some(p) => Some(Pattern::Literal(p.to_lowercase())),
        None => None,
      };
      let expected_pattern = raw.unwrap_or_else(|| keywords.join(" | "));
      steps.push(TestStep {
        id,
        expected_pattern,
        pattern,
        keywords,
      });
    }
    Ok(Self { steps })
  }

  pub fn steps(&self) -> &[TestStep] {
    &self.steps
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}

/// One result per step, in plan order.
pub fn validate(plan: &TestPlan, timeline: &Timeline) -> Vec<TestStepResult> {
  let events = timeline.events();
  let mut cursor = 0usize;
  let mut results = Vec::with_capacity(plan.steps.len());

  for step in &plan.steps {
    let mut result = TestStepResult {
      step_id: step.id.clone(),
      expected_pattern: step.expected_pattern.clone(),
      status: StepStatus::Pending,
      matched_event_id: None,
    };

    if let Some(offset) = events[cursor..].iter().position(|e| step.matches(e)) {
      let idx = cursor + offset;
      result.status = StepStatus::Passed;
      result.matched_event_id = Some(events[idx].id);
      cursor = idx + 1;
    } else if let Some(early) = events[..cursor].iter().find(|e| step.matches(e)) {
      result.status = StepStatus::Failed;
      result.matched_event_id = Some(early.id);
    } else {
      result.status = StepStatus::NotFound;
    }
    results.push(result);
  }
  results
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::timeline::tests::{ev, timeline};
  use crate::types::{EventId, Level};

  fn sample() -> Timeline {
    timeline(vec![
      ev("a.log", 1, Some((0, 0)), Level::Info, None, "Download started"),
      ev("a.log", 2, Some((0, 1)), Level::Info, None, "Install complete"),
      ev("a.log", 3, Some((0, 2)), Level::Info, Some("Reboot"), "scheduled"),
    ])
  }

  #[test]
  fn in_order_steps_pass() {
    let plan = TestPlan::from_json(
      r#"[{"id":"dl","pattern":"download"},{"id":"inst","expected":"INSTALL complete"},{"name":"reboot"}]"#,
    )
    .unwrap();
    let results = validate(&plan, &sample());
    let statuses: Vec<StepStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![StepStatus::Passed; 3]);
    assert_eq!(results[2].step_id, "step-3");
    assert_eq!(results[2].matched_event_id, Some(EventId(3)));
  }

  #[test]
  fn out_of_order_step_fails_with_earlier_event() {
    let plan = TestPlan::from_json(
      r#"{"steps":[{"id":"inst","pattern":"install"},{"id":"dl","pattern":"download"}]}"#,
    )
    .unwrap();
    let results = validate(&plan, &sample());
    assert_eq!(results[0].status, StepStatus::Passed);
    assert_eq!(results[1].status, StepStatus::Failed);
    assert_eq!(results[1].matched_event_id, Some(EventId(1)));
  }

  #[test]
  fn missing_step_not_found() {
    let plan = TestPlan::from_json(r#"[{"step_id":7,"keywords":["bitlocker","tpm"]}]"#).unwrap();
    let results = validate(&plan, &sample());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].step_id, "7");
    assert_eq!(results[0].status, StepStatus::NotFound);
    assert_eq!(results[0].expected_pattern, "bitlocker | tpm");
    assert_eq!(results[0].matched_event_id, None);
  }

  #[test]
  fn regex_steps() {
    let plan = TestPlan::from_json(r#"[{"pattern":"^install\\s+\\w+$","regex":true}]"#).unwrap();
    assert_eq!(validate(&plan, &sample())[0].status, StepStatus::Passed);
  }

  #[test]
  fn one_result_per_step() {
    let plan = TestPlan::from_json(
      r#"[{"pattern":"download"},{"pattern":"download"},{"pattern":"nothing"}]"#,
    )
    .unwrap();
    let results = validate(&plan, &sample());
    assert_eq!(results.len(), 3);
    // The second step can only see the download event behind the cursor.
    assert_eq!(results[1].status, StepStatus::Failed);
    assert_eq!(results[2].status, StepStatus::NotFound);
  }

  #[test]
  fn invalid_plans() {
    assert_eq!(TestPlan::from_json("nope").unwrap_err().code(), "E.REQ.005");
    assert_eq!(
      TestPlan::from_json(r#"[{"pattern":"(","regex":true}]"#).unwrap_err().code(),
      "E.REQ.005"
    );
    assert_eq!(TestPlan::from_json(r#"[{"id":"x"}]"#).unwrap_err().code(), "E.REQ.004");
  }
}
