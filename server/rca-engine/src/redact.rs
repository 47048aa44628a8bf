//! Sensitive-data redaction.
//!
//! Every event passes through a [`Redactor`] before anything else looks at it.
//! [`RedactedEvents`] can only be built here, and the timeline only accepts
//! that type, so unredacted text cannot reach correlation, rules, the test
//! plan validator or any external view.
//!
//! Replacement is idempotent: spans that already sit inside a
//! `[REDACTED_*]` placeholder are left alone and not counted again.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RcaError;
use crate::types::{Event, RedactionAudit};

/// Compiled-size ceiling per pattern.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// One configured pattern. A named group `secret` narrows the replaced span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionPattern {
  pub category: String,
  pub pattern: String,
}

impl RedactionPattern {
  pub fn new(category: impl Into<String>, pattern: impl Into<String>) -> Self {
    Self {
      category: category.into(),
      pattern: pattern.into(),
    }
  }
}

/// Built-in pattern table, applied in this order.
pub fn default_patterns() -> Vec<RedactionPattern> {
  vec![
    RedactionPattern::new("email", r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}"),
    RedactionPattern::new("bearer_token", r"\bbearer\s+(?P<secret>[A-Za-z0-9._~+/=\-]{8,})"),
    RedactionPattern::new(
      "password",
      r#"\b(?:password|passwd|pwd)\b\s*[=:]\s*["']?(?P<secret>[^\s"',;]+)"#,
    ),
    RedactionPattern::new(
      "api_token",
      r#"\b(?:api[_\-]?key|apikey|access[_\-]?token|secret|token)\b\s*[=:]\s*["']?(?P<secret>[^\s"',;]+)"#,
    ),
    RedactionPattern::new(
      "user",
      r#"\b(?:user(?:name)?|login|account)\b\s*[=:]\s*["']?(?P<secret>[^\s"',;]+)"#,
    ),
    RedactionPattern::new(
      "user_path",
      r"(?:[A-Za-z]:\\Users\\|/home/|/Users/)(?P<secret>[^\\/\s]+)",
    ),
    RedactionPattern::new(
      "ip_address",
      r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
    ),
    RedactionPattern::new(
      "uuid",
      r"\b[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}\b",
    ),
  ]
}

fn placeholder_for(category: &str) -> String {
  let tag: String = category
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
    .collect();
  format!("[REDACTED_{}]", tag)
}

#[derive(Debug)]
struct CompiledPattern {
  category: String,
  placeholder: String,
  regex: Regex,
}

/// Immutable, compiled pattern set. Shared across threads of one run.
#[derive(Debug)]
pub struct Redactor {
  patterns: Vec<CompiledPattern>,
  placeholder: Regex,
}

impl Redactor {
  /// Compile `patterns`. Fails closed on an empty list or any bad pattern.
  pub fn new(patterns: Vec<RedactionPattern>) -> Result<Self, RcaError> {
    if patterns.is_empty() {
      return Err(RcaError::redaction("pattern list is empty"));
    }
    let mut compiled = Vec::with_capacity(patterns.len());
    for (idx, p) in patterns.into_iter().enumerate() {
      if p.category.trim().is_empty() {
        return Err(RcaError::redaction(format!("pattern {} has no category", idx)));
      }
      let regex = RegexBuilder::new(&p.pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| RcaError::redaction(format!("pattern {} ({}): {}", idx, p.category, e)))?;
      compiled.push(CompiledPattern {
        placeholder: placeholder_for(&p.category),
        category: p.category,
        regex,
      });
    }
    let placeholder = Regex::new(r"\[REDACTED_[A-Z0-9_]+\]")
      .map_err(|e| RcaError::internal(format!("placeholder regex: {}", e)))?;
    Ok(Self {
      patterns: compiled,
      placeholder,
    })
  }

  pub fn standard() -> Result<Self, RcaError> {
    Self::new(default_patterns())
  }

  /// JSON config: an ordered array of `{category, pattern}`.
  pub fn from_json(json: &str) -> Result<Self, RcaError> {
    let patterns: Vec<RedactionPattern> =
      serde_json::from_str(json).map_err(|e| RcaError::redaction(format!("invalid JSON: {}", e)))?;
    Self::new(patterns)
  }

  pub fn from_path(path: &Path) -> Result<Self, RcaError> {
    let json = std::fs::read_to_string(path)
      .map_err(|e| RcaError::redaction(format!("{}: {}", path.display(), e)))?;
    Self::from_json(&json)
  }

  pub fn categories(&self) -> Vec<String> {
    self.patterns.iter().map(|p| p.category.clone()).collect()
  }

  /// Redact one string without recording an audit.
  pub fn redact_text(&self, text: &str) -> String {
    self.apply(text, &mut BTreeMap::new())
  }

  /// Replace every active match in `text`, tallying hits per category.
  fn apply(&self, text: &str, tally: &mut BTreeMap<String, u64>) -> String {
    let mut current = text.to_string();
    for pattern in &self.patterns {
      let guarded: Vec<Range<usize>> = self
        .placeholder
        .find_iter(&current)
        .map(|m| m.range())
        .collect();
      let mut out = String::with_capacity(current.len());
      let mut last = 0;
      let mut hits = 0u64;
      for caps in pattern.regex.captures_iter(&current) {
        let Some(span) = caps.name("secret").or_else(|| caps.get(0)) else {
          continue;
        };
        if span.as_str().is_empty()
          || guarded.iter().any(|g| g.start <= span.start() && span.end() <= g.end)
        {
          continue;
        }
        // A span that only partly covers a placeholder swallows all of it.
        let mut start = span.start();
        let mut end = span.end();
        for g in guarded.iter() {
          if g.start < end && start < g.end {
            start = start.min(g.start);
            end = end.max(g.end);
          }
        }
        if end <= last {
          continue;
        }
        let start = start.max(last);
        out.push_str(&current[last..start]);
        out.push_str(&pattern.placeholder);
        last = end;
        hits += 1;
      }
      if hits > 0 {
        out.push_str(&current[last..]);
        current = out;
        *tally.entry(pattern.category.clone()).or_insert(0) += hits;
      }
    }
    current
  }

  /// Redact a whole file's events. Counts are taken from `raw_line`, which
  /// holds every physical line of the record; message and component are
  /// redacted with the same patterns.
  pub fn redact_file(&self, events: Vec<Event>) -> (RedactedEvents, RedactionAudit) {
    let mut tally = BTreeMap::new();
    let mut scratch = BTreeMap::new();
    let mut out = Vec::with_capacity(events.len());

    for mut event in events {
      let raw = self.apply(&event.raw_line, &mut tally);
      let message = self.apply(&event.message, &mut scratch);
      let component = event.component.as_deref().map(|c| self.apply(c, &mut scratch));

      let changed = raw != event.raw_line
        || message != event.message
        || component.as_deref() != event.component.as_deref();
      event.raw_line = raw;
      event.message = message;
      event.component = component;
      event.redacted |= changed;
      out.push(event);
    }

    let audit = RedactionAudit {
      patterns_applied: self.categories(),
      match_count: tally.values().sum(),
      matches_by_category: tally,
    };
    (RedactedEvents { events: out }, audit)
  }
}

// ---------------------------------------------------------------------------
// Redacted event set
// ---------------------------------------------------------------------------

/// Events that have passed through a [`Redactor`]. Only this module builds one.
#[derive(Debug, Clone, Default)]
pub struct RedactedEvents {
  events: Vec<Event>,
}

impl RedactedEvents {
  pub fn events(&self) -> &[Event] {
    &self.events
  }

  pub fn len(&self) -> usize {
    self.events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  /// Append another file's events, keeping intake order.
  pub fn merge(&mut self, other: RedactedEvents) {
    self.events.extend(other.events);
  }

  pub(crate) fn into_inner(self) -> Vec<Event> {
    self.events
  }
}

// ---------------------------------------------------------------------------
// Hot-reloadable source
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Cached {
  stamp: Option<(SystemTime, u64)>,
  redactor: Arc<Redactor>,
}

/// Where redaction patterns come from. Re-read at run start when the file
/// changed; a run keeps its snapshot until it finishes.
#[derive(Debug)]
pub struct RedactionSource {
  path: Option<PathBuf>,
  cached: Mutex<Option<Cached>>,
}

impl RedactionSource {
  /// Built-in patterns, never reloaded.
  pub fn builtin() -> Result<Self, RcaError> {
    Ok(Self {
      path: None,
      cached: Mutex::new(Some(Cached {
        stamp: None,
        redactor: Arc::new(Redactor::standard()?),
      })),
    })
  }

  /// Patterns from a JSON file, loaded on first snapshot.
  pub fn from_path(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Some(path.into()),
      cached: Mutex::new(None),
    }
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  /// Current pattern set. A failed reload fails closed.
  pub fn snapshot(&self) -> Result<Arc<Redactor>, RcaError> {
    let mut cached = self
      .cached
      .lock()
      .map_err(|_| RcaError::internal("redaction cache lock poisoned"))?;

    let Some(path) = &self.path else {
      return cached
        .as_ref()
        .map(|c| Arc::clone(&c.redactor))
        .ok_or_else(|| RcaError::internal("built-in redactor missing"));
    };

    let meta = std::fs::metadata(path)
      .map_err(|e| RcaError::redaction(format!("{}: {}", path.display(), e)))?;
    let stamp = meta.modified().ok().map(|m| (m, meta.len()));

    if let Some(c) = cached.as_ref() {
      if stamp.is_some() && c.stamp == stamp {
        return Ok(Arc::clone(&c.redactor));
      }
    }

    match Redactor::from_path(path) {
      Ok(redactor) => {
        let redactor = Arc::new(redactor);
        info!(patterns = redactor.patterns.len(), "redaction patterns loaded");
        *cached = Some(Cached {
          stamp,
          redactor: Arc::clone(&redactor),
        });
        Ok(redactor)
      }
      Err(err) => {
        warn!(error = %err, "redaction config reload failed; run halted");
        Err(err)
      }
    }
  }
}
