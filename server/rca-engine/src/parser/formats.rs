//! The closed set of log formats and their line parsers.
//!
//! Each format is a small struct implementing [`LineParser`]. [`FormatParser`]
//! is the closed enum the registry hands out; there is no plugin mechanism.

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;

use super::timestamp::{at_time_of_day, parse_us_date, TimestampExtractor};
use super::ParseError;
use crate::error::RcaError;
use crate::types::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
  Generic,
  WindowsSetup,
  Msi,
  UsDate,
}

/// Fields pulled out of one record's first line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLine {
  pub timestamp: Option<DateTime<Utc>>,
  pub level: Option<Level>,
  pub component: Option<String>,
  pub message: String,
}

impl ParsedLine {
  pub fn confidence(&self) -> f64 {
    match (self.timestamp.is_some(), self.level.is_some()) {
      (true, true) => 1.0,
      (false, false) => 0.0,
      _ => 0.5,
    }
  }
}

/// Per-file state some formats carry between lines.
#[derive(Debug, Default)]
pub struct FileState {
  /// Date from an MSI "Verbose logging started" header.
  pub msi_date: Option<NaiveDate>,
}

/// One parse contract shared by every format.
pub trait LineParser: Send + Sync {
  fn format(&self) -> LogFormat;

  /// Regex a representative line of this format matches.
  fn signature(&self) -> &Regex;

  /// Lowercase file-name fragments that hint at this format.
  fn file_hints(&self) -> &'static [&'static str] {
    &[]
  }

  fn parse(
    &self,
    line: &str,
    state: &mut FileState,
    ts: &TimestampExtractor,
  ) -> Result<ParsedLine, ParseError>;
}

fn compile(name: &str, pattern: &str) -> Result<Regex, RcaError> {
  Regex::new(pattern).map_err(|e| RcaError::internal(format!("{} signature: {}", name, e)))
}

// ---------------------------------------------------------------------------
// Shared field splitting
// ---------------------------------------------------------------------------

/// Next whitespace-delimited token; a leading `[` runs to its closing `]`.
fn next_token(s: &str) -> Option<(&str, &str)> {
  let s = s.trim_start();
  if s.is_empty() {
    return None;
  }
  let end = if s.starts_with('[') {
    s.find(']').map(|i| i + 1).unwrap_or(s.len())
  } else {
    s.find(char::is_whitespace).unwrap_or(s.len())
  };
  Some((&s[..end], &s[end..]))
}

fn bracketed(token: &str) -> Option<&str> {
  token
    .strip_prefix('[')
    .and_then(|t| t.strip_suffix(']'))
    .map(str::trim)
    .filter(|t| !t.is_empty())
}

/// `Setup:`-style component label.
fn colon_label(token: &str) -> Option<&str> {
  let label = token.strip_suffix(':')?;
  let ok = !label.is_empty()
    && label.len() <= 40
    && label.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'));
  ok.then_some(label)
}

fn level_token(token: &str) -> Option<Level> {
  if let Some(v) = token.strip_prefix("level=") {
    return Level::from_token(v.trim_matches('"'));
  }
  Level::from_token(token)
}

/// Split `[component] LEVEL: message`, `LEVEL [component] message` and
/// `LEVEL component: message` shapes. Anything unrecognized stays in the message.
pub(crate) fn split_fields(rest: &str) -> (Option<Level>, Option<String>, String) {
  let mut level = None;
  let mut component = None;
  let mut cursor = rest.trim();

  // Leading bracketed component before the level.
  if let Some((tok, after)) = next_token(cursor) {
    if level_token(tok).is_none() {
      if let Some(c) = bracketed(tok) {
        if next_token(after).and_then(|(t, _)| level_token(t)).is_some() {
          component = Some(c.to_string());
          cursor = after.trim_start();
        }
      }
    }
  }

  if let Some((tok, after)) = next_token(cursor) {
    if let Some(l) = level_token(tok) {
      level = Some(l);
      cursor = after.trim_start();
    }
  }

  if component.is_none() {
    if let Some((tok, after)) = next_token(cursor) {
      let label = bracketed(tok).or_else(|| colon_label(tok));
      // A trailing label with nothing after it is the message itself.
      if let Some(label) = label.filter(|_| !after.trim().is_empty()) {
        component = Some(label.to_string());
        cursor = after.trim_start();
      }
    }
  }

  let message = cursor
    .trim_start_matches(|c: char| c == '-' || c == ':' || c.is_whitespace())
    .trim_end()
    .to_string();
  (level, component, message)
}

fn generic_parse(line: &str, ts: &TimestampExtractor) -> Result<ParsedLine, ParseError> {
  let trimmed = line.trim();
  let (timestamp, rest) = match ts.extract_leading(trimmed)? {
    Some((t, rest)) => (Some(t), rest),
    None => (None, trimmed),
  };
  let (level, component, message) = split_fields(rest);
  Ok(ParsedLine {
    timestamp,
    level,
    component,
    message,
  })
}

// ---------------------------------------------------------------------------
// Generic
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GenericParser {
  signature: Regex,
}

impl GenericParser {
  pub fn new() -> Result<Self, RcaError> {
    Ok(Self {
      signature: compile(
        "generic",
        r"^\[?\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}|(?i)^\[?(trace|debug|info|warn|warning|error|fatal|critical)\]?[:\s]",
      )?,
    })
  }
}

impl LineParser for GenericParser {
  fn format(&self) -> LogFormat {
    LogFormat::Generic
  }

  fn signature(&self) -> &Regex {
    &self.signature
  }

  fn parse(
    &self,
    line: &str,
    _state: &mut FileState,
    ts: &TimestampExtractor,
  ) -> Result<ParsedLine, ParseError> {
    generic_parse(line, ts)
  }
}

// ---------------------------------------------------------------------------
// Windows setup (CBS / DISM / setupact)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WindowsSetupParser {
  signature: Regex,
  fields: Regex,
}

impl WindowsSetupParser {
  pub fn new() -> Result<Self, RcaError> {
    Ok(Self {
      signature: compile(
        "windows_setup",
        r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}, [A-Za-z]+\s",
      )?,
      fields: compile(
        "windows_setup fields",
        r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}, (?P<level>[A-Za-z]+)\s+(?:(?P<comp>[A-Za-z][\w.\-]*)\s{2,})?(?P<msg>.*)$",
      )?,
    })
  }
}

impl LineParser for WindowsSetupParser {
  fn format(&self) -> LogFormat {
    LogFormat::WindowsSetup
  }

  fn signature(&self) -> &Regex {
    &self.signature
  }

  fn file_hints(&self) -> &'static [&'static str] {
    &["setupact", "setuperr", "cbs", "dism"]
  }

  fn parse(
    &self,
    line: &str,
    _state: &mut FileState,
    ts: &TimestampExtractor,
  ) -> Result<ParsedLine, ParseError> {
    let trimmed = line.trim();
    let Some(caps) = self.fields.captures(trimmed) else {
      return generic_parse(line, ts);
    };
    let timestamp = ts.extract_leading(trimmed)?.map(|(t, _)| t);
    let level = caps.name("level").and_then(|m| Level::from_token(m.as_str()));
    let component = caps.name("comp").map(|m| m.as_str().to_string());
    let message = caps
      .name("msg")
      .map(|m| m.as_str().trim().to_string())
      .unwrap_or_default();
    Ok(ParsedLine {
      timestamp,
      level,
      component,
      message,
    })
  }
}

// ---------------------------------------------------------------------------
// MSI verbose logs
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MsiParser {
  signature: Regex,
  header: Regex,
  line: Regex,
}

impl MsiParser {
  pub fn new() -> Result<Self, RcaError> {
    Ok(Self {
      signature: compile("msi", r"^MSI \([a-zA-Z]\) \(|^=== (Verbose )?[Ll]ogging (started|stopped)")?,
      header: compile(
        "msi header",
        r"^=== (?:Verbose )?[Ll]ogging (?:started|stopped): (?P<date>\d{1,2}/\d{1,2}/\d{4})\s+(?P<time>\d{1,2}:\d{2}:\d{2})(?P<rest>.*)$",
      )?,
      line: compile(
        "msi line",
        r"^MSI \((?P<ctx>[a-zA-Z])\) \([0-9A-Fa-f]{1,4}[:!][0-9A-Fa-f]{1,4}\) \[(?P<time>\d{2}:\d{2}:\d{2}):(?P<ms>\d{1,3})\]: (?P<msg>.*)$",
      )?,
    })
  }
}

impl LineParser for MsiParser {
  fn format(&self) -> LogFormat {
    LogFormat::Msi
  }

  fn signature(&self) -> &Regex {
    &self.signature
  }

  fn file_hints(&self) -> &'static [&'static str] {
    &["msi"]
  }

  fn parse(
    &self,
    line: &str,
    state: &mut FileState,
    ts: &TimestampExtractor,
  ) -> Result<ParsedLine, ParseError> {
    let trimmed = line.trim();

    if let Some(caps) = self.header.captures(trimmed) {
      let raw_date = &caps["date"];
      let date = parse_us_date(raw_date).ok_or_else(|| ParseError::Timestamp(raw_date.to_string()))?;
      state.msi_date = Some(date);
      let timestamp = at_time_of_day(date, &caps["time"], 0)
        .ok_or_else(|| ParseError::Timestamp(caps["time"].to_string()))?;
      let message = trimmed.trim_matches(|c: char| c == '=' || c.is_whitespace()).to_string();
      return Ok(ParsedLine {
        timestamp: Some(timestamp),
        level: Some(Level::Info),
        component: Some("msi".to_string()),
        message,
      });
    }

    if let Some(caps) = self.line.captures(trimmed) {
      let millis = caps["ms"].parse::<u32>().unwrap_or(0);
      let timestamp = match state.msi_date {
        Some(date) => Some(
          at_time_of_day(date, &caps["time"], millis)
            .ok_or_else(|| ParseError::Timestamp(caps["time"].to_string()))?,
        ),
        None => None,
      };
      let component = match caps["ctx"].to_ascii_lowercase().as_str() {
        "s" => "msi_server",
        "c" => "msi_client",
        _ => "msi",
      };
      let message = caps["msg"].trim().to_string();
      let level = next_token(&message).and_then(|(t, _)| level_token(t));
      return Ok(ParsedLine {
        timestamp,
        level,
        component: Some(component.to_string()),
        message,
      });
    }

    generic_parse(line, ts)
  }
}

// ---------------------------------------------------------------------------
// US date (M/D/YYYY h:mm:ss AM)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct UsDateParser {
  signature: Regex,
}

impl UsDateParser {
  pub fn new() -> Result<Self, RcaError> {
    Ok(Self {
      signature: compile("us_date", r"^\[?\d{1,2}/\d{1,2}/\d{4},?\s+\d{1,2}:\d{2}:\d{2}")?,
    })
  }
}

impl LineParser for UsDateParser {
  fn format(&self) -> LogFormat {
    LogFormat::UsDate
  }

  fn signature(&self) -> &Regex {
    &self.signature
  }

  /// Fields are often separated by ` - `: `date - LEVEL - Component - message`.
  fn parse(
    &self,
    line: &str,
    _state: &mut FileState,
    ts: &TimestampExtractor,
  ) -> Result<ParsedLine, ParseError> {
    let trimmed = line.trim();
    let Some((timestamp, rest)) = ts.extract_leading(trimmed)? else {
      return generic_parse(line, ts);
    };
    let rest = rest.trim_start_matches(|c: char| c == '-' || c.is_whitespace());
    if !rest.contains(" - ") {
      let (level, component, message) = split_fields(rest);
      return Ok(ParsedLine {
        timestamp: Some(timestamp),
        level,
        component,
        message,
      });
    }

    let mut fields: Vec<&str> = rest.splitn(3, " - ").map(str::trim).collect();
    let mut level = None;
    if let Some(pos) = fields.iter().position(|f| Level::from_token(f).is_some()) {
      level = Level::from_token(fields[pos]);
      fields.remove(pos);
    }
    let label = |c: &str| bracketed(c).unwrap_or(c).to_string();
    let (component, message) = match fields.as_slice() {
      [only] => (None, only.to_string()),
      [comp, msg] => (Some(label(comp)), msg.to_string()),
      [comp, a, b] => (Some(label(comp)), format!("{} - {}", a, b)),
      _ => (None, String::new()),
    };
    Ok(ParsedLine {
      timestamp: Some(timestamp),
      level,
      component: component.filter(|c| !c.is_empty()),
      message,
    })
  }
}

// ---------------------------------------------------------------------------
// Closed dispatch
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum FormatParser {
  WindowsSetup(WindowsSetupParser),
  Msi(MsiParser),
  UsDate(UsDateParser),
  Generic(GenericParser),
}

impl FormatParser {
  pub fn as_parser(&self) -> &dyn LineParser {
    match self {
      Self::WindowsSetup(p) => p,
      Self::Msi(p) => p,
      Self::UsDate(p) => p,
      Self::Generic(p) => p,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Timelike};

  fn ts() -> TimestampExtractor {
    TimestampExtractor::new().unwrap()
  }

  #[test]
  fn split_level_then_bracket_component() {
    let (level, comp, msg) = split_fields("ERROR [Imaging] disk not found");
    assert_eq!(level, Some(Level::Error));
    assert_eq!(comp.as_deref(), Some("Imaging"));
    assert_eq!(msg, "disk not found");
  }

  #[test]
  fn split_bracket_component_then_level() {
    let (level, comp, msg) = split_fields("[Agent] WARNING: retrying");
    assert_eq!(level, Some(Level::Warn));
    assert_eq!(comp.as_deref(), Some("Agent"));
    assert_eq!(msg, "retrying");
  }

  #[test]
  fn split_colon_component() {
    let (level, comp, msg) = split_fields("INFO Setup: copying files");
    assert_eq!(level, Some(Level::Info));
    assert_eq!(comp.as_deref(), Some("Setup"));
    assert_eq!(msg, "copying files");
  }

  #[test]
  fn split_plain_text() {
    let (level, comp, msg) = split_fields("not a log line");
    assert_eq!(level, None);
    assert_eq!(comp, None);
    assert_eq!(msg, "not a log line");
  }

  #[test]
  fn generic_full_line() {
    let p = GenericParser::new().unwrap();
    let out = p
      .parse("2024-01-01T00:00:00 ERROR disk full", &mut FileState::default(), &ts())
      .unwrap();
    assert_eq!(out.timestamp, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    assert_eq!(out.level, Some(Level::Error));
    assert_eq!(out.message, "disk full");
    assert_eq!(out.confidence(), 1.0);
  }

  #[test]
  fn generic_level_only_has_half_confidence() {
    let p = GenericParser::new().unwrap();
    let out = p.parse("INFO retry", &mut FileState::default(), &ts()).unwrap();
    assert_eq!(out.timestamp, None);
    assert_eq!(out.level, Some(Level::Info));
    assert_eq!(out.message, "retry");
    assert_eq!(out.confidence(), 0.5);
  }

  #[test]
  fn windows_setup_columns() {
    let p = WindowsSetupParser::new().unwrap();
    let out = p
      .parse(
        "2024-01-15 10:30:00, Error                 CBS    Failed to resolve package",
        &mut FileState::default(),
        &ts(),
      )
      .unwrap();
    assert_eq!(out.level, Some(Level::Error));
    assert_eq!(out.component.as_deref(), Some("CBS"));
    assert_eq!(out.message, "Failed to resolve package");
    assert!(out.timestamp.is_some());
  }

  #[test]
  fn msi_lines_take_date_from_header() {
    let p = MsiParser::new().unwrap();
    let mut state = FileState::default();
    let header = p
      .parse(
        "=== Verbose logging started: 1/15/2024  10:30:00  Build type: SHIP UNICODE ===",
        &mut state,
        &ts(),
      )
      .unwrap();
    assert_eq!(header.level, Some(Level::Info));
    assert!(state.msi_date.is_some());

    let line = p
      .parse(
        "MSI (s) (1C:2C) [10:30:05:123]: Product: Agent -- Error 1603.",
        &mut state,
        &ts(),
      )
      .unwrap();
    let t = line.timestamp.unwrap();
    assert_eq!(t.hour(), 10);
    assert_eq!(t.second(), 5);
    assert_eq!(t.timestamp_subsec_millis(), 123);
    assert_eq!(line.component.as_deref(), Some("msi_server"));
  }

  #[test]
  fn msi_line_without_header_has_no_timestamp() {
    let p = MsiParser::new().unwrap();
    let line = p
      .parse("MSI (c) (AB:CD) [09:00:00:000]: Doing action: INSTALL", &mut FileState::default(), &ts())
      .unwrap();
    assert_eq!(line.timestamp, None);
    assert_eq!(line.component.as_deref(), Some("msi_client"));
  }

  #[test]
  fn us_date_dash_fields() {
    let p = UsDateParser::new().unwrap();
    let out = p
      .parse(
        "1/15/2024 10:30:00 AM - ERROR - SoftPaq - Driver install failed",
        &mut FileState::default(),
        &ts(),
      )
      .unwrap();
    assert_eq!(out.level, Some(Level::Error));
    assert_eq!(out.component.as_deref(), Some("SoftPaq"));
    assert_eq!(out.message, "Driver install failed");
  }

  #[test]
  fn dispatch_reports_format() {
    let p = FormatParser::Msi(MsiParser::new().unwrap());
    assert_eq!(p.as_parser().format(), LogFormat::Msi);
  }
}
