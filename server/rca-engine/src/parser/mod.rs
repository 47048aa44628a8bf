//! Raw text → [`Event`] records.
//!
//! A [`FormatRegistry`] is built once per process and shared by `Arc`. For each
//! blob it detects the format from a sample of lines, then splits the text into
//! records (a line plus its continuation lines) and extracts fields.

mod formats;
pub mod timestamp;

pub use formats::{FileState, LineParser, LogFormat, ParsedLine};

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::RcaError;
use crate::types::{Event, EventId, Level, RawBlob};
use formats::{FormatParser, GenericParser, MsiParser, UsDateParser, WindowsSetupParser};
use timestamp::TimestampExtractor;

/// Per-record parse failure. Never escapes the parser: the record is demoted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
  #[error("unparseable timestamp: {0}")]
  Timestamp(String),
}

/// Score bonus when the file name carries a format hint.
const HINT_BONUS: usize = 5;

const STACK_FRAME_PREFIXES: &[&str] = &["at ", "Caused by", "Traceback", "File \"", "..."];

/// Output of parsing one blob, before redaction.
#[derive(Debug, Clone)]
pub struct ParsedFile {
  pub source_name: String,
  pub format: LogFormat,
  pub events: Vec<Event>,
  /// Records whose fields could not be parsed and were kept as UNKNOWN.
  pub demoted: usize,
}

/// Read-only set of format parsers plus the shared timestamp shapes.
#[derive(Debug)]
pub struct FormatRegistry {
  parsers: Vec<FormatParser>,
  timestamps: TimestampExtractor,
  sample_lines: usize,
}

impl FormatRegistry {
  /// Built-in formats. Registry order breaks detection ties, so more
  /// specific formats come before `Generic`.
  pub fn standard(sample_lines: usize) -> Result<Self, RcaError> {
    Ok(Self {
      parsers: vec![
        FormatParser::WindowsSetup(WindowsSetupParser::new()?),
        FormatParser::Msi(MsiParser::new()?),
        FormatParser::UsDate(UsDateParser::new()?),
        FormatParser::Generic(GenericParser::new()?),
      ],
      timestamps: TimestampExtractor::new()?,
      sample_lines,
    })
  }

  pub fn formats(&self) -> Vec<LogFormat> {
    self.parsers.iter().map(|p| p.as_parser().format()).collect()
  }

  fn parser_for(&self, format: LogFormat) -> Option<&dyn LineParser> {
    self
      .parsers
      .iter()
      .map(FormatParser::as_parser)
      .find(|p| p.format() == format)
  }

  /// Pick the format whose signature matches most sampled lines.
  pub fn detect(&self, source_name: &str, text: &str) -> LogFormat {
    let sample: Vec<&str> = text
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .take(self.sample_lines)
      .collect();
    let name = source_name.to_ascii_lowercase();

    let mut best = (LogFormat::Generic, 0usize);
    for parser in self.parsers.iter().map(FormatParser::as_parser) {
      let mut score = sample.iter().filter(|l| parser.signature().is_match(l)).count();
      if parser.file_hints().iter().any(|h| name.contains(h)) {
        score += HINT_BONUS;
      }
      if score > best.1 {
        best = (parser.format(), score);
      }
    }
    best.0
  }

  fn is_continuation(&self, line: &str) -> bool {
    let trimmed = line.trim_start();
    let indented = trimmed.len() != line.len();
    let frame = STACK_FRAME_PREFIXES.iter().any(|p| trimmed.starts_with(p));
    if !indented && !frame {
      return false;
    }
    if self.timestamps.has_leading(trimmed) {
      return false;
    }
    let first = trimmed.split_whitespace().next().unwrap_or_default();
    Level::from_token(first).is_none()
  }
}

/// Parse one blob into events. Event ids are left at 0; the timeline assigns them.
pub fn parse_blob(
  blob: &RawBlob,
  registry: &FormatRegistry,
  cancel: &CancelToken,
) -> Result<ParsedFile, RcaError> {
  let text = String::from_utf8_lossy(&blob.content);
  let format = registry.detect(&blob.source_name, &text);
  let parser = registry
    .parser_for(format)
    .ok_or_else(|| RcaError::internal(format!("no parser registered for {:?}", format)))?;

  let mut state = FileState::default();
  let mut events: Vec<Event> = Vec::new();
  let mut demoted = 0usize;

  for (idx, line) in text.lines().enumerate() {
    if cancel.is_cancelled() {
      return Err(RcaError::Cancelled);
    }
    if line.trim().is_empty() {
      continue;
    }
    let line_number = u32::try_from(idx + 1).unwrap_or(u32::MAX);

    if let Some(current) = events.last_mut() {
      if registry.is_continuation(line) {
        current.message.push('\n');
        current.message.push_str(line.trim_end());
        current.raw_line.push('\n');
        current.raw_line.push_str(line);
        current.line_count += 1;
        continue;
      }
    }

    let event = match parser.parse(line, &mut state, &registry.timestamps) {
      Ok(parsed) => {
        let parse_confidence = parsed.confidence();
        Event {
          id: EventId(0),
          source_file: blob.source_name.clone(),
          line_number,
          line_count: 1,
          timestamp: parsed.timestamp,
          level: parsed.level.unwrap_or(Level::Unknown),
          component: parsed.component,
          message: parsed.message,
          raw_line: line.to_string(),
          redacted: false,
          parse_confidence,
        }
      }
      Err(err) => {
        debug!(file = %blob.source_name, line = line_number, error = %err, "record demoted");
        demoted += 1;
        Event {
          id: EventId(0),
          source_file: blob.source_name.clone(),
          line_number,
          line_count: 1,
          timestamp: None,
          level: Level::Unknown,
          component: None,
          message: line.trim().to_string(),
          raw_line: line.to_string(),
          redacted: false,
          parse_confidence: 0.0,
        }
      }
    };
    events.push(event);
  }

  debug!(
    file = %blob.source_name,
    format = ?format,
    events = events.len(),
    demoted,
    "parsed blob"
  );

  Ok(ParsedFile {
    source_name: blob.source_name.clone(),
    format,
    events,
    demoted,
  })
}

// ---------------------------------------------------------------------------
// System metadata
// ---------------------------------------------------------------------------

const METADATA_KEYS: &[(&str, &str)] = &[
  ("os version", "OS Version"),
  ("bios version", "BIOS Version"),
  ("system model", "System Model"),
  ("product name", "System Model"),
];

/// Lift system facts from event text. First occurrence of each key wins.
pub fn extract_metadata(events: &[Event]) -> BTreeMap<String, String> {
  let mut out = BTreeMap::new();
  for event in events {
    for line in event.message.lines() {
      let lower = line.to_ascii_lowercase();
      for (needle, key) in METADATA_KEYS {
        if out.contains_key(*key) {
          continue;
        }
        // Whole-word match so "bios version" does not satisfy "os version".
        let Some((at, _)) = lower.match_indices(needle).find(|(i, _)| {
          *i == 0 || !lower.as_bytes()[*i - 1].is_ascii_alphanumeric()
        }) else {
          continue;
        };
        let value = line[at + needle.len()..]
          .trim_start_matches(|c: char| c == ':' || c == '=' || c.is_whitespace())
          .trim();
        if !value.is_empty() {
          out.insert((*key).to_string(), value.to_string());
        }
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn registry() -> FormatRegistry {
    FormatRegistry::standard(50).unwrap()
  }

  fn blob(name: &str, text: &str) -> RawBlob {
    RawBlob {
      source_name: name.into(),
      content: text.as_bytes().to_vec(),
      declared_size: text.len() as u64,
    }
  }

  fn parse(name: &str, text: &str) -> ParsedFile {
    parse_blob(&blob(name, text), &registry(), &CancelToken::new()).unwrap()
  }

  #[test]
  fn three_line_scenario() {
    let out = parse(
      "a.log",
      "2024-01-01T00:00:00 ERROR disk full\nINFO retry\nnot a log line\n",
    );
    assert_eq!(out.events.len(), 3);
    assert_eq!(out.events[0].level, Level::Error);
    assert_eq!(out.events[0].parse_confidence, 1.0);
    assert_eq!(out.events[1].level, Level::Info);
    assert_eq!(out.events[1].timestamp, None);
    assert_eq!(out.events[1].parse_confidence, 0.5);
    assert_eq!(out.events[2].level, Level::Unknown);
    assert_eq!(out.events[2].parse_confidence, 0.0);
    assert_eq!(out.events[2].message, "not a log line");
  }

  #[test]
  fn continuation_lines_merge() {
    let out = parse(
      "agent.log",
      "2024-01-01T00:00:00 ERROR crash\n    at Foo.bar(Foo.java:10)\nCaused by: IOException\n2024-01-01T00:00:01 INFO next\n",
    );
    assert_eq!(out.events.len(), 2);
    assert_eq!(out.events[0].line_count, 3);
    assert!(out.events[0].message.contains("Caused by"));
    assert_eq!(out.events[1].line_number, 4);
  }

  #[test]
  fn indented_line_with_level_starts_record() {
    let out = parse("a.log", "ERROR first\n  WARN second\n");
    assert_eq!(out.events.len(), 2);
    assert_eq!(out.events[1].level, Level::Warn);
  }

  #[test]
  fn blank_lines_and_crlf() {
    let out = parse("a.log", "INFO one\r\n\r\n   \r\nINFO two\r\n");
    assert_eq!(out.events.len(), 2);
    assert_eq!(out.events[0].message, "one");
    assert_eq!(out.events[1].line_number, 4);
  }

  #[test]
  fn bad_date_demotes_record() {
    let out = parse("a.log", "2024-02-30T00:00:00 ERROR impossible\n");
    assert_eq!(out.events.len(), 1);
    assert_eq!(out.demoted, 1);
    assert_eq!(out.events[0].level, Level::Unknown);
    assert_eq!(out.events[0].parse_confidence, 0.0);
  }

  #[test]
  fn invalid_utf8_is_lossy() {
    let mut content = b"ERROR bad byte ".to_vec();
    content.push(0xff);
    let b = RawBlob {
      source_name: "a.log".into(),
      declared_size: content.len() as u64,
      content,
    };
    let out = parse_blob(&b, &registry(), &CancelToken::new()).unwrap();
    assert_eq!(out.events.len(), 1);
    assert!(out.events[0].message.contains('\u{fffd}'));
  }

  #[test]
  fn cancelled_parse_stops() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = parse_blob(&blob("a.log", "INFO x\n"), &registry(), &cancel).unwrap_err();
    assert!(matches!(err, RcaError::Cancelled));
  }

  #[test]
  fn detects_windows_setup_by_content() {
    let text = "2024-01-15 10:30:00, Info                  CBS    Loaded\n\
                2024-01-15 10:30:01, Error                 CBS    Failed\n";
    assert_eq!(registry().detect("trace.txt", text), LogFormat::WindowsSetup);
  }

  #[test]
  fn detects_msi_by_name_hint() {
    assert_eq!(registry().detect("MsiInstall.log", "hello\n"), LogFormat::Msi);
  }

  #[test]
  fn detects_us_date() {
    let text = "1/15/2024 10:30:00 AM - INFO - start\n1/15/2024 10:30:05 AM - ERROR - fail\n";
    assert_eq!(registry().detect("hp.log", text), LogFormat::UsDate);
  }

  #[test]
  fn unknown_text_falls_back_to_generic() {
    assert_eq!(registry().detect("x.log", "nothing here\n"), LogFormat::Generic);
  }

  #[test]
  fn metadata_from_messages() {
    let out = parse(
      "sys.log",
      "INFO BIOS Version: U23 Ver. 01.10.00\nINFO OS Version: Windows 11 Pro\nINFO Product Name: EliteBook 840\n",
    );
    let meta = extract_metadata(&out.events);
    assert_eq!(meta["OS Version"], "Windows 11 Pro");
    assert_eq!(meta["System Model"], "EliteBook 840");
    assert!(meta["BIOS Version"].contains("01.10.00"));
  }
}
