//! Leading-timestamp extraction over an ordered list of known shapes.
//!
//! First shape whose prefix regex matches wins. A prefix that looks like a
//! timestamp but is not a real date is a [`ParseError`], not an absence.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use regex::Regex;

use super::ParseError;
use crate::error::RcaError;

#[derive(Debug, Clone, Copy)]
enum Shape {
  /// 2024-01-15T10:30:00.123Z, 2024-01-15 10:30:00,123+02:00
  Iso,
  /// 2024/01/15 10:30:00
  SlashYmd,
  /// 1/15/2024 10:30:00 AM, 01/15/2024 22:30:00
  UsDate,
}

#[derive(Debug)]
struct TimestampShape {
  shape: Shape,
  regex: Regex,
}

/// Ordered set of timestamp shapes. Built once, shared read-only.
#[derive(Debug)]
pub struct TimestampExtractor {
  shapes: Vec<TimestampShape>,
}

impl TimestampExtractor {
  pub fn new() -> Result<Self, RcaError> {
    let table = [
      (
        Shape::Iso,
        r"^\[?(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?)(?P<tz>Z|[+-]\d{2}:?\d{2})?\]?",
      ),
      (
        Shape::SlashYmd,
        r"^\[?(?P<ts>\d{4}/\d{2}/\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d{1,9})?)\]?",
      ),
      (
        Shape::UsDate,
        r"^\[?(?P<ts>\d{1,2}/\d{1,2}/\d{4},?\s+\d{1,2}:\d{2}:\d{2}(?:\s*[AaPp][Mm])?)\]?",
      ),
    ];
    let mut shapes = Vec::with_capacity(table.len());
    for (shape, pattern) in table {
      let regex = Regex::new(pattern)
        .map_err(|e| RcaError::internal(format!("timestamp shape {:?}: {}", shape, e)))?;
      shapes.push(TimestampShape { shape, regex });
    }
    Ok(Self { shapes })
  }

  /// True when the line begins with something timestamp-shaped.
  pub fn has_leading(&self, line: &str) -> bool {
    self.shapes.iter().any(|s| s.regex.is_match(line))
  }

  /// Split a leading timestamp off `line`, returning it and the remaining text.
  pub fn extract_leading<'a>(
    &self,
    line: &'a str,
  ) -> Result<Option<(DateTime<Utc>, &'a str)>, ParseError> {
    for shape in &self.shapes {
      let Some(caps) = shape.regex.captures(line) else {
        continue;
      };
      let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
      let raw = caps.name("ts").map(|m| m.as_str()).unwrap_or_default();
      let tz = caps.name("tz").map(|m| m.as_str());
      let ts = match shape.shape {
        Shape::Iso => parse_iso(raw, tz),
        Shape::SlashYmd => parse_naive(
          &normalize_fraction(raw).replace('T', " "),
          &["%Y/%m/%d %H:%M:%S%.f", "%Y/%m/%d %H:%M:%S"],
        ),
        Shape::UsDate => parse_us(raw),
      }
      .ok_or_else(|| ParseError::Timestamp(raw.to_string()))?;
      let rest = line[whole..].trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '|');
      return Ok(Some((ts, rest)));
    }
    Ok(None)
  }
}

fn normalize_fraction(raw: &str) -> String {
  raw.replace(',', ".")
}

fn parse_naive(s: &str, formats: &[&str]) -> Option<DateTime<Utc>> {
  formats
    .iter()
    .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
    .map(|naive| naive.and_utc())
}

fn parse_iso(raw: &str, tz: Option<&str>) -> Option<DateTime<Utc>> {
  let s = normalize_fraction(raw).replacen('T', " ", 1);
  let naive = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
    .iter()
    .find_map(|f| NaiveDateTime::parse_from_str(&s, f).ok())?;
  match tz {
    None | Some("Z") => Some(naive.and_utc()),
    Some(offset) => {
      let offset = parse_offset(offset)?;
      offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
    }
  }
}

/// "+02:00" / "-0530" → FixedOffset.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
  let sign = match raw.as_bytes().first()? {
    b'+' => 1,
    b'-' => -1,
    _ => return None,
  };
  let digits: String = raw[1..].chars().filter(|c| c.is_ascii_digit()).collect();
  if digits.len() != 4 {
    return None;
  }
  let hours: i32 = digits[..2].parse().ok()?;
  let minutes: i32 = digits[2..].parse().ok()?;
  FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_us(raw: &str) -> Option<DateTime<Utc>> {
  let cleaned = raw.replace(',', " ");
  let mut parts = cleaned.split_whitespace();
  let date = parts.next()?;
  let time = parts.next()?;
  let meridiem = parts.next().map(|m| m.to_ascii_uppercase());
  // "10:30:00PM" glued form.
  let (time, meridiem) = match meridiem {
    Some(m) => (time.to_string(), Some(m)),
    None => {
      let upper = time.to_ascii_uppercase();
      match upper.strip_suffix("AM").or_else(|| upper.strip_suffix("PM")) {
        Some(t) => (t.to_string(), Some(upper[t.len()..].to_string())),
        None => (time.to_string(), None),
      }
    }
  };
  let date = NaiveDate::parse_from_str(date, "%m/%d/%Y").ok()?;
  let time = match meridiem {
    Some(m) => NaiveTime::parse_from_str(&format!("{} {}", time, m), "%I:%M:%S %p").ok()?,
    None => NaiveTime::parse_from_str(&time, "%H:%M:%S").ok()?,
  };
  Some(date.and_time(time).and_utc())
}

/// Join a date seen earlier in the file with a time-of-day ("HH:MM:SS").
pub fn at_time_of_day(date: NaiveDate, hms: &str, millis: u32) -> Option<DateTime<Utc>> {
  let time = NaiveTime::parse_from_str(hms, "%H:%M:%S").ok()?;
  let naive = date.and_time(time) + chrono::Duration::milliseconds(i64::from(millis));
  Some(naive.and_utc())
}

/// "1/15/2024" → NaiveDate.
pub fn parse_us_date(raw: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()
}
