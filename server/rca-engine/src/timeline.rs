//! Total ordering of redacted events.
//!
//! Sort key: (effective timestamp, source file, line number, intake order).
//! A record without a timestamp borrows the nearest preceding timestamp from
//! the same file; with none before it, it sorts first. Ids are assigned
//! 1..=N in the final order.

use chrono::{DateTime, Utc};

use crate::redact::RedactedEvents;
use crate::types::{Event, EventId};

/// Ordered, id-assigned events. Only buildable from [`RedactedEvents`].
#[derive(Debug, Clone, Default)]
pub struct Timeline {
  events: Vec<Event>,
  effective: Vec<Option<DateTime<Utc>>>,
}

impl Timeline {
  pub fn build(redacted: RedactedEvents) -> Self {
    let events = redacted.into_inner();

    let mut keyed: Vec<(Option<DateTime<Utc>>, usize, Event)> = Vec::with_capacity(events.len());
    let mut carried: Option<DateTime<Utc>> = None;
    let mut current_file: Option<String> = None;
    for (intake_idx, event) in events.into_iter().enumerate() {
      if current_file.as_deref() != Some(event.source_file.as_str()) {
        current_file = Some(event.source_file.clone());
        carried = None;
      }
      if event.timestamp.is_some() {
        carried = event.timestamp;
      }
      keyed.push((carried, intake_idx, event));
    }

    keyed.sort_by(|a, b| {
      a.0
        .cmp(&b.0)
        .then_with(|| a.2.source_file.cmp(&b.2.source_file))
        .then_with(|| a.2.line_number.cmp(&b.2.line_number))
        .then_with(|| a.1.cmp(&b.1))
    });

    let mut events = Vec::with_capacity(keyed.len());
    let mut effective = Vec::with_capacity(keyed.len());
    for (idx, (ts, _, mut event)) in keyed.into_iter().enumerate() {
      event.id = EventId(idx as u64 + 1);
      effective.push(ts);
      events.push(event);
    }
    Self { events, effective }
  }

  pub fn events(&self) -> &[Event] {
    &self.events
  }

  pub fn len(&self) -> usize {
    self.events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }

  pub fn get(&self, id: EventId) -> Option<&Event> {
    let idx = usize::try_from(id.0).ok()?.checked_sub(1)?;
    self.events.get(idx)
  }

  /// Events paired with their effective timestamps, in timeline order.
  pub fn with_effective(&self) -> impl Iterator<Item = (&Event, Option<DateTime<Utc>>)> + '_ {
    self.events.iter().zip(self.effective.iter().copied())
  }

  pub fn into_events(self) -> Vec<Event> {
    self.events
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::redact::Redactor;
  use crate::types::Level;
  use chrono::TimeZone;

  pub(crate) fn ev(
    file: &str,
    line: u32,
    ts: Option<(u32, u32)>,
    level: Level,
    component: Option<&str>,
    message: &str,
  ) -> Event {
    Event {
      id: EventId(0),
      source_file: file.into(),
      line_number: line,
      line_count: 1,
      timestamp: ts.map(|(m, s)| Utc.with_ymd_and_hms(2024, 1, 1, 0, m, s).unwrap()),
      level,
      component: component.map(String::from),
      message: message.into(),
      raw_line: message.into(),
      redacted: false,
      parse_confidence: 1.0,
    }
  }

  pub(crate) fn timeline(events: Vec<Event>) -> Timeline {
    let (redacted, _) = Redactor::standard().unwrap().redact_file(events);
    Timeline::build(redacted)
  }

  #[test]
  fn orders_by_time_then_file_then_line() {
    let t = timeline(vec![
      ev("b.log", 1, Some((0, 5)), Level::Info, None, "b1"),
      ev("a.log", 2, Some((0, 5)), Level::Info, None, "a2"),
      ev("a.log", 1, Some((0, 1)), Level::Info, None, "a1"),
    ]);
    let order: Vec<&str> = t.events().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(order, vec!["a1", "a2", "b1"]);
    let ids: Vec<u64> = t.events().iter().map(|e| e.id.0).collect();
    assert_eq!(ids, vec![1, 2, 3]);
  }

  #[test]
  fn untimed_event_follows_preceding_timestamp_in_file() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 10)), Level::Error, None, "first"),
      ev("a.log", 2, None, Level::Info, None, "retry"),
      ev("b.log", 1, Some((0, 5)), Level::Info, None, "other"),
    ]);
    let order: Vec<&str> = t.events().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(order, vec!["other", "first", "retry"]);
    assert_eq!(t.events()[2].timestamp, None);
  }

  #[test]
  fn untimed_event_without_predecessor_sorts_first() {
    let t = timeline(vec![
      ev("a.log", 1, Some((0, 1)), Level::Info, None, "timed"),
      ev("b.log", 1, None, Level::Unknown, None, "header"),
    ]);
    assert_eq!(t.events()[0].message, "header");
  }

  #[test]
  fn get_by_id() {
    let t = timeline(vec![ev("a.log", 1, None, Level::Info, None, "x")]);
    assert_eq!(t.get(EventId(1)).map(|e| e.message.as_str()), Some("x"));
    assert!(t.get(EventId(0)).is_none());
    assert!(t.get(EventId(2)).is_none());
  }
}
