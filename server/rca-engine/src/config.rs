//! Engine configuration with sane defaults.

use std::time::Duration;

use tracing::warn;

pub const MIB: u64 = 1024 * 1024;

/// Limits enforced by file intake.
#[derive(Debug, Clone)]
pub struct IntakeLimits {
  /// Ceiling for the uploaded file and for every archive member.
  pub max_upload_bytes: u64,
  /// Ceiling for the sum of all extracted archive members.
  pub max_total_extracted_bytes: u64,
  /// Uncompressed/compressed ratio above which a member is treated as a zip bomb.
  pub max_compression_ratio: f64,
  /// Max entries (files + directories) in one archive.
  pub max_archive_members: usize,
}

impl Default for IntakeLimits {
  fn default() -> Self {
    Self {
      max_upload_bytes: 25 * MIB,
      max_total_extracted_bytes: 100 * MIB,
      max_compression_ratio: 100.0,
      max_archive_members: 1024,
    }
  }
}

/// Tunable thresholds for one orchestrator instance. Read-only after startup.
#[derive(Debug, Clone)]
pub struct Config {
  pub intake: IntakeLimits,
  /// Non-blank lines sampled per file for format detection.
  pub detection_sample_lines: usize,
  /// Sliding correlation window width in seconds.
  pub correlation_window_secs: i64,
  /// Smallest temporal cluster worth reporting.
  pub min_correlation_events: usize,
  /// Worker threads used for per-file parse + redact.
  pub parse_workers: usize,
  /// Budget for each external ML / AI collaborator call.
  pub insight_timeout: Duration,
  /// Cap on events included in the summarizer bundle.
  pub max_bundle_events: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      intake: IntakeLimits::default(),
      detection_sample_lines: 50,
      correlation_window_secs: 5,
      min_correlation_events: 2,
      parse_workers: 4,
      insight_timeout: Duration::from_secs(10),
      max_bundle_events: 500,
    }
  }
}

impl Config {
  /// Defaults overridden by `RCA_*` environment variables. Invalid values are
  /// logged and ignored.
  pub fn from_env() -> Self {
    let mut config = Self::default();
    if let Some(v) = env_parse::<u64>("RCA_MAX_UPLOAD_BYTES") {
      config.intake.max_upload_bytes = v;
    }
    if let Some(v) = env_parse::<i64>("RCA_CORRELATION_WINDOW_SECS") {
      if v > 0 {
        config.correlation_window_secs = v;
      } else {
        warn!(value = v, "RCA_CORRELATION_WINDOW_SECS must be positive; keeping default");
      }
    }
    if let Some(v) = env_parse::<usize>("RCA_PARSE_WORKERS") {
      config.parse_workers = v.max(1);
    }
    if let Some(v) = env_parse::<u64>("RCA_INSIGHT_TIMEOUT_MS") {
      config.insight_timeout = Duration::from_millis(v);
    }
    config
  }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
  let raw = std::env::var(key).ok()?;
  match raw.trim().parse::<T>() {
    Ok(v) => Some(v),
    Err(_) => {
      warn!(key, value = %raw, "ignoring unparsable environment override");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_upload_contract() {
    let config = Config::default();
    assert_eq!(config.intake.max_upload_bytes, 25 * 1024 * 1024);
    assert_eq!(config.correlation_window_secs, 5);
    assert!(config.parse_workers >= 1);
  }
}
