//! Structured error types for the RCA pipeline.
//!
//! Every variant maps to a stable `E.*` code from the caller-facing taxonomy.
//! `public_message` is what may leave the process: no paths, no internals.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RcaError {
  #[error("invalid content type: {0}")]
  InvalidContentType(String),

  #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
  TooLarge { size: u64, limit: u64 },

  #[error("invalid file type: {0}")]
  InvalidType(String),

  #[error("missing required field: {0}")]
  MissingField(String),

  #[error("invalid test plan: {0}")]
  InvalidTestPlan(String),

  #[error("corrupt archive: {0}")]
  CorruptArchive(String),

  #[error("no log records found in input")]
  EmptyInput,

  #[error("run cancelled")]
  Cancelled,

  #[error("rule configuration: {0}")]
  RuleConfig(String),

  #[error("correlation pairing configuration: {0}")]
  PairingConfig(String),

  #[error("redaction configuration: {0}")]
  RedactionConfig(String),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("internal: {0}")]
  Internal(String),
}

impl RcaError {
  pub fn invalid_type(reason: impl Into<String>) -> Self {
    Self::InvalidType(reason.into())
  }

  pub fn corrupt(reason: impl Into<String>) -> Self {
    Self::CorruptArchive(reason.into())
  }

  pub fn redaction(reason: impl Into<String>) -> Self {
    Self::RedactionConfig(reason.into())
  }

  pub fn internal(reason: impl Into<String>) -> Self {
    Self::Internal(reason.into())
  }

  /// Stable code from the caller-facing taxonomy.
  pub fn code(&self) -> &'static str {
    match self {
      Self::InvalidContentType(_) => "E.REQ.001",
      Self::TooLarge { .. } => "E.REQ.002",
      Self::InvalidType(_) => "E.REQ.003",
      Self::MissingField(_) => "E.REQ.004",
      Self::InvalidTestPlan(_) => "E.REQ.005",
      Self::CorruptArchive(_) => "E.REQ.006",
      Self::EmptyInput | Self::Internal(_) => "E.SRV.001",
      Self::Io(_) => "E.SRV.003",
      Self::Cancelled => "E.SRV.004",
      Self::RuleConfig(_) | Self::PairingConfig(_) => "E.SRV.005",
      Self::RedactionConfig(_) => "E.SEC.003",
    }
  }

  /// True for errors caused by the request itself (E.REQ.*).
  pub fn is_request_error(&self) -> bool {
    self.code().starts_with("E.REQ.")
  }

  /// Message safe to hand to callers outside the process.
  pub fn public_message(&self) -> String {
    match self {
      Self::Io(_) => "input could not be read".to_string(),
      Self::Internal(_) => "processing failed".to_string(),
      Self::RedactionConfig(_) => {
        "redaction configuration could not be loaded; processing halted".to_string()
      }
      Self::RuleConfig(_) | Self::PairingConfig(_) => {
        "analysis configuration could not be loaded".to_string()
      }
      other => other.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn codes_follow_taxonomy() {
    assert_eq!(RcaError::TooLarge { size: 2, limit: 1 }.code(), "E.REQ.002");
    assert_eq!(RcaError::invalid_type("exe").code(), "E.REQ.003");
    assert_eq!(RcaError::EmptyInput.code(), "E.SRV.001");
    assert_eq!(RcaError::redaction("bad").code(), "E.SEC.003");
    assert!(RcaError::corrupt("bomb").is_request_error());
    assert!(!RcaError::Cancelled.is_request_error());
  }

  #[test]
  fn public_message_hides_internals() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "/home/alice/secret.log");
    let msg = RcaError::Io(io).public_message();
    assert!(!msg.contains("alice"));

    let msg = RcaError::redaction("pattern 3 at /etc/rca/redact.json").public_message();
    assert!(!msg.contains("/etc"));
  }
}
