//! Provisioning-log root-cause-analysis engine: deterministic, rule-based.
//!
//! Accepts a log file or zip bundle, parses heterogeneous log text into
//! normalized events, redacts sensitive text, orders everything on one
//! timeline, correlates related events, runs the diagnostic rule table and
//! validates an optional test plan. Emits one `RcaReport` JSON document.
//!
//! Only redacted data crosses into correlation, rules and the optional ML / AI
//! collaborators; the type system enforces it via [`redact::RedactedEvents`].

pub mod cancel;
pub mod config;
pub mod correlation;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod insights;
pub mod intake;
pub mod orchestrator;
pub mod parser;
pub mod redact;
pub mod rules;
pub mod testplan;
pub mod timeline;
pub mod types;

pub use cancel::CancelToken;
pub use config::Config;
pub use correlation::PairingTable;
pub use error::RcaError;
pub use orchestrator::{Orchestrator, RunOptions};
pub use redact::{RedactionSource, Redactor};
pub use rules::RuleSet;
pub use testplan::TestPlan;
pub use types::{RcaReport, Upload};
