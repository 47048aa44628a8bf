//! Stable identifiers derived from content.
//!
//! Everything here is a pure function of its input so that repeated runs over
//! identical uploads produce byte-identical reports. Uses blake3 throughout.

use crate::types::RawBlob;

/// Run id: hash of every blob name + content in intake order.
pub fn run_id(blobs: &[RawBlob]) -> String {
  let mut hasher = blake3::Hasher::new();
  for blob in blobs {
    hasher.update(blob.source_name.as_bytes());
    hasher.update(b"|");
    hasher.update(&(blob.content.len() as u64).to_le_bytes());
    hasher.update(&blob.content);
    hasher.update(b"|");
  }
  let hex = hasher.finalize().to_hex();
  format!("run-{}", &hex[..16])
}

/// Issue id: one issue per rule per run, so the rule id alone is the key.
pub fn issue_id(rule_id: &str) -> String {
  let hex = blake3::hash(rule_id.as_bytes()).to_hex();
  format!("iss-{}", &hex[..12])
}

/// Numeric component hash for feature vectors. `None` hashes to 0.
pub fn component_hash(component: Option<&str>) -> u64 {
  match component {
    Some(c) => {
      let normalized = c.trim().to_ascii_lowercase();
      let hash = blake3::hash(normalized.as_bytes());
      let mut first = [0u8; 8];
      first.copy_from_slice(&hash.as_bytes()[..8]);
      u64::from_le_bytes(first)
    }
    None => 0,
  }
}
