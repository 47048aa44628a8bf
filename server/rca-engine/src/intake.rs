//! File intake: validate one upload and extract it into raw text blobs.
//!
//! Accepts a single `.log` / `.txt` file or a `.zip` bundle. Archive members
//! are validated one by one; a bad member is skipped with a note while the
//! rest of the bundle is still processed. Extraction happens in memory, so
//! the extracted data lives exactly as long as the returned [`Intake`].

use std::io::{Cursor, Read};

use tracing::{debug, info, warn};

use crate::config::IntakeLimits;
use crate::error::RcaError;
use crate::types::{RawBlob, SkippedInput, Upload};

pub const ALLOWED_EXTENSIONS: &[&str] = &["log", "txt", "zip"];

const TEXT_EXTENSIONS: &[&str] = &["log", "txt"];

const NESTED_ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z", "rar", "tar", "gz", "tgz", "cab", "bz2", "xz"];

const ALLOWED_CONTENT_TYPES: &[&str] = &[
  "text/plain",
  "text/x-log",
  "application/octet-stream",
  "application/zip",
  "application/x-zip-compressed",
  "application/x-zip",
];

/// Bytes inspected when sniffing text files for binary content.
const SNIFF_BYTES: usize = 8192;

/// Blobs ready for parsing plus members that were rejected individually.
#[derive(Debug, Clone, Default)]
pub struct Intake {
  pub blobs: Vec<RawBlob>,
  pub skipped: Vec<SkippedInput>,
}

/// Validate an upload and extract its text content.
pub fn accept(upload: Upload, limits: &IntakeLimits) -> Result<Intake, RcaError> {
  let name = sanitize_file_name(&upload.file_name);
  if name.is_empty() {
    return Err(RcaError::MissingField("file".into()));
  }

  // Actual byte length wins over whatever the client declared.
  let actual = upload.bytes.len() as u64;
  if let Some(declared) = upload.declared_size {
    if declared != actual {
      debug!(declared, actual, "declared upload size differs from received bytes");
    }
  }
  if actual > limits.max_upload_bytes {
    return Err(RcaError::TooLarge {
      size: actual,
      limit: limits.max_upload_bytes,
    });
  }

  if let Some(ct) = upload.content_type.as_deref() {
    if !content_type_allowed(ct) {
      return Err(RcaError::invalid_type(format!("content type {} not accepted", base_content_type(ct))));
    }
  }

  let ext = extension(&name).ok_or_else(|| RcaError::invalid_type("missing file extension"))?;
  if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
    return Err(RcaError::invalid_type(format!(
      ".{} not accepted; allowed: .log, .txt, .zip",
      ext
    )));
  }

  if ext == "zip" {
    let intake = extract_archive(&upload.bytes, limits)?;
    info!(
      archive = %name,
      members = intake.blobs.len(),
      skipped = intake.skipped.len(),
      "archive accepted"
    );
    return Ok(intake);
  }

  if looks_binary(&upload.bytes) {
    return Err(RcaError::invalid_type("file content is binary, not text"));
  }
  info!(file = %name, bytes = actual, "log file accepted");
  Ok(Intake {
    blobs: vec![RawBlob {
      source_name: name,
      content: upload.bytes,
      declared_size: upload.declared_size.unwrap_or(actual),
    }],
    skipped: Vec::new(),
  })
}

fn extract_archive(bytes: &[u8], limits: &IntakeLimits) -> Result<Intake, RcaError> {
  if !bytes.starts_with(b"PK") {
    return Err(RcaError::corrupt("not a zip archive"));
  }
  let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
    .map_err(|e| RcaError::corrupt(format!("unreadable archive: {}", e)))?;
  if archive.len() > limits.max_archive_members {
    return Err(RcaError::corrupt(format!(
      "archive holds {} entries; limit is {}",
      archive.len(),
      limits.max_archive_members
    )));
  }

  let mut intake = Intake::default();
  let mut total_extracted: u64 = 0;

  for index in 0..archive.len() {
    let mut member = match archive.by_index(index) {
      Ok(m) => m,
      Err(e) => {
        warn!(index, error = %e, "archive member unreadable");
        intake.skipped.push(SkippedInput {
          name: format!("member #{}", index + 1),
          reason: "unreadable member".into(),
        });
        continue;
      }
    };
    if member.is_dir() {
      continue;
    }

    let raw_name = member.name().to_string();
    let name = match member.enclosed_name() {
      Some(path) => path.to_string_lossy().replace('\\', "/"),
      None => {
        intake.skipped.push(skip(&raw_name, "unsafe member path"));
        continue;
      }
    };

    let ext = extension(&name).unwrap_or_default();
    if NESTED_ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
      intake.skipped.push(skip(&name, "nested archives are not accepted"));
      continue;
    }
    if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
      intake.skipped.push(skip(&name, "invalid file type"));
      continue;
    }

    let declared = member.size();
    let compressed = member.compressed_size();
    if compressed > 0 && declared as f64 / compressed as f64 > limits.max_compression_ratio {
      return Err(RcaError::corrupt(format!(
        "member {} exceeds the compression ratio limit",
        name
      )));
    }
    if declared > limits.max_upload_bytes {
      intake.skipped.push(skip(&name, "exceeds size ceiling"));
      continue;
    }

    // Bound the read: the header's size claim is not trusted.
    let mut content = Vec::new();
    let read = (&mut member)
      .take(limits.max_upload_bytes + 1)
      .read_to_end(&mut content);
    if let Err(e) = read {
      warn!(member = %name, error = %e, "archive member could not be extracted");
      intake.skipped.push(skip(&name, "unreadable member"));
      continue;
    }
    let actual = content.len() as u64;
    if actual > limits.max_upload_bytes {
      intake.skipped.push(skip(&name, "exceeds size ceiling"));
      continue;
    }
    if compressed > 0 && actual as f64 / compressed as f64 > limits.max_compression_ratio {
      return Err(RcaError::corrupt(format!(
        "member {} exceeds the compression ratio limit",
        name
      )));
    }
    total_extracted += actual;
    if total_extracted > limits.max_total_extracted_bytes {
      return Err(RcaError::corrupt("total extracted size exceeds limit"));
    }
    if looks_binary(&content) {
      intake.skipped.push(skip(&name, "binary content"));
      continue;
    }

    intake.blobs.push(RawBlob {
      source_name: name,
      content,
      declared_size: declared,
    });
  }

  Ok(intake)
}

fn skip(name: &str, reason: &str) -> SkippedInput {
  debug!(member = name, reason, "archive member skipped");
  SkippedInput {
    name: name.to_string(),
    reason: reason.to_string(),
  }
}

/// Strip directories, traversal sequences and shell-hostile characters.
pub fn sanitize_file_name(name: &str) -> String {
  let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
  let cleaned: String = base
    .chars()
    .filter(|&c| !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') && !c.is_control())
    .collect();
  cleaned.replace("..", "").trim().to_string()
}

fn extension(name: &str) -> Option<String> {
  let (stem, ext) = name.rsplit_once('.')?;
  if stem.is_empty() || ext.is_empty() {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}

fn base_content_type(ct: &str) -> String {
  ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn content_type_allowed(ct: &str) -> bool {
  let base = base_content_type(ct);
  base.is_empty() || ALLOWED_CONTENT_TYPES.contains(&base.as_str())
}

fn looks_binary(bytes: &[u8]) -> bool {
  bytes.iter().take(SNIFF_BYTES).any(|&b| b == 0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;
  use zip::write::SimpleFileOptions;

  fn upload(name: &str, bytes: Vec<u8>) -> Upload {
    Upload {
      file_name: name.into(),
      content_type: None,
      declared_size: None,
      bytes,
    }
  }

  fn zip_of(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in members {
      writer
        .start_file(*name, SimpleFileOptions::default())
        .unwrap();
      writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
  }

  #[test]
  fn accepts_plain_log() {
    let intake = accept(upload("setup.log", b"hello\n".to_vec()), &IntakeLimits::default()).unwrap();
    assert_eq!(intake.blobs.len(), 1);
    assert_eq!(intake.blobs[0].source_name, "setup.log");
    assert!(intake.skipped.is_empty());
  }

  #[test]
  fn rejects_oversized_upload_with_req_002() {
    let limits = IntakeLimits::default();
    let bytes = vec![b'a'; 30 * 1024 * 1024];
    let err = accept(upload("big.log", bytes), &limits).unwrap_err();
    assert_eq!(err.code(), "E.REQ.002");
  }

  #[test]
  fn actual_bytes_win_over_declared_size() {
    let limits = IntakeLimits {
      max_upload_bytes: 10,
      ..IntakeLimits::default()
    };
    let mut up = upload("a.log", vec![b'a'; 11]);
    up.declared_size = Some(5);
    assert_eq!(accept(up, &limits).unwrap_err().code(), "E.REQ.002");

    let mut up = upload("a.log", vec![b'a'; 5]);
    up.declared_size = Some(50);
    assert!(accept(up, &limits).is_ok());
  }

  #[test]
  fn rejects_disallowed_extension() {
    let err = accept(upload("setup.exe", b"MZ".to_vec()), &IntakeLimits::default()).unwrap_err();
    assert_eq!(err.code(), "E.REQ.003");
  }

  #[test]
  fn rejects_bad_content_type() {
    let mut up = upload("setup.log", b"x".to_vec());
    up.content_type = Some("image/png".into());
    assert_eq!(accept(up, &IntakeLimits::default()).unwrap_err().code(), "E.REQ.003");

    let mut up = upload("setup.log", b"x".to_vec());
    up.content_type = Some("text/plain; charset=utf-8".into());
    assert!(accept(up, &IntakeLimits::default()).is_ok());
  }

  #[test]
  fn rejects_binary_text_file() {
    let err = accept(upload("setup.log", vec![0x4d, 0x5a, 0x00, 0x01]), &IntakeLimits::default()).unwrap_err();
    assert_eq!(err.code(), "E.REQ.003");
  }

  #[test]
  fn sanitizes_names() {
    assert_eq!(sanitize_file_name("../../etc/passwd.log"), "passwd.log");
    assert_eq!(sanitize_file_name("C:\\logs\\set<up>.log"), "setup.log");
    assert_eq!(sanitize_file_name("..."), ".");
  }

  #[test]
  fn archive_skips_exe_member_and_keeps_log() {
    let bytes = zip_of(&[
      ("logs/setup.log", &b"2024-01-01T00:00:00 INFO start\n"[..]),
      ("tools/agent.exe", &b"MZ\x90\x00"[..]),
    ]);
    let intake = accept(upload("bundle.zip", bytes), &IntakeLimits::default()).unwrap();
    assert_eq!(intake.blobs.len(), 1);
    assert_eq!(intake.blobs[0].source_name, "logs/setup.log");
    assert_eq!(intake.skipped.len(), 1);
    assert_eq!(intake.skipped[0].name, "tools/agent.exe");
    assert_eq!(intake.skipped[0].reason, "invalid file type");
  }

  #[test]
  fn archive_rejects_nested_archive_member() {
    let inner = zip_of(&[("a.log", &b"x"[..])]);
    let bytes = zip_of(&[("inner.zip", inner.as_slice()), ("b.txt", &b"y"[..])]);
    let intake = accept(upload("bundle.zip", bytes), &IntakeLimits::default()).unwrap();
    assert_eq!(intake.blobs.len(), 1);
    assert_eq!(intake.skipped[0].reason, "nested archives are not accepted");
  }

  #[test]
  fn zip_bomb_is_corrupt_archive() {
    let zeros = vec![b'0'; 2 * 1024 * 1024];
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
      .start_file(
        "bomb.log",
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated),
      )
      .unwrap();
    writer.write_all(&zeros).unwrap();
    let bytes = writer.finish().unwrap().into_inner();

    let err = accept(upload("bundle.zip", bytes), &IntakeLimits::default()).unwrap_err();
    assert_eq!(err.code(), "E.REQ.006");
  }

  #[test]
  fn garbage_zip_is_corrupt_archive() {
    let err = accept(upload("bundle.zip", b"not a zip".to_vec()), &IntakeLimits::default()).unwrap_err();
    assert_eq!(err.code(), "E.REQ.006");

    let err = accept(upload("bundle.zip", b"PK\x03\x04garbage".to_vec()), &IntakeLimits::default()).unwrap_err();
    assert_eq!(err.code(), "E.REQ.006");
  }

  #[test]
  fn member_count_limit_applies() {
    let limits = IntakeLimits {
      max_archive_members: 2,
      ..IntakeLimits::default()
    };
    let bytes = zip_of(&[("a.log", &b"a"[..]), ("b.log", &b"b"[..]), ("c.log", &b"c"[..])]);
    assert_eq!(accept(upload("x.zip", bytes), &limits).unwrap_err().code(), "E.REQ.006");
  }
}
