use std::fs;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::error::WatchBoxError;

/// One supervision request, as handed over by the judge.
///
/// Every key is required; a missing key is a setup error reported before
/// anything is forked, not a verdict.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
  /// Shell command line, run through `/bin/sh -c`
  pub command: String,
  /// Bytes delivered on the child's standard input
  pub stdin: String,
  /// Wall-clock cap in milliseconds, 0 disables
  #[serde(rename = "timeoutMS")]
  pub timeout_ms: u64,
  /// Memory cap in MiB, 0 disables
  #[serde(rename = "memoryLimitMB")]
  pub memory_limit_mb: u64,
  /// Credentials the child assumes, group first
  pub uid: u32,
  pub gid: u32,
}

impl Request {
  pub fn from_file(path: &Path) -> Result<Request, WatchBoxError> {
    let text = fs::read_to_string(path)?;
    Request::from_json(&text)
  }

  /// Read the whole request document until EOF, e.g. from stdin.
  pub fn from_reader<R: Read>(mut reader: R) -> Result<Request, WatchBoxError> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    Request::from_json(&text)
  }

  pub fn from_json(text: &str) -> Result<Request, WatchBoxError> {
    Ok(serde_json::from_str(text)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_parses_a_full_request() {
    let request = Request::from_json(
      r#"{
        "command": "cat",
        "stdin": "hello",
        "timeoutMS": 1000,
        "memoryLimitMB": 64,
        "uid": 1000,
        "gid": 1000
      }"#,
    )
    .unwrap();

    assert_eq!(request.command, "cat");
    assert_eq!(request.stdin, "hello");
    assert_eq!(request.timeout_ms, 1000);
    assert_eq!(request.memory_limit_mb, 64);
    assert_eq!(request.uid, 1000);
    assert_eq!(request.gid, 1000);
  }

  #[test]
  fn it_rejects_a_missing_key() {
    let err = Request::from_json(r#"{"command": "cat", "stdin": ""}"#).unwrap_err();
    assert!(format!("{}", err).contains("missing field"));
  }

  #[test]
  fn it_rejects_garbage() {
    assert!(Request::from_json("not a request").is_err());
  }

  #[test]
  fn it_reads_from_a_reader() {
    let doc = r#"{"command":"true","stdin":"","timeoutMS":0,"memoryLimitMB":0,"uid":0,"gid":0}"#;
    let request = Request::from_reader(doc.as_bytes()).unwrap();
    assert_eq!(request.command, "true");
    assert_eq!(request.timeout_ms, 0);
  }
}
