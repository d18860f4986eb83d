use serde::Serialize;

use crate::error::WatchBoxError;

/// What the supervisor reports back for one request.
///
/// The three limit flags are independent; several may be true at once.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
  /// Child exit status, `128 + signal` when signaled, `-1` otherwise
  pub exit_code: i32,
  pub stdout: String,
  pub stderr: String,
  /// Wall clock from just before the fork to the reap
  #[serde(rename = "timeMS")]
  pub time_ms: u64,
  /// Peak sampled memory
  #[serde(rename = "memoryKB")]
  pub memory_kb: u64,
  #[serde(rename = "TLE")]
  pub tle: bool,
  #[serde(rename = "MLE")]
  pub mle: bool,
  #[serde(rename = "OLE")]
  pub ole: bool,
}

impl Verdict {
  /// Pretty JSON with the four-space indent the judge expects.
  pub fn to_json(&self) -> Result<String, WatchBoxError> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    self.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn it_prints_the_judge_document() {
    let verdict = Verdict {
      exit_code: 0,
      stdout: "hi\n".to_string(),
      stderr: String::new(),
      time_ms: 12,
      memory_kb: 340,
      tle: false,
      mle: false,
      ole: false,
    };

    let expected = concat!(
      "{\n",
      "    \"exit_code\": 0,\n",
      "    \"stdout\": \"hi\\n\",\n",
      "    \"stderr\": \"\",\n",
      "    \"timeMS\": 12,\n",
      "    \"memoryKB\": 340,\n",
      "    \"TLE\": false,\n",
      "    \"MLE\": false,\n",
      "    \"OLE\": false\n",
      "}",
    );
    assert_eq!(verdict.to_json().unwrap(), expected);
  }

  #[test]
  fn it_keeps_the_flags_independent() {
    let verdict = Verdict {
      exit_code: 137,
      stdout: String::new(),
      stderr: String::new(),
      time_ms: 431,
      memory_kb: 70000,
      tle: true,
      mle: true,
      ole: true,
    };

    let text = verdict.to_json().unwrap();
    assert!(text.contains("\"TLE\": true"));
    assert!(text.contains("\"MLE\": true"));
    assert!(text.contains("\"OLE\": true"));
    assert!(text.contains("\"exit_code\": 137"));
  }
}
