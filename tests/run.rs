use std::fs;

use log::info;
use nix::unistd::{getgid, getuid};

use watchbox::{run, Request};

mod common;

/// A request running as the current user, so no extra privilege is
/// needed to execute the suite.
fn request(command: &str, stdin: &str, timeout_ms: u64, memory_limit_mb: u64) -> Request {
  Request {
    command: command.to_string(),
    stdin: stdin.to_string(),
    timeout_ms,
    memory_limit_mb,
    uid: getuid().as_raw(),
    gid: getgid().as_raw(),
  }
}

#[test]
fn it_should_echo_stdin() {
  common::setup();

  let verdict = run(&request("cat", "hello", 1000, 64)).unwrap();
  info!("Echo verdict: {:?}", verdict);

  assert_eq!(verdict.exit_code, 0);
  assert_eq!(verdict.stdout, "hello");
  assert_eq!(verdict.stderr, "");
  assert!(!verdict.tle);
  assert!(!verdict.mle);
  assert!(!verdict.ole);
}

#[test]
fn it_should_report_nonzero_exit() {
  common::setup();

  let verdict = run(&request("exit 7", "", 1000, 64)).unwrap();

  assert_eq!(verdict.exit_code, 7);
  assert!(!verdict.tle && !verdict.mle && !verdict.ole);
}

#[test]
fn it_should_report_fatal_signal() {
  common::setup();

  let verdict = run(&request("kill -SEGV $$", "", 1000, 64)).unwrap();

  assert_eq!(verdict.exit_code, 128 + 11);
}

#[test]
fn it_should_kill_on_timeout() {
  common::setup();

  let verdict = run(&request("sleep 5", "", 200, 64)).unwrap();

  assert_eq!(verdict.exit_code, 137);
  assert!(verdict.tle);
  assert!(verdict.time_ms >= 200 && verdict.time_ms < 1000);
}

#[test]
fn it_should_ignore_timeout_when_disabled() {
  common::setup();

  let verdict = run(&request("sleep 1", "", 0, 64)).unwrap();

  assert_eq!(verdict.exit_code, 0);
  assert!(!verdict.tle);
  assert!(verdict.time_ms >= 1000);
}

#[test]
fn it_should_ignore_memory_limit_when_disabled() {
  common::setup();

  // dd holds one 8 MiB block in memory while it copies
  let command = "dd if=/dev/zero bs=8388608 count=1 2>/dev/null | wc -c";
  let verdict = run(&request(command, "", 5000, 0)).unwrap();

  assert_eq!(verdict.exit_code, 0);
  assert_eq!(verdict.stdout.trim(), "8388608");
  assert!(!verdict.mle);
}

#[test]
fn it_should_flag_output_flood() {
  common::setup();

  let verdict = run(&request("yes", "", 2000, 64)).unwrap();

  assert!(verdict.ole);
  assert!(verdict.stdout.ends_with("bytes) exceeded\n"));
  assert_eq!(verdict.exit_code, 137);
}

#[test]
fn it_should_capture_stderr_separately() {
  common::setup();

  let verdict = run(&request("echo out; echo err >&2", "", 1000, 64)).unwrap();

  assert_eq!(verdict.exit_code, 0);
  assert_eq!(verdict.stdout, "out\n");
  assert_eq!(verdict.stderr, "err\n");
}

#[test]
fn it_should_stream_large_stdin() {
  common::setup();

  let payload = "x".repeat(256 * 1024);
  let verdict = run(&request("wc -c", &payload, 5000, 64)).unwrap();

  assert_eq!(verdict.exit_code, 0);
  assert_eq!(verdict.stdout.trim(), format!("{}", 256 * 1024));
  assert!(!verdict.ole);
}

#[test]
fn it_should_survive_a_child_ignoring_stdin() {
  common::setup();

  let payload = "x".repeat(256 * 1024);
  let verdict = run(&request("true", &payload, 2000, 64)).unwrap();

  assert_eq!(verdict.exit_code, 0);
}

#[test]
fn it_should_contain_background_children() {
  common::setup();

  let verdict = run(&request("sleep 7201 & sleep 7201 & sleep 7201", "", 200, 64)).unwrap();

  assert!(verdict.tle);
  assert!(verdict.time_ms >= 200 && verdict.time_ms < 2000);

  // nothing of the killed tree survives, not even reparented sleepers
  for entry in fs::read_dir("/proc").unwrap() {
    let entry = entry.unwrap();
    if entry.file_name().to_string_lossy().parse::<i32>().is_err() {
      continue;
    }
    if let Ok(cmdline) = fs::read(entry.path().join("cmdline")) {
      let cmdline = String::from_utf8_lossy(&cmdline).replace('\0', " ");
      assert!(!cmdline.contains("sleep 7201"), "orphan survived: {}", cmdline);
    }
  }
}
