use std::ffi::CString;
use std::os::unix::prelude::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{error, info, warn};
use nix::errno::Errno;
use nix::libc;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, dup2, execv, fork, setgid, setuid, write, ForkResult, Gid, Pid, Uid};

use crate::error::WatchBoxError;
use crate::monitor::{deadline_loop, monitor_loop, MemorySampler, StreamPump};
use crate::pipe::WatchBoxPipe;
use crate::pstree::kill_tree;
use crate::request::Request;
use crate::sink::BoundedBuffer;
use crate::utils::into_c_string;
use crate::verdict::Verdict;

/// Useful payload per captured stream; the sink capacity adds headroom
/// for the overflow marker on top, so at least this many bytes survive
/// truncation.
const MAX_STDOUT_LENGTH: usize = 4096;
const MAX_STDERR_LENGTH: usize = 4096;
const MARKER_HEADROOM: usize = 100;

/// Supervise one command: fork it behind three pipes, feed its stdin,
/// watch time, memory and output, and assemble the verdict.
///
/// Errors before the fork are setup failures and surface to the caller;
/// once the child exists every outcome is expressed in the verdict.
pub fn run(request: &Request) -> Result<Verdict, WatchBoxError> {
  let command = CString::new(request.command.as_str())
    .map_err(|_| WatchBoxError::request("command must not contain NUL bytes"))?;

  let stdin_pipe = WatchBoxPipe::new()?;
  let stdout_pipe = WatchBoxPipe::new()?;
  let stderr_pipe = WatchBoxPipe::new()?;

  let start = Instant::now();

  match unsafe { fork() } {
    Ok(ForkResult::Parent { child, .. }) => {
      info!("Forked child process #{}.", child);
      parent(request, child, start, stdin_pipe, stdout_pipe, stderr_pipe)
    }
    Ok(ForkResult::Child) => child_exec(request, &command, stdin_pipe, stdout_pipe, stderr_pipe),
    Err(errno) => {
      for pipe in [stdin_pipe, stdout_pipe, stderr_pipe] {
        let _ = close(pipe.reader());
        let _ = close(pipe.writer());
      }
      Err(WatchBoxError::fork(format!("Fork failed: {}", errno)))
    }
  }
}

/// Child branch: wire the pipes onto the standard streams, drop
/// privileges, exec the shell.
///
/// Never returns. Failures are written to the already redirected stderr
/// so the judge finds the cause in the verdict's stderr capture.
fn child_exec(
  request: &Request,
  command: &CString,
  stdin_pipe: WatchBoxPipe,
  stdout_pipe: WatchBoxPipe,
  stderr_pipe: WatchBoxPipe,
) -> ! {
  if let Err(errno) = wire_stdio(&stdin_pipe, &stdout_pipe, &stderr_pipe) {
    child_fail("dup2 failed", errno);
  }

  // group first: after setuid the process may no longer change groups
  if let Err(errno) = setgid(Gid::from_raw(request.gid)) {
    child_fail("setgid failed", errno);
  }
  if let Err(errno) = setuid(Uid::from_raw(request.uid)) {
    child_fail("setuid failed", errno);
  }

  let shell = into_c_string("/bin/sh");
  let argv = [into_c_string("sh"), into_c_string("-c"), command.clone()];
  let errno = execv(&shell, &argv).unwrap_err();
  child_fail("execv /bin/sh failed", errno);
}

fn wire_stdio(
  stdin_pipe: &WatchBoxPipe,
  stdout_pipe: &WatchBoxPipe,
  stderr_pipe: &WatchBoxPipe,
) -> Result<(), Errno> {
  dup2(stdin_pipe.reader(), libc::STDIN_FILENO)?;
  dup2(stdout_pipe.writer(), libc::STDOUT_FILENO)?;
  dup2(stderr_pipe.writer(), libc::STDERR_FILENO)?;

  let wiring = [
    stdin_pipe.reader(),
    stdin_pipe.writer(),
    stdout_pipe.reader(),
    stdout_pipe.writer(),
    stderr_pipe.reader(),
    stderr_pipe.writer(),
  ];
  for fd in wiring {
    let _ = close(fd);
  }

  Ok(())
}

/// Report on the redirected stderr and die with status 1.
fn child_fail(what: &str, errno: Errno) -> ! {
  let message = format!("{}: {}\n", what, errno);
  let _ = write(libc::STDERR_FILENO, message.as_bytes());
  unsafe { libc::_exit(1) }
}

/// Parent branch: deliver stdin, wait out the child under the two
/// monitoring threads, drain the pipes, build the verdict.
fn parent(
  request: &Request,
  child: Pid,
  start: Instant,
  stdin_pipe: WatchBoxPipe,
  stdout_pipe: WatchBoxPipe,
  stderr_pipe: WatchBoxPipe,
) -> Result<Verdict, WatchBoxError> {
  let stdin_fd = match stdin_pipe.into_writer() {
    Ok(fd) => fd,
    Err(err) => return abandon(child, err),
  };
  let stdout_fd = match stdout_pipe.into_reader() {
    Ok(fd) => fd,
    Err(err) => return abandon(child, err),
  };
  let stderr_fd = match stderr_pipe.into_reader() {
    Ok(fd) => fd,
    Err(err) => return abandon(child, err),
  };

  let finished = Arc::new(AtomicBool::new(false));

  let deadline = {
    let finished = Arc::clone(&finished);
    let timeout_ms = request.timeout_ms;
    thread::spawn(move || deadline_loop(child, start, timeout_ms, finished))
  };

  let monitor = {
    let finished = Arc::clone(&finished);
    let stdout_sink = BoundedBuffer::new(MAX_STDOUT_LENGTH + MARKER_HEADROOM);
    let stderr_sink = BoundedBuffer::new(MAX_STDERR_LENGTH + MARKER_HEADROOM);
    let sampler = MemorySampler::new(request.memory_limit_mb);
    thread::spawn(move || {
      monitor_loop(
        stdout_fd, stderr_fd, stdout_sink, stderr_sink, sampler, finished,
      )
    })
  };

  deliver_stdin(stdin_fd, request.stdin.as_bytes());
  if let Err(errno) = close(stdin_fd) {
    warn!("Close stdin pipe fails: {}", errno);
  }

  let status = match waitpid(child, None) {
    Ok(status) => Some(status),
    Err(errno) => {
      error!("Wait for child process #{}. fails: {}", child, errno);
      kill_tree(child);
      None
    }
  };
  let time_ms = start.elapsed().as_millis() as u64;

  finished.store(true, Ordering::SeqCst);
  let outcome = monitor
    .join()
    .map_err(|_| WatchBoxError::thread("Monitor thread panicked"))?;
  deadline
    .join()
    .map_err(|_| WatchBoxError::thread("Deadline thread panicked"))?;

  let mut stdout_sink = outcome.stdout;
  let mut stderr_sink = outcome.stderr;
  let mut ole = outcome.ole;

  if StreamPump::new(stdout_fd).drain(&mut stdout_sink) {
    ole = true;
  }
  if StreamPump::new(stderr_fd).drain(&mut stderr_sink) {
    ole = true;
  }

  if let Err(errno) = close(stdout_fd) {
    warn!("Close stdout pipe fails: {}", errno);
  }
  if let Err(errno) = close(stderr_fd) {
    warn!("Close stderr pipe fails: {}", errno);
  }

  let exit_code = match status {
    Some(WaitStatus::Exited(pid, code)) => {
      info!("Child process #{}. exited with status {}", pid, code);
      code
    }
    Some(WaitStatus::Signaled(pid, signal, _)) => {
      info!("Child process #{}. is signaled by {}", pid, signal);
      128 + signal as i32
    }
    Some(status) => {
      warn!("Child process #{}. ended in unexpected state {:?}", child, status);
      -1
    }
    None => -1,
  };

  let memory_kb = outcome.peak_memory / 1024;
  let verdict = Verdict {
    exit_code,
    stdout: stdout_sink.into_string(),
    stderr: stderr_sink.into_string(),
    time_ms,
    memory_kb,
    tle: request.timeout_ms > 0 && time_ms >= request.timeout_ms,
    mle: request.memory_limit_mb > 0 && memory_kb / 1024 >= request.memory_limit_mb,
    ole,
  };

  info!(
    "Verdict: exit_code={} timeMS={} memoryKB={} TLE={} MLE={} OLE={}",
    verdict.exit_code, verdict.time_ms, verdict.memory_kb, verdict.tle, verdict.mle, verdict.ole
  );

  Ok(verdict)
}

/// Best-effort terminate and reap before surfacing a post-fork setup
/// failure, so the child cannot outlive the supervisor.
fn abandon(child: Pid, err: WatchBoxError) -> Result<Verdict, WatchBoxError> {
  kill_tree(child);
  if let Err(errno) = waitpid(child, None) {
    warn!("Reap abandoned child process #{}. fails: {}", child, errno);
  }
  Err(err)
}

/// Push the request's input through the pipe, handling short writes.
///
/// The write blocks when the child's input buffer is full; that is the
/// intended back-pressure. A failed write means the child stopped
/// reading, which only ends the delivery.
fn deliver_stdin(fd: RawFd, bytes: &[u8]) {
  let mut offset = 0;
  while offset < bytes.len() {
    match write(fd, &bytes[offset..]) {
      Ok(count) => offset += count,
      Err(Errno::EINTR) => continue,
      Err(errno) => {
        warn!("Write to child stdin fails after {} bytes: {}", offset, errno);
        break;
      }
    }
  }
}
