use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::prelude::RawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::{read, Pid};

use crate::pstree::{is_alive, kill_tree};
use crate::sink::{Append, BoundedBuffer};

/// Read chunk for both pipe pumps
const PUMP_BUF_SIZE: usize = 4096;

/// Fine tick: keeps the kernel pipe buffers drained and bounds how much
/// memory a fast allocator can grab between two samples
const MONITOR_TICK: Duration = Duration::from_millis(10);

/// Coarse tick: the deadline only needs tens-of-milliseconds accuracy
const DEADLINE_TICK: Duration = Duration::from_millis(50);

/// cgroup v2 current-memory counter of the cgroup this process runs in
pub const MEMORY_CURRENT: &str = "/sys/fs/cgroup/memory.current";

/// Non-blocking drain of one pipe read end into a bounded buffer.
pub struct StreamPump {
  fd: RawFd,
  eof: bool,
}

impl StreamPump {
  pub fn new(fd: RawFd) -> Self {
    StreamPump { fd, eof: false }
  }

  /// One zero-timeout poll plus at most one read.
  ///
  /// End-of-stream is a benign stop; `Overflow` means the sink froze and
  /// the shared shutdown flag should be raised.
  pub fn tick(&mut self, sink: &mut BoundedBuffer) -> Append {
    if self.eof {
      return Append::Complete;
    }

    let mut fds = [PollFd::new(self.fd, PollFlags::POLLIN)];
    match poll(&mut fds, 0) {
      Ok(0) => return Append::Complete,
      Ok(_) => {}
      Err(errno) => {
        warn!("Poll on fd {} fails: {}", self.fd, errno);
        return Append::Complete;
      }
    }

    let mut buf = [0u8; PUMP_BUF_SIZE];
    match read(self.fd, &mut buf) {
      Ok(0) => {
        self.eof = true;
        Append::Complete
      }
      Ok(count) => sink.append(&buf[..count]),
      Err(errno) => {
        warn!("Read from fd {} fails: {}", self.fd, errno);
        Append::Complete
      }
    }
  }

  /// Blocking read to end-of-stream, used once the child tree is gone.
  ///
  /// Returns true when the sink overflowed while draining.
  pub fn drain(&mut self, sink: &mut BoundedBuffer) -> bool {
    let mut buf = [0u8; PUMP_BUF_SIZE];
    loop {
      match read(self.fd, &mut buf) {
        Ok(0) => return false,
        Ok(count) => {
          if sink.append(&buf[..count]) == Append::Overflow {
            return true;
          }
        }
        Err(errno) => {
          warn!("Drain from fd {} fails: {}", self.fd, errno);
          return false;
        }
      }
    }
  }
}

/// Periodic reader of the kernel's current-memory counter.
///
/// The counter file belongs to the cgroup the judge placed this process
/// in. When the file is missing the sampler reports zero and never trips
/// the limit; providing the cgroup is the caller's job.
pub struct MemorySampler {
  file: Option<File>,
  limit_bytes: u64,
  peak: u64,
}

impl MemorySampler {
  pub fn new(limit_mb: u64) -> Self {
    Self::open(Path::new(MEMORY_CURRENT), limit_mb)
  }

  pub fn open(path: &Path, limit_mb: u64) -> Self {
    let file = match File::open(path) {
      Ok(file) => Some(file),
      Err(err) => {
        warn!("Open {} fails: {}", path.display(), err);
        None
      }
    };

    MemorySampler {
      file,
      limit_bytes: limit_mb * 1024 * 1024,
      peak: 0,
    }
  }

  /// Re-read the counter from the start; true when the configured limit
  /// is exceeded.
  pub fn sample(&mut self) -> bool {
    let file = match &mut self.file {
      Some(file) => file,
      None => return false,
    };

    let mut text = String::new();
    let reread = file
      .seek(SeekFrom::Start(0))
      .and_then(|_| file.read_to_string(&mut text));
    if let Err(err) = reread {
      warn!("Read memory counter fails: {}", err);
      return false;
    }

    let current = match text.trim().parse::<u64>() {
      Ok(value) => value,
      Err(_) => return false,
    };

    if current > self.peak {
      self.peak = current;
    }

    self.limit_bytes > 0 && current > self.limit_bytes
  }

  pub fn peak(&self) -> u64 {
    self.peak
  }
}

/// Everything the monitor thread hands back through its join.
pub struct MonitorOutcome {
  pub stdout: BoundedBuffer,
  pub stderr: BoundedBuffer,
  pub peak_memory: u64,
  pub ole: bool,
}

/// Fused sampler and pump loop, one pass every 10 ms.
///
/// A memory trip or a sink overflow requests shutdown through
/// `finished`; only a stdout overflow is an output-limit verdict, stderr
/// overflow just ends the capture.
pub fn monitor_loop(
  stdout_fd: RawFd,
  stderr_fd: RawFd,
  mut stdout_sink: BoundedBuffer,
  mut stderr_sink: BoundedBuffer,
  mut sampler: MemorySampler,
  finished: Arc<AtomicBool>,
) -> MonitorOutcome {
  let mut stdout_pump = StreamPump::new(stdout_fd);
  let mut stderr_pump = StreamPump::new(stderr_fd);
  let mut ole = false;

  while !finished.load(Ordering::SeqCst) {
    if sampler.sample() {
      info!("Memory limit exceeded, request shutdown");
      finished.store(true, Ordering::SeqCst);
      break;
    }

    if stdout_pump.tick(&mut stdout_sink) == Append::Overflow {
      info!("Stdout capture overflowed, request shutdown");
      ole = true;
      finished.store(true, Ordering::SeqCst);
      break;
    }

    if stderr_pump.tick(&mut stderr_sink) == Append::Overflow {
      info!("Stderr capture overflowed, request shutdown");
      finished.store(true, Ordering::SeqCst);
      break;
    }

    thread::sleep(MONITOR_TICK);
  }

  MonitorOutcome {
    stdout: stdout_sink,
    stderr: stderr_sink,
    peak_memory: sampler.peak(),
    ole,
  }
}

/// Wall-clock watchdog, one pass every 50 ms.
///
/// A zero timeout disables the deadline and the loop just waits for the
/// reap to raise `finished`. Whatever ended the loop, a still-alive
/// child tree is terminated before the thread exits.
pub fn deadline_loop(child: Pid, start: Instant, timeout_ms: u64, finished: Arc<AtomicBool>) {
  while !finished.load(Ordering::SeqCst) {
    if timeout_ms > 0 && start.elapsed().as_millis() as u64 >= timeout_ms {
      info!("Time limit exceeded, kill process tree #{}.", child);
      finished.store(true, Ordering::SeqCst);
      kill_tree(child);
      break;
    }
    thread::sleep(DEADLINE_TICK);
  }

  if is_alive(child) {
    kill_tree(child);
  }
}
