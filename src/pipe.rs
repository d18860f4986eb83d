use std::os::unix::prelude::RawFd;

use nix::fcntl::OFlag;
use nix::unistd::{close, pipe2};

use crate::error::WatchBoxError;

/// One pipe, created before the fork so both sides see both ends.
///
/// The descriptors are close-on-exec; the child's `dup2` onto the
/// standard streams clears the flag on the duplicates, so only the
/// wiring descriptors disappear across `exec`.
pub struct WatchBoxPipe(RawFd, RawFd);

impl WatchBoxPipe {
  pub fn new() -> Result<Self, WatchBoxError> {
    let (read, write) = pipe2(OFlag::O_CLOEXEC)?;
    Ok(WatchBoxPipe(read, write))
  }

  pub fn reader(&self) -> RawFd {
    self.0
  }

  pub fn writer(&self) -> RawFd {
    self.1
  }

  /// Keep the read end, close the write end.
  pub fn into_reader(self) -> Result<RawFd, WatchBoxError> {
    close(self.1)?;
    Ok(self.0)
  }

  /// Keep the write end, close the read end.
  pub fn into_writer(self) -> Result<RawFd, WatchBoxError> {
    close(self.0)?;
    Ok(self.1)
  }
}
