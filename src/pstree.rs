use std::fs;
use std::io;

use log::{debug, error};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Direct children of `parent`, read from the host process table.
///
/// Processes may come and go while the table is walked; entries that
/// vanish in between are skipped.
pub fn list_children(parent: Pid) -> io::Result<Vec<Pid>> {
  let mut children = vec![];

  for entry in fs::read_dir("/proc")? {
    let entry = entry?;
    let pid = match entry.file_name().to_string_lossy().parse::<i32>() {
      Ok(pid) => pid,
      Err(_) => continue,
    };
    let stat = match fs::read_to_string(format!("/proc/{}/stat", pid)) {
      Ok(stat) => stat,
      Err(_) => continue,
    };
    if parse_ppid(&stat) == Some(parent.as_raw()) {
      children.push(Pid::from_raw(pid));
    }
  }

  Ok(children)
}

/// The ppid sits two fields after the parenthesised comm, which itself
/// may contain spaces and closing parentheses.
fn parse_ppid(stat: &str) -> Option<i32> {
  let rest = &stat[stat.rfind(')')? + 1..];
  let mut fields = rest.split_whitespace();
  fields.next();
  fields.next()?.parse().ok()
}

/// Terminate `pid` and all of its transitive descendants.
///
/// Children go first: killing the root first would reparent them under
/// init and leave their pipe write ends open, so the capture would never
/// see EOF.
pub fn kill_tree(pid: Pid) {
  match list_children(pid) {
    Ok(children) => {
      for child in children {
        kill_tree(child);
      }
    }
    Err(err) => {
      error!("Enumerate children of process #{}. fails: {}", pid, err);
    }
  }

  if let Err(errno) = kill(pid, Signal::SIGKILL) {
    // usually the process is simply gone already
    debug!("Kill process #{}. fails: {}", pid, errno);
  }
}

/// Whether the kernel still knows `pid`.
pub fn is_alive(pid: Pid) -> bool {
  match kill(pid, None) {
    Ok(_) => true,
    Err(errno) => errno != Errno::ESRCH,
  }
}
