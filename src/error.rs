use std::{
  error::Error,
  fmt::{Debug, Display},
  process::{ExitCode, Termination},
};

use flexi_logger::FlexiLoggerError;
use nix::{errno::Errno, libc::STDOUT_FILENO, unistd::isatty};

pub enum WatchBoxError {
  Request(String),
  Fork(String),
  Thread(String),
  Nix(Errno),
  Fs(String),
  Logger(FlexiLoggerError),
}

pub enum WatchBoxExit {
  Ok,
  Err(WatchBoxError),
}

impl WatchBoxError {
  pub fn request<MS: Into<String>>(msg: MS) -> WatchBoxError {
    WatchBoxError::Request(msg.into())
  }

  pub fn fork<MS: Into<String>>(msg: MS) -> WatchBoxError {
    WatchBoxError::Fork(msg.into())
  }

  pub fn thread<MS: Into<String>>(msg: MS) -> WatchBoxError {
    WatchBoxError::Thread(msg.into())
  }
}

impl Debug for WatchBoxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&self, f)
  }
}

impl Display for WatchBoxError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self {
      WatchBoxError::Request(msg) => f.write_fmt(format_args!("WatchBox Request Error: {}", msg)),
      WatchBoxError::Fork(msg) => f.write_fmt(format_args!("WatchBox Fork Error: {}", msg)),
      WatchBoxError::Thread(msg) => f.write_fmt(format_args!("WatchBox Thread Error: {}", msg)),
      WatchBoxError::Nix(errno) => f.write_fmt(format_args!("WatchBox Nix Error: {}", errno)),
      WatchBoxError::Fs(msg) => f.write_fmt(format_args!("WatchBox File System Error: {}", msg)),
      WatchBoxError::Logger(err) => f.write_fmt(format_args!("WatchBox Logger Error: {}", err)),
    }
  }
}

impl From<Errno> for WatchBoxError {
  fn from(errno: Errno) -> Self {
    WatchBoxError::Nix(errno)
  }
}

impl From<std::io::Error> for WatchBoxError {
  fn from(err: std::io::Error) -> Self {
    WatchBoxError::Fs(err.to_string())
  }
}

impl From<serde_json::Error> for WatchBoxError {
  fn from(err: serde_json::Error) -> Self {
    WatchBoxError::Request(err.to_string())
  }
}

impl From<FlexiLoggerError> for WatchBoxError {
  fn from(err: FlexiLoggerError) -> Self {
    WatchBoxError::Logger(err)
  }
}

impl Error for WatchBoxError {}

impl Termination for WatchBoxExit {
  fn report(self) -> ExitCode {
    match self {
      WatchBoxExit::Ok => ExitCode::SUCCESS.report(),
      WatchBoxExit::Err(err) => {
        let text = format!("{}", err);
        let text = match text.split_once(": ") {
          Some((prefix, message)) => {
            let is_tty = isatty(STDOUT_FILENO).unwrap_or(false);
            if is_tty {
              format!("\x1b[1m\x1b[91m{}\x1b[39m\x1b[22m  {}", prefix, message)
            } else {
              format!(
                "{{\n  \"ok\": false,\n  \"type\": \"{}\",\n  \"message\": \"{}\"\n}}",
                prefix, message
              )
            }
          }
          None => {
            format!("{}", err)
          }
        };
        eprintln!("{}", text);
        ExitCode::FAILURE.report()
      }
    }
  }
}
