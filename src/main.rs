#![allow(dead_code)]

use std::env;
use std::io;
use std::path::PathBuf;

use clap::Parser;
use flexi_logger::{FileSpec, Logger};
use log::{error, info};

use crate::error::{WatchBoxError, WatchBoxExit};
use crate::request::Request;
use crate::utils::default_format;
use crate::watchbox::run;

mod error;
mod monitor;
mod pipe;
mod pstree;
mod request;
mod sink;
mod utils;
mod verdict;
mod watchbox;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[arg(help = "Request file [default: read the request from stdin]")]
  request: Option<PathBuf>,
}

fn bootstrap() -> Result<(), WatchBoxError> {
  Logger::try_with_str("watchbox=info")?
    .log_to_file(
      FileSpec::default()
        .directory(env::var("WATCHBOX_LOG").unwrap_or("./logs/".into()))
        .basename("watchbox")
        .discriminant(format!(
          "{}",
          chrono::offset::Local::now().format("%Y-%m-%d")
        ))
        .suppress_timestamp(),
    )
    .append()
    .format_for_files(default_format)
    .start()?;

  info!("Start running watchbox");

  let cli = Cli::parse();
  let request = match &cli.request {
    Some(path) => Request::from_file(path)?,
    None => Request::from_reader(io::stdin().lock())?,
  };

  let verdict = match run(&request) {
    Ok(verdict) => verdict,
    Err(err) => {
      error!("Running watchbox failed: {}", err);
      return Err(err);
    }
  };

  println!("{}", verdict.to_json()?);
  info!("Running watchbox finished");

  Ok(())
}

fn main() -> WatchBoxExit {
  match bootstrap() {
    Ok(_) => WatchBoxExit::Ok,
    Err(err) => WatchBoxExit::Err(err),
  }
}
