use std::path::PathBuf;

use clap::Parser;
use kiosk_common::logging::LogTarget;

/// File the `--logs` flag writes to, in the working directory.
pub const LOG_FILE: &str = "pipeline_logs.log";

#[derive(Parser, Debug)]
#[command(version, about = "Import historical kiosk data into the museum database", long_about = None)]
pub struct Cli {
    /// S3 bucket holding the kiosk CSV exports
    #[arg(short, long, required_unless_present = "csv", conflicts_with = "csv")]
    pub bucket: Option<String>,

    /// Read a local CSV file instead of downloading from S3
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Import at most this many records
    #[arg(long)]
    pub limit: Option<usize>,

    /// Write logs to pipeline_logs.log instead of stdout
    #[arg(long)]
    pub logs: bool,

    /// Keep the existing tables and rows instead of recreating the schema
    #[arg(long)]
    pub skip_reset: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Bucket(&'a str),
    File(&'a PathBuf),
}

impl Cli {
    /// `None` only when the arguments were built without going through the parser.
    pub fn input(&self) -> Option<Input<'_>> {
        match (&self.csv, &self.bucket) {
            (Some(path), _) => Some(Input::File(path)),
            (None, Some(bucket)) => Some(Input::Bucket(bucket)),
            (None, None) => None,
        }
    }

    pub fn log_target(&self) -> LogTarget {
        if self.logs {
            LogTarget::File {
                path: PathBuf::from(LOG_FILE),
                append: false,
            }
        } else {
            LogTarget::Stdout
        }
    }
}
