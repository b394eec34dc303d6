use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Where a binary sends its log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    /// A plain-text log file. Without `append` the file is truncated first.
    File { path: PathBuf, append: bool },
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` level.
/// Must be called at most once per process.
pub fn setup_tracing(target: &LogTarget) -> io::Result<()> {
    match target {
        LogTarget::Stdout => {
            let log_layer = tracing_subscriber::fmt::layer().with_filter(env_filter());
            tracing_subscriber::registry().with(log_layer).init();
        }
        LogTarget::File { path, append } => {
            let file = open_log_file(path, *append)?;
            let log_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(env_filter());
            tracing_subscriber::registry().with(log_layer).init();
        }
    }
    Ok(())
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(path: &Path, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path)
}
