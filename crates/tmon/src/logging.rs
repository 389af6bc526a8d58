//! Logging setup.
//!
//! Interactive output owns stdout, so logs are appended to
//! `$XDG_STATE_HOME/tmon/tmon.log` (or `~/.local/state/tmon/tmon.log`).
//! When no log file can be opened, warnings and errors go to stderr.

use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "tmon.log";

/// Directory holding the log file.
pub fn log_dir() -> Option<PathBuf> {
    if let Some(xdg_state) = std::env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg_state).join("tmon"));
    }
    dirs::home_dir().map(|home| home.join(".local").join("state").join("tmon"))
}

fn create_log_file() -> Option<(File, PathBuf)> {
    let log_dir = log_dir()?;

    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Failed to create log directory {log_dir:?}: {e}");
        return None;
    }

    let log_path = log_dir.join(LOG_FILE_NAME);
    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => Some((file, log_path)),
        Err(e) => {
            eprintln!("Warning: Failed to open log file {log_path:?}: {e}");
            None
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` refines the default
/// `tmon=info` filter.
///
/// Returns the log file path when logging to a file.
pub fn init() -> Option<PathBuf> {
    match create_log_file() {
        Some((file, path)) => {
            let directive = "tmon=info"
                .parse()
                .unwrap_or_else(|_| Directive::from(tracing::Level::INFO));
            let filter = EnvFilter::from_default_env().add_directive(directive);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
            Some(path)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("warn"))
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
