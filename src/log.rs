//! Logging setup for planforge.
//!
//! All modules log through `tracing`. This module installs the subscriber:
//! - output goes to `~/.planforge/planforge.log` (truncated on startup), or
//!   to stderr when no home directory is available
//! - the default level is INFO, DEBUG when `--debug` or `PLANFORGE_DEBUG=1`
//! - `RUST_LOG` overrides both

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

pub const DEBUG_ENV: &str = "PLANFORGE_DEBUG";

/// Initialize logging with explicit debug mode setting.
pub fn init_with_debug(debug: bool) {
    let log_dir = dirs::home_dir().map(|h| h.join(".planforge"));
    init_in(debug, log_dir.as_deref());
}

/// Initialize logging into `dir/planforge.log`.
///
/// Calling this more than once is harmless; only the first call installs
/// a subscriber.
pub fn init_in(debug: bool, dir: Option<&Path>) {
    let default_directive = if debug || env_debug() {
        "planforge=debug"
    } else {
        "planforge=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false);

    match dir.and_then(open_log_file) {
        Some(file) => {
            let _ = builder.with_writer(Mutex::new(file)).try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}

pub fn log_path(dir: &Path) -> PathBuf {
    dir.join("planforge.log")
}

fn env_debug() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn open_log_file(dir: &Path) -> Option<File> {
    std::fs::create_dir_all(dir).ok()?;
    // Truncate file on startup
    File::create(log_path(dir)).ok()
}
