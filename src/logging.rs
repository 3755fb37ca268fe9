//! Tracing subscriber setup.
//!
//! Output always goes to stderr: the plot worker's stdout carries protocol
//! frames, and the shell's stdout carries the prompt.

use crate::config::Settings;
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` wins, otherwise `level` for this crate.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("galileo={level}")))
}

/// Installs the global subscriber at `level`.
///
/// Calling it twice is harmless; the second call leaves the first subscriber
/// in place.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Installs the global subscriber from `[application] log_level`.
pub fn init_from_config(settings: &Settings) {
    init(&settings.application.log_level);
}
