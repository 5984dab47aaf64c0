//! Logging setup for the plugin process.
//!
//! All logs go to **stderr**: stdout carries the handshake line the host
//! engine parses, and nothing else may be written there. Filtering follows
//! the `RUST_LOG` environment variable (e.g. `info`, `debug`,
//! `skiff_provider=debug`), with a configurable fallback level when it is
//! unset.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with `info` as the fallback level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set; use
/// [`try_init_logging`] where that is a possibility.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom fallback level used when `RUST_LOG` is
/// not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    if !try_init_with(default_level) {
        panic!("a global tracing subscriber is already set");
    }
}

/// Try to initialize logging; returns `false` if a subscriber was already
/// set instead of panicking.
pub fn try_init_logging() -> bool {
    try_init_with("info")
}

fn try_init_with(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .is_ok()
}
