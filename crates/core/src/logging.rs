//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{Error, Result};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info,lumen=debug";

/// Initialize the logging system with tracing.
///
/// Sets up tracing-subscriber with an environment filter (`RUST_LOG`, falling
/// back to [`DEFAULT_LOG_FILTER`]) and a formatting layer that prints targets
/// and thread ids.
///
/// # Panics
///
/// Panics if a global subscriber is already installed. Use
/// [`try_init_logging`] when that can happen (tests, embedding hosts).
///
/// # Example
/// ```
/// lumen_core::init_logging();
/// tracing::info!("Renderer initialized");
/// ```
pub fn init_logging() {
    if let Err(e) = try_init_logging() {
        panic!("{e}");
    }
}

/// Same as [`init_logging`], but reports an already-installed subscriber as
/// an error instead of panicking.
pub fn try_init_logging() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
