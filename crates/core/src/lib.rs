//! Core utilities shared by the lumen crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::{DEFAULT_LOG_FILTER, init_logging, try_init_logging};
pub use timer::Timer;
