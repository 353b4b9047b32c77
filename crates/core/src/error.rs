//! Application-level error type.

use thiserror::Error;

/// Error type for code gluing the engine to its host application.
///
/// GPU-side failures carry their own error types (`RhiError`, `RenderError`);
/// this type covers the collaborators around them.
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors surfaced outside the RHI layer
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Logging could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias using the core [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
