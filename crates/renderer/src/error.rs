//! Renderer error types.

use lumen_rhi::RhiError;
use thiserror::Error;

/// Error type for render passes, caches and the frame loop.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Invalid attachments, exhausted descriptor pool, foreign handles or
    /// invalid settings. Not recoverable by retrying the same call.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A GPU object could not be created.
    #[error("Failed to create {object}: {source}")]
    ObjectCreation {
        object: &'static str,
        #[source]
        source: RhiError,
    },

    #[error(transparent)]
    Rhi(#[from] RhiError),
}

impl RenderError {
    /// Adapter for `map_err` naming the object that failed to be created.
    pub(crate) fn creating(object: &'static str) -> impl FnOnce(RhiError) -> Self {
        move |source| Self::ObjectCreation { object, source }
    }
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
