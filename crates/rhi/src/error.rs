//! Errors raised by the hardware interface.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RhiError {
    /// A Vulkan call returned a failure code.
    #[error("Vulkan call failed: {0}")]
    VulkanError(#[from] vk::Result),

    #[error("Cannot load the Vulkan loader: {0}")]
    LoadingError(#[from] ash::LoadingError),

    #[error("GPU memory allocation failed: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device has a graphics queue that can present to the
    /// surface.
    #[error("No GPU can render and present to this surface")]
    NoSuitableGpu,

    /// SPIR-V that cannot become a shader module.
    #[error("Invalid shader: {0}")]
    ShaderError(String),

    #[error("Surface unusable: {0}")]
    SurfaceError(String),

    #[error("Swapchain unusable: {0}")]
    SwapchainError(String),

    /// A handle or parameter the device does not know or accept.
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineError(String),
}

impl RhiError {
    /// The Vulkan result code behind this error, if any.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::VulkanError(result) => Some(*result),
            _ => None,
        }
    }
}

pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vk_result_is_preserved() {
        let err: RhiError = vk::Result::ERROR_OUT_OF_POOL_MEMORY.into();
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        assert!(RhiError::NoSuitableGpu.vk_result().is_none());
    }
}
