//! Renderer configuration.

use ash::vk;
use lumen_rhi::swapchain::SwapchainPreferences;

use crate::depth_buffer::{DEFAULT_DEPTH_FORMAT, is_depth_format};
use crate::error::{RenderError, RenderResult};

/// Default number of frames the CPU may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Sizing of the pool a [`DescriptorManager`](crate::DescriptorManager)
/// allocates sets from.
#[derive(Clone, Debug)]
pub struct DescriptorPoolConfig {
    pub max_sets: u32,
    pub pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        let size = |ty, descriptor_count| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        };
        Self {
            max_sets: 64,
            pool_sizes: vec![
                size(vk::DescriptorType::UNIFORM_BUFFER, 128),
                size(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, 32),
                size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 128),
                size(vk::DescriptorType::INPUT_ATTACHMENT, 32),
            ],
        }
    }
}

impl DescriptorPoolConfig {
    pub fn validate(&self) -> RenderResult<()> {
        if self.max_sets == 0 {
            return Err(RenderError::Config(
                "descriptor pool max_sets must be non-zero".to_string(),
            ));
        }
        if self.pool_sizes.is_empty() || self.pool_sizes.iter().any(|s| s.descriptor_count == 0) {
            return Err(RenderError::Config(
                "descriptor pool needs at least one non-empty pool size".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for a [`Renderer`](crate::Renderer).
#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// F: how many frames may be in flight at once.
    pub frames_in_flight: usize,
    /// Used if the surface supports it, FIFO otherwise.
    pub present_mode: vk::PresentModeKHR,
    /// Used if the surface supports it.
    pub surface_format: vk::SurfaceFormatKHR,
    pub depth_format: vk::Format,
    pub clear_color: [f32; 4],
    /// 1.0 for a `LESS` depth test, 0.0 for reversed depth.
    pub depth_clear: f32,
    /// Sizes the renderer's [`DescriptorManager`](crate::DescriptorManager).
    pub descriptor_pool: DescriptorPoolConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        let preferences = SwapchainPreferences::default();
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            present_mode: preferences.present_mode,
            surface_format: preferences.surface_format,
            depth_format: DEFAULT_DEPTH_FORMAT,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_clear: 1.0,
            descriptor_pool: DescriptorPoolConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Checks the settings, reporting the first problem as
    /// [`RenderError::Config`].
    pub fn validate(&self) -> RenderResult<()> {
        if self.frames_in_flight == 0 {
            return Err(RenderError::Config(
                "frames_in_flight must be non-zero".to_string(),
            ));
        }
        if !is_depth_format(self.depth_format) {
            return Err(RenderError::Config(format!(
                "{:?} is not a depth format",
                self.depth_format
            )));
        }
        if !(0.0..=1.0).contains(&self.depth_clear) {
            return Err(RenderError::Config(format!(
                "depth clear value {} is outside [0, 1]",
                self.depth_clear
            )));
        }
        self.descriptor_pool.validate()
    }

    pub fn swapchain_preferences(&self) -> SwapchainPreferences {
        SwapchainPreferences {
            surface_format: self.surface_format,
            present_mode: self.present_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_frames_in_flight_is_rejected() {
        let config = RendererConfig {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RenderError::Config(_))));
    }

    #[test]
    fn test_color_format_as_depth_is_rejected() {
        let config = RendererConfig {
            depth_format: vk::Format::R8G8B8A8_UNORM,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RenderError::Config(_))));
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let mut config = RendererConfig::default();
        config.descriptor_pool.pool_sizes.clear();
        assert!(matches!(config.validate(), Err(RenderError::Config(_))));

        config.descriptor_pool = DescriptorPoolConfig {
            max_sets: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RenderError::Config(_))));
    }

    #[test]
    fn test_swapchain_preferences_follow_config() {
        let config = RendererConfig {
            present_mode: vk::PresentModeKHR::MAILBOX,
            ..Default::default()
        };
        assert_eq!(
            config.swapchain_preferences().present_mode,
            vk::PresentModeKHR::MAILBOX
        );
    }
}
