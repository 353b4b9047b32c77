//! Depth buffer.
//!
//! One device-local depth image and its view, sized to the swapchain and
//! rebuilt with it. Memory comes from the device's gpu-allocator and is
//! released when the image is destroyed.

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, info};

use lumen_rhi::{Owned, RhiError, RhiResult, SharedDevice};

/// Default depth buffer format (32-bit floating point).
pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Returns whether `format` has a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Returns whether `format` also has a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Depth image with its view.
///
/// Fields drop in declaration order: the view before the image.
pub struct DepthBuffer {
    view: Owned<vk::ImageView>,
    image: Owned<vk::Image>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl DepthBuffer {
    /// Creates a depth buffer of `extent` in `format`.
    ///
    /// # Errors
    ///
    /// Fails for an empty extent, a non-depth format, or when image,
    /// memory or view creation fails.
    pub fn new(device: SharedDevice, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "Depth buffer dimensions must be greater than 0".to_string(),
            ));
        }
        if !is_depth_format(format) {
            return Err(RhiError::InvalidHandle(format!(
                "{format:?} is not a depth format"
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = Owned::new(
            device.clone(),
            device.create_image(&image_info, MemoryLocation::GpuOnly, "depth_buffer")?,
        );

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if has_stencil_component(format) {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .level_count(1)
                    .layer_count(1),
            );
        let view = Owned::new(device.clone(), device.create_image_view(&view_info)?);

        info!(
            "Created depth buffer: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(Self {
            view,
            image,
            format,
            extent,
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        debug!(
            "Destroying depth buffer: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lumen_rhi::mock::{MockDevice, MockObject};

    use super::*;

    #[test]
    fn test_depth_formats() {
        assert!(is_depth_format(DEFAULT_DEPTH_FORMAT));
        assert!(is_depth_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(!is_depth_format(vk::Format::B8G8R8A8_SRGB));
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_depth_buffer_lifecycle() {
        let device = Arc::new(MockDevice::new());
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let depth = DepthBuffer::new(device.clone(), extent, DEFAULT_DEPTH_FORMAT).unwrap();
        assert_eq!(depth.extent(), extent);

        let record = &device.images()[0];
        assert_eq!(record.name, "depth_buffer");
        assert_eq!(record.format, vk::Format::D32_SFLOAT);
        assert!(
            record
                .usage
                .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        );

        drop(depth);
        assert_eq!(device.live(MockObject::Image), 0);
        assert_eq!(device.live(MockObject::ImageView), 0);
    }

    #[test]
    fn test_invalid_depth_buffers_are_rejected() {
        let device = Arc::new(MockDevice::new());
        let empty = vk::Extent2D {
            width: 0,
            height: 480,
        };
        assert!(DepthBuffer::new(device.clone(), empty, DEFAULT_DEPTH_FORMAT).is_err());

        let extent = vk::Extent2D {
            width: 1,
            height: 1,
        };
        assert!(DepthBuffer::new(device.clone(), extent, vk::Format::R8_UNORM).is_err());
        assert_eq!(device.created(MockObject::Image), 0);
    }
}
