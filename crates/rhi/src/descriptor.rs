//! Descriptor pools and descriptor write helpers.
//!
//! Layouts are cached one level up by the renderer's descriptor manager;
//! this module only wraps the pool sets are allocated from.

use ash::vk;
use tracing::debug;

use crate::device::SharedDevice;
use crate::error::RhiResult;
use crate::owned::Owned;

/// Descriptor pool whose sets can be freed individually.
///
/// # Thread Safety
///
/// Descriptor pool operations are externally synchronized.
pub struct DescriptorPool {
    device: SharedDevice,
    pool: Owned<vk::DescriptorPool>,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a pool for at most `max_sets` sets drawing from `pool_sizes`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ash::vk;
    /// use lumen_rhi::SharedDevice;
    /// use lumen_rhi::descriptor::DescriptorPool;
    ///
    /// # fn example(device: SharedDevice) -> lumen_rhi::RhiResult<()> {
    /// let pool_sizes = [
    ///     vk::DescriptorPoolSize::default()
    ///         .ty(vk::DescriptorType::UNIFORM_BUFFER)
    ///         .descriptor_count(100),
    /// ];
    /// let pool = DescriptorPool::new(device, 100, &pool_sizes)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        device: SharedDevice,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = device.create_descriptor_pool(&create_info)?;
        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            pool: Owned::new(device.clone(), pool),
            device,
            max_sets,
        })
    }

    /// Allocates one set per entry of `layouts`.
    ///
    /// # Errors
    ///
    /// Fails with `ERROR_OUT_OF_POOL_MEMORY` or `ERROR_FRAGMENTED_POOL` when
    /// the pool cannot satisfy the request.
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Vec<vk::DescriptorSet>> {
        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle())
            .set_layouts(layouts);
        self.device.allocate_descriptor_sets(&allocate_info)
    }

    /// Returns `sets` to the pool. The GPU must be done with them.
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> RhiResult<()> {
        self.device.free_descriptor_sets(self.handle(), sets)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool.handle()
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    #[inline]
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }
}

/// Buffer range for a descriptor write.
#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

/// Image binding for a descriptor write. Pass a null sampler for input attachments.
#[inline]
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(image_view)
        .image_layout(image_layout)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockDevice, MockObject};

    #[test]
    fn test_allocate_and_free() {
        let device = Arc::new(MockDevice::new());
        let sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(4)];
        let pool = DescriptorPool::new(device.clone(), 4, &sizes).unwrap();
        assert_eq!(pool.max_sets(), 4);

        let layouts = [vk::DescriptorSetLayout::null(); 3];
        let sets = pool.allocate(&layouts).unwrap();
        assert_eq!(sets.len(), 3);
        assert_eq!(device.allocated_sets(pool.handle()), 3);

        assert!(pool.allocate(&layouts).is_err());

        pool.free(&sets).unwrap();
        assert_eq!(device.allocated_sets(pool.handle()), 0);

        drop(pool);
        assert_eq!(device.destroyed(MockObject::DescriptorPool), 1);
    }

    #[test]
    fn test_info_helpers() {
        let info = buffer_info(vk::Buffer::null(), 64, vk::WHOLE_SIZE);
        assert_eq!(info.offset, 64);
        assert_eq!(info.range, vk::WHOLE_SIZE);

        let info = image_info(
            vk::Sampler::null(),
            vk::ImageView::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
