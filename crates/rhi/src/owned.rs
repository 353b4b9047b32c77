//! Optional ownership of device handles.

use std::fmt;

use ash::vk;

use crate::device::{GpuDevice, SharedDevice};

/// A Vulkan handle type that a [`GpuDevice`] knows how to destroy.
pub trait DeviceObject: Copy + fmt::Debug {
    /// Human-readable object kind, used in log and error messages.
    const KIND: &'static str;

    /// Destroys `self` through `device`.
    fn destroy(self, device: &dyn GpuDevice);
}

macro_rules! device_object {
    ($($handle:ty => $kind:literal, $destroy:ident;)*) => {
        $(
            impl DeviceObject for $handle {
                const KIND: &'static str = $kind;

                fn destroy(self, device: &dyn GpuDevice) {
                    device.$destroy(self);
                }
            }
        )*
    };
}

device_object! {
    vk::Image => "image", destroy_image;
    vk::ImageView => "image view", destroy_image_view;
    vk::RenderPass => "render pass", destroy_render_pass;
    vk::Framebuffer => "framebuffer", destroy_framebuffer;
    vk::DescriptorSetLayout => "descriptor set layout", destroy_descriptor_set_layout;
    vk::DescriptorPool => "descriptor pool", destroy_descriptor_pool;
    vk::PipelineLayout => "pipeline layout", destroy_pipeline_layout;
    vk::Pipeline => "pipeline", destroy_pipeline;
    vk::ShaderModule => "shader module", destroy_shader_module;
    vk::Fence => "fence", destroy_fence;
    vk::Semaphore => "semaphore", destroy_semaphore;
    vk::CommandPool => "command pool", destroy_command_pool;
    vk::SwapchainKHR => "swapchain", destroy_swapchain;
}

/// A device handle that is destroyed on drop only when it has an owner.
///
/// `Owned::new` takes ownership: dropping the wrapper destroys the handle
/// through the device. `Owned::borrowed` wraps a handle owned elsewhere
/// (a swapchain image view, for instance) and never destroys it.
///
/// The wrapper is move-only.
pub struct Owned<T: DeviceObject> {
    handle: T,
    device: Option<SharedDevice>,
}

impl<T: DeviceObject> Owned<T> {
    /// Wraps `handle`, destroying it through `device` on drop.
    pub fn new(device: SharedDevice, handle: T) -> Self {
        Self {
            handle,
            device: Some(device),
        }
    }

    /// Wraps `handle` without taking ownership of it.
    pub fn borrowed(handle: T) -> Self {
        Self {
            handle,
            device: None,
        }
    }

    /// Returns the wrapped handle.
    #[inline]
    pub fn handle(&self) -> T {
        self.handle
    }

    /// Returns whether dropping this wrapper destroys the handle.
    #[inline]
    pub fn is_owning(&self) -> bool {
        self.device.is_some()
    }

    /// Gives up ownership and returns the raw handle.
    pub fn release(mut self) -> T {
        self.device = None;
        self.handle
    }
}

impl<T: DeviceObject> Drop for Owned<T> {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            self.handle.destroy(device.as_ref());
        }
    }
}

impl<T: DeviceObject> fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("kind", &T::KIND)
            .field("handle", &self.handle)
            .field("owning", &self.is_owning())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk::Handle;

    use super::*;
    use crate::mock::{MockDevice, MockObject};

    #[test]
    fn test_owned_destroys_on_drop() {
        let device = Arc::new(MockDevice::new());
        let view = device.create_image_view(&vk::ImageViewCreateInfo::default()).unwrap();

        let owned = Owned::new(device.clone(), view);
        assert!(owned.is_owning());
        drop(owned);

        assert_eq!(device.destroyed(MockObject::ImageView), 1);
    }

    #[test]
    fn test_borrowed_never_destroys() {
        let device = Arc::new(MockDevice::new());
        let borrowed = Owned::borrowed(vk::ImageView::from_raw(42));
        assert!(!borrowed.is_owning());
        drop(borrowed);

        assert_eq!(device.destroyed(MockObject::ImageView), 0);
    }

    #[test]
    fn test_release_gives_up_ownership() {
        let device = Arc::new(MockDevice::new());
        let fence = device.create_fence(false).unwrap();

        let owned = Owned::new(device.clone(), fence);
        let raw = owned.release();
        assert_eq!(raw, fence);
        assert_eq!(device.destroyed(MockObject::Fence), 0);

        device.destroy_fence(raw);
        assert_eq!(device.destroyed(MockObject::Fence), 1);
    }
}
