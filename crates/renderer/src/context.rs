//! Vulkan bootstrap for a window.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use lumen_platform::{Surface, Window};
use lumen_rhi::device::Device;
use lumen_rhi::instance::Instance;
use lumen_rhi::physical_device::select_physical_device;
use lumen_rhi::{RhiError, SharedDevice};

use crate::error::{RenderError, RenderResult};

/// Instance, surface and logical device for one window.
///
/// Fields drop in declaration order: device, surface, instance. Objects
/// created from [`GpuContext::device`] must be dropped before the context.
pub struct GpuContext {
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl GpuContext {
    /// Creates an instance for `window`'s display, a surface for the window
    /// and a logical device on the best GPU that can present to it.
    pub fn new(window: &Window, enable_validation: bool) -> RenderResult<Self> {
        let display = window
            .raw_display_handle()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let instance = Instance::new(enable_validation, display)
            .map_err(RenderError::creating("instance"))?;
        let surface = window
            .create_surface(&instance)
            .map_err(|e| RenderError::creating("surface")(RhiError::SurfaceError(e.to_string())))?;

        let physical_device = select_physical_device(&instance, surface.handle())?;
        let device = Device::new(&instance, &physical_device)
            .map_err(RenderError::creating("logical device"))?;

        info!(
            "GPU context ready on '{}' (validation: {})",
            physical_device.device_name(),
            instance.has_validation()
        );
        Ok(Self {
            device,
            surface,
            instance,
        })
    }

    /// The device as the trait object the rest of the engine uses.
    pub fn device(&self) -> SharedDevice {
        self.device.clone()
    }

    #[inline]
    pub fn surface_handle(&self) -> vk::SurfaceKHR {
        self.surface.handle()
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}
