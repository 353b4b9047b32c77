//! Window management using winit.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use lumen_core::{Error, Result};
use lumen_rhi::instance::Instance;

/// Anything that can report the size, in pixels, of the surface it backs.
///
/// The renderer asks for it whenever the swapchain is rebuilt. A zero width
/// or height (a minimised window) postpones the rebuild.
pub trait FramebufferSource: Send + Sync {
    /// Current framebuffer size as `(width, height)`.
    fn framebuffer_size(&self) -> (u32, u32);
}

impl<T: FramebufferSource + ?Sized> FramebufferSource for Arc<T> {
    fn framebuffer_size(&self) -> (u32, u32) {
        (**self).framebuffer_size()
    }
}

/// RAII wrapper for a Vulkan surface.
///
/// The instance the surface was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Valid as long as this `Surface` exists.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle came from ash_window::create_surface on the
        // instance the loader was built from, and is destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// A resizable winit window the renderer presents to.
#[derive(Clone)]
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    /// Creates a resizable window with the given inner size and title.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", width, height);

        Ok(Self {
            window: Arc::new(window),
        })
    }

    /// The underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Display handle to create the Vulkan instance against.
    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        self.window
            .display_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Creates a Vulkan surface for this window on `instance`.
    ///
    /// # Errors
    ///
    /// Fails if the window or display handle is unavailable or surface
    /// creation fails.
    pub fn create_surface(&self, instance: &Instance) -> Result<Surface> {
        let display_handle = self.raw_display_handle()?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?
            .as_raw();

        // SAFETY: entry and instance are live; the handles come from the
        // winit window, which outlives this call. Surface::drop destroys it.
        let handle = unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.handle(),
                display_handle,
                window_handle,
                None,
            )
        }
        .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?;

        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

impl FramebufferSource for Window {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    struct Resizable(AtomicU64);

    impl FramebufferSource for Resizable {
        fn framebuffer_size(&self) -> (u32, u32) {
            let packed = self.0.load(Ordering::Relaxed);
            ((packed >> 32) as u32, packed as u32)
        }
    }

    #[test]
    fn test_arc_forwards_framebuffer_size() {
        let source = Arc::new(Resizable(AtomicU64::new((800 << 32) | 600)));
        let shared: Arc<dyn FramebufferSource> = source.clone();
        assert_eq!(shared.framebuffer_size(), (800, 600));

        source.0.store(0, Ordering::Relaxed);
        assert_eq!(shared.framebuffer_size(), (0, 0));
    }
}
