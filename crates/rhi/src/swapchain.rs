//! Swapchain management.
//!
//! Surface capability queries, the format / present mode / extent selection
//! policy, and the [`Swapchain`] object with its image views.
//!
//! A swapchain is never resized in place. Rebuilding creates a new
//! [`Swapchain`] passing the old handle, then drops the old one, so every
//! view and image index that referred to the old generation goes with it.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use lumen_rhi::SharedDevice;
//! use lumen_rhi::swapchain::{Swapchain, SwapchainPreferences};
//!
//! # fn example(device: SharedDevice, surface: vk::SurfaceKHR) -> lumen_rhi::RhiResult<()> {
//! let preferences = SwapchainPreferences::default();
//! let swapchain = Swapchain::new(
//!     device.clone(),
//!     surface,
//!     vk::Extent2D { width: 1280, height: 720 },
//!     &preferences,
//!     None,
//! )?;
//!
//! // Rebuild after a resize:
//! let swapchain = Swapchain::new(
//!     device,
//!     surface,
//!     vk::Extent2D { width: 1920, height: 1080 },
//!     &preferences,
//!     Some(&swapchain),
//! )?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::SharedDevice;
use crate::error::{RhiError, RhiResult};
use crate::owned::Owned;

/// What a surface supports on a given physical device.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support for `physical_device` presenting to `surface`.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Format and present mode the caller would like, if the surface has them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPreferences {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            surface_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }
}

/// Vulkan swapchain with one color view per image.
///
/// Fields drop in declaration order: views before the swapchain that owns
/// their images.
pub struct Swapchain {
    image_views: Vec<Owned<vk::ImageView>>,
    swapchain: Owned<vk::SwapchainKHR>,
    device: SharedDevice,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a swapchain for `surface`.
    ///
    /// `window_extent` is used when the surface leaves the extent to the
    /// application and is clamped to the surface limits. Pass the swapchain
    /// being replaced as `old` so the driver can recycle its resources; it
    /// stays valid until the caller drops it.
    ///
    /// # Errors
    ///
    /// Fails when the surface has no formats or present modes, or when
    /// swapchain or image view creation fails.
    pub fn new(
        device: SharedDevice,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
        preferences: &SwapchainPreferences,
        old: Option<&Swapchain>,
    ) -> RhiResult<Self> {
        let support = device.surface_support(surface)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats, preferences.surface_format);
        let present_mode = choose_present_mode(&support.present_modes, preferences.present_mode);
        let extent = choose_extent(&support.capabilities, window_extent);
        let image_count = determine_image_count(&support.capabilities);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let queue_families = device.queue_families();
        let family_indices: Vec<u32> = queue_families.unique_families();
        let sharing_mode = if queue_families.is_split() {
            debug!("Using CONCURRENT sharing between queue families {:?}", family_indices);
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let shared_families: &[u32] = if queue_families.is_split() {
            &family_indices
        } else {
            &[]
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), Swapchain::handle));

        let swapchain = Owned::new(device.clone(), device.create_swapchain(&create_info)?);
        let images = device.swapchain_images(swapchain.handle())?;
        let image_views = images
            .iter()
            .enumerate()
            .map(|(i, &image)| {
                create_color_view(&device, image, surface_format.format).map_err(|e| {
                    RhiError::SwapchainError(format!("Failed to create image view {i}: {e}"))
                })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        info!("Swapchain created with {} images", images.len());

        Ok(Self {
            image_views,
            swapchain,
            device,
            images,
            format: surface_format,
            extent,
            present_mode,
        })
    }

    /// Acquires the next presentable image, blocking without a timeout.
    ///
    /// Returns `(image_index, suboptimal)`.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        self.device
            .acquire_next_image(self.handle(), u64::MAX, semaphore)
    }

    /// Queues `image_index` for presentation once `wait_semaphore` fires.
    ///
    /// Returns `true` when the swapchain is suboptimal.
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> Result<bool, vk::Result> {
        self.device
            .queue_present(self.handle(), image_index, wait_semaphore)
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain.handle()
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.format.color_space
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Returns the color view of image `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index].handle()
    }

    pub fn image_views(&self) -> impl ExactSizeIterator<Item = vk::ImageView> + '_ {
        self.image_views.iter().map(Owned::handle)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        debug!(
            "Destroying swapchain (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

impl std::fmt::Debug for Swapchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("handle", &self.handle())
            .field("format", &self.format.format)
            .field("extent", &self.extent)
            .field("images", &self.images.len())
            .finish()
    }
}

/// Picks `preferred` if offered, then `B8G8R8A8_UNORM` in sRGB space, then
/// whatever comes first.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> vk::SurfaceFormatKHR {
    if let Some(&format) = formats.iter().find(|f| **f == preferred) {
        debug!("Selected preferred surface format {:?}", format.format);
        return format;
    }

    let fallback = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_UNORM && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = fallback {
        warn!("Using fallback surface format: B8G8R8A8_UNORM with SRGB_NONLINEAR");
        return format;
    }

    let first = formats.first().copied().unwrap_or(preferred);
    warn!("Using first available surface format: {:?}", first.format);
    first
}

/// Picks `preferred` if offered, otherwise FIFO, which every surface supports.
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        debug!("Selected present mode {:?}", preferred);
        return preferred;
    }
    if preferred != vk::PresentModeKHR::FIFO {
        warn!("Present mode {:?} unavailable, falling back to FIFO", preferred);
    }
    vk::PresentModeKHR::FIFO
}

/// The surface's current extent, or `window_extent` clamped to the surface
/// limits when the surface lets the application choose (`u32::MAX`).
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };
    debug!(
        "Calculated extent: {}x{} (requested: {}x{})",
        extent.width, extent.height, window_extent.width, window_extent.height
    );
    extent
}

/// One more than the minimum, capped by the maximum when there is one.
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_color_view(
    device: &SharedDevice,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<Owned<vk::ImageView>> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );
    let view = device.create_image_view(&create_info)?;
    Ok(Owned::new(device.clone(), view))
}
