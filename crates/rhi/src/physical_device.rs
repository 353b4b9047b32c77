//! Physical device (GPU) selection.
//!
//! A GPU is usable when it has a graphics queue, can present to the target
//! surface, supports `VK_KHR_swapchain` and reports at least one surface
//! format and present mode. Among usable GPUs, discrete ones win.

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::DeviceLimits;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::swapchain::SwapchainSupportDetails;

/// Queue families used by the frame engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Family that supports graphics operations.
    pub graphics_family: Option<u32>,
    /// Family that can present to the target surface.
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Checks that both graphics and presentation are available.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Returns the distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        families.extend(self.graphics_family);
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }

    /// Returns whether graphics and presentation use different families.
    pub fn is_split(&self) -> bool {
        self.is_complete() && self.graphics_family != self.present_family
    }
}

/// A GPU that passed selection.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version).
    pub properties: vk::PhysicalDeviceProperties,
    /// Supported device features.
    pub features: vk::PhysicalDeviceFeatures,
    /// Queue family indices for graphics and presentation.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns the limits the frame engine consults.
    pub fn limits(&self) -> DeviceLimits {
        DeviceLimits::from_properties(&self.properties, &self.features)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the most suitable GPU for presenting to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU meets the requirements.
pub fn select_physical_device(
    instance: &Instance,
    surface: vk::SurfaceKHR,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.handle().enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface))
        .map(|info| {
            let score = rate_device(&info.properties);
            debug!("GPU '{}' - score {}", info.device_name(), score);
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    match best {
        Some((info, score)) => {
            info!("Selected GPU: '{}' (score {})", info.device_name(), score);
            Ok(info)
        }
        None => {
            warn!("No suitable GPU found with required capabilities");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

fn check_device_suitability(
    instance: &Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Option<PhysicalDeviceInfo> {
    let vk_instance = instance.handle();
    let properties = unsafe { vk_instance.get_physical_device_properties(device) };
    let features = unsafe { vk_instance.get_physical_device_features(device) };
    let name = properties
        .device_name_as_c_str()
        .ok()
        .and_then(|name| name.to_str().ok())
        .unwrap_or("Unknown")
        .to_owned();

    let queue_families = find_queue_families(instance, device, surface);
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics or present queue", name);
        return None;
    }

    if !supports_swapchain(vk_instance, device) {
        debug!("GPU '{}' skipped: VK_KHR_swapchain not supported", name);
        return None;
    }

    match SwapchainSupportDetails::query(device, surface, instance.surface_loader()) {
        Ok(support) if support.is_adequate() => {}
        _ => {
            debug!("GPU '{}' skipped: inadequate surface support", name);
            return None;
        }
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        features,
        queue_families,
    })
}

fn supports_swapchain(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let Ok(extensions) = (unsafe { instance.enumerate_device_extension_properties(device) }) else {
        return false;
    };
    extensions.iter().any(|extension| {
        extension
            .extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    })
}

fn find_queue_families(
    instance: &Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> QueueFamilyIndices {
    let families = unsafe {
        instance
            .handle()
            .get_physical_device_queue_family_properties(device)
    };

    let mut indices = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = unsafe {
            instance
                .surface_loader()
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        // A family that does both is preferred over a split pair.
        if graphics && present {
            return QueueFamilyIndices {
                graphics_family: Some(i),
                present_family: Some(i),
            };
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }
    indices
}

/// Higher is better.
fn rate_device(properties: &vk::PhysicalDeviceProperties) -> u32 {
    let type_score = match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 1,
    };
    type_score + properties.limits.max_image_dimension2_d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_default() {
        let indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());
        assert!(indices.unique_families().is_empty());
    }

    #[test]
    fn test_queue_family_indices_shared_family() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert!(indices.is_complete());
        assert!(!indices.is_split());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_queue_family_indices_split_families() {
        let indices = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(2),
        };
        assert!(indices.is_split());
        assert_eq!(indices.unique_families(), vec![0, 2]);
    }

    #[test]
    fn test_discrete_gpu_outranks_integrated() {
        let mut discrete = vk::PhysicalDeviceProperties::default();
        discrete.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        discrete.limits.max_image_dimension2_d = 8192;

        let mut integrated = vk::PhysicalDeviceProperties::default();
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        integrated.limits.max_image_dimension2_d = 16384;

        assert!(rate_device(&discrete) > rate_device(&integrated));
    }
}
