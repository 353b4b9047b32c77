//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Everything above this crate talks to the GPU through the [`GpuDevice`]
//! trait. [`device::Device`] implements it over `ash`; with the `mock`
//! feature enabled, [`mock::MockDevice`] implements it in memory so the
//! frame engine can be exercised without a GPU.
//!
//! - Instance, physical device and logical device creation
//! - Swapchain configuration policy
//! - Command pools and command buffers
//! - Descriptor pools, shaders and pipelines
//! - Synchronization primitives
//! - [`Owned`], the optional-ownership wrapper for device handles

mod error;
mod owned;

pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod physical_device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::{DeviceLimits, GpuDevice, SharedDevice};
pub use error::{RhiError, RhiResult};
pub use owned::{DeviceObject, Owned};

// Re-export ash types that users might need
pub use ash::vk;
