//! Synchronization primitives.
//!
//! - [`Semaphore`]: GPU-to-GPU ordering between queue operations, such as
//!   image acquisition before rendering or rendering before presentation.
//! - [`Fence`]: GPU-to-CPU completion signal the host can wait on.
//!
//! Both destroy their handle on drop.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::SharedDevice;
//! use lumen_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: SharedDevice) -> lumen_rhi::RhiResult<()> {
//! let image_available = Semaphore::new(device.clone())?;
//! let in_flight = Fence::new(device, true)?;
//!
//! in_flight.wait(u64::MAX)?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use ash::vk;

use crate::device::SharedDevice;
use crate::error::RhiResult;
use crate::owned::Owned;

/// Vulkan semaphore, created unsignaled.
#[derive(Debug)]
pub struct Semaphore {
    semaphore: Owned<vk::Semaphore>,
}

impl Semaphore {
    /// Creates a new semaphore.
    pub fn new(device: SharedDevice) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        Ok(Self {
            semaphore: Owned::new(device, semaphore),
        })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore.handle()
    }
}

/// Vulkan fence.
pub struct Fence {
    device: SharedDevice,
    fence: Owned<vk::Fence>,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// A fence created `signaled` lets the first wait on it return
    /// immediately, which is what per-frame fences want.
    pub fn new(device: SharedDevice, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        Ok(Self {
            fence: Owned::new(device.clone(), fence),
            device,
        })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence.handle()
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    ///
    /// # Errors
    ///
    /// Returns `vk::Result::TIMEOUT` on timeout, or a device error.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fences(&[self.handle()], timeout)
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// The fence must not guard a pending submission.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fences(&[self.handle()])
    }

    /// Returns whether the fence is signaled, without blocking.
    pub fn is_signaled(&self) -> RhiResult<bool> {
        self.device.fence_signaled(self.handle())
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").field("fence", &self.fence).finish()
    }
}
