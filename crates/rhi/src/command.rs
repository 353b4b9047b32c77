//! Command pools and command buffers.
//!
//! - [`CommandPool`] creates a pool on the graphics queue family and
//!   allocates primary command buffers from it.
//! - [`CommandBuffer`] wraps one allocated buffer with its lifecycle
//!   (reset, begin, end). Buffers are freed with their pool.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::SharedDevice;
//! use lumen_rhi::command::CommandPool;
//!
//! # fn example(device: SharedDevice) -> lumen_rhi::RhiResult<()> {
//! let pool = CommandPool::new(device)?;
//! let cmd = pool.allocate_command_buffer()?;
//!
//! cmd.begin()?;
//! // ... record commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::device::SharedDevice;
use crate::error::{RhiError, RhiResult};
use crate::owned::Owned;

/// Command pool on the graphics queue family.
///
/// Created with `RESET_COMMAND_BUFFER` so buffers can be reset one by one,
/// as per-frame buffers are.
///
/// # Thread Safety
///
/// Command pools are externally synchronized: record from one thread at a time.
pub struct CommandPool {
    device: SharedDevice,
    pool: Owned<vk::CommandPool>,
}

impl CommandPool {
    /// Creates a command pool whose buffers can be reset individually.
    pub fn new(device: SharedDevice) -> RhiResult<Self> {
        Self::with_flags(device, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Creates a command pool with explicit creation flags.
    pub fn with_flags(device: SharedDevice, flags: vk::CommandPoolCreateFlags) -> RhiResult<Self> {
        let pool = device.create_command_pool(flags)?;
        debug!("Command pool created ({:?})", flags);
        Ok(Self {
            pool: Owned::new(device.clone(), pool),
            device,
        })
    }

    /// Returns the Vulkan command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool.handle()
    }

    /// Allocates one primary command buffer.
    pub fn allocate_command_buffer(&self) -> RhiResult<CommandBuffer> {
        self.allocate_command_buffers(1)?
            .pop()
            .ok_or_else(|| RhiError::InvalidHandle("no command buffer allocated".to_string()))
    }

    /// Allocates `count` primary command buffers.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<CommandBuffer>> {
        let buffers = self.device.allocate_command_buffers(self.handle(), count)?;
        Ok(buffers
            .into_iter()
            .map(|buffer| CommandBuffer {
                device: self.device.clone(),
                buffer,
            })
            .collect())
    }
}

/// A primary command buffer allocated from a [`CommandPool`].
///
/// The buffer must not outlive its pool.
#[derive(Clone)]
pub struct CommandBuffer {
    device: SharedDevice,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Returns the Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Returns the device the buffer records for.
    #[inline]
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    /// Returns the buffer to the initial state.
    ///
    /// The buffer must not be referenced by a pending submission.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_command_buffer(self.buffer)
    }

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    /// Ends recording.
    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CommandBuffer").field(&self.buffer).finish()
    }
}
