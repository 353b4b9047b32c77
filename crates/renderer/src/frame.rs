//! Frames in flight.
//!
//! Each of the F frame slots owns a command buffer and the synchronization
//! primitives for one frame:
//!
//! ```text
//! 1. Wait on in_flight (CPU waits for the previous use of this slot)
//! 2. Acquire a swapchain image (signals image_available)
//! 3. Record into command_buffer
//! 4. Submit: wait image_available, signal render_finished and in_flight
//! 5. Present (waits on render_finished)
//! ```

use tracing::debug;

use lumen_rhi::command::{CommandBuffer, CommandPool};
use lumen_rhi::sync::{Fence, Semaphore};
use lumen_rhi::{RhiResult, SharedDevice};

/// Index of the current frame slot, cycling through `0..frames_in_flight`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCounter {
    current: usize,
    frames_in_flight: usize,
}

impl FrameCounter {
    /// `frames_in_flight` must be non-zero.
    pub fn new(frames_in_flight: usize) -> Self {
        debug_assert!(frames_in_flight > 0);
        Self {
            current: 0,
            frames_in_flight,
        }
    }

    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Moves to the next slot and returns it.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % self.frames_in_flight;
        self.current
    }
}

/// Per-slot command buffer and synchronization.
pub struct FrameSync {
    command_buffer: CommandBuffer,
    /// Signaled when the acquired swapchain image may be written.
    image_available: Semaphore,
    /// Signaled when the slot's submission finished rendering.
    render_finished: Semaphore,
    /// Signaled when the slot's submission completed on the GPU.
    in_flight: Fence,
}

impl FrameSync {
    /// Creates `count` slots, allocating their command buffers from `pool`.
    pub fn create_all(device: &SharedDevice, pool: &CommandPool, count: usize) -> RhiResult<Vec<Self>> {
        let command_buffers = pool.allocate_command_buffers(count as u32)?;
        command_buffers
            .into_iter()
            .enumerate()
            .map(|(i, command_buffer)| {
                let frame = Self {
                    command_buffer,
                    image_available: Semaphore::new(device.clone())?,
                    render_finished: Semaphore::new(device.clone())?,
                    // Signaled so the first wait on each slot returns at once.
                    in_flight: Fence::new(device.clone(), true)?,
                };
                debug!("Created frame slot {}", i);
                Ok(frame)
            })
            .collect()
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

impl std::fmt::Debug for FrameSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSync")
            .field("command_buffer", &self.command_buffer.handle())
            .field("in_flight", &self.in_flight.handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lumen_rhi::mock::{MockDevice, MockObject};

    use super::*;

    #[test]
    fn test_counter_cycles() {
        let mut counter = FrameCounter::new(3);
        let seen: Vec<usize> = (0..7).map(|_| counter.advance()).collect();
        assert_eq!(seen, vec![1, 2, 0, 1, 2, 0, 1]);
        assert_eq!(counter.frames_in_flight(), 3);
    }

    #[test]
    fn test_single_frame_in_flight() {
        let mut counter = FrameCounter::new(1);
        assert_eq!(counter.advance(), 0);
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_slots_start_signaled() {
        let device: Arc<MockDevice> = Arc::new(MockDevice::new());
        let shared: SharedDevice = device.clone();
        let pool = CommandPool::new(shared.clone()).unwrap();
        let frames = FrameSync::create_all(&shared, &pool, 2).unwrap();

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.in_flight().is_signaled().unwrap()));
        assert_eq!(device.created(MockObject::Semaphore), 4);
        assert_ne!(
            frames[0].command_buffer().handle(),
            frames[1].command_buffer().handle()
        );

        drop(frames);
        assert_eq!(device.live(MockObject::Fence), 0);
        assert_eq!(device.live(MockObject::Semaphore), 0);
    }

    #[test]
    fn test_frame_sync_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameSync>();
    }
}
