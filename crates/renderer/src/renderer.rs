//! Frame loop orchestration.
//!
//! The [`Renderer`] owns the swapchain and everything sized by it (image
//! views, the main pass's framebuffers, the depth buffer), plus one command
//! buffer, two semaphores and a fence per frame in flight. It also owns the
//! [`DescriptorManager`] scene code allocates its descriptor sets from.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lumen_renderer::{GpuContext, PassContext, RenderResult, Renderer, RendererConfig};
//!
//! # fn example(window: lumen_platform::Window) -> RenderResult<()> {
//! let context = GpuContext::new(&window, cfg!(debug_assertions))?;
//! let mut renderer = Renderer::with_context(context, Arc::new(window), RendererConfig::default())?;
//!
//! loop {
//!     renderer.render_frame(&mut |ctx: &PassContext<'_>| -> RenderResult<()> {
//!         ctx.draw(3, 1, 0, 0);
//!         Ok(())
//!     })?;
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, error, info, warn};

use lumen_core::Timer;
use lumen_platform::FramebufferSource;
use lumen_rhi::command::{CommandBuffer, CommandPool};
use lumen_rhi::swapchain::Swapchain;
use lumen_rhi::{DeviceLimits, RhiError, SharedDevice};

use crate::config::RendererConfig;
use crate::context::GpuContext;
use crate::depth_buffer::DepthBuffer;
use crate::descriptor_manager::DescriptorManager;
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameCounter, FrameSync};
use crate::passes::GeometryPass;
use crate::render_pass::{PassRenderer, RenderPass, RenderPassSettings};

/// One frame between [`Renderer::begin_render`] and
/// [`Renderer::end_render`].
///
/// Record into [`command_buffer`](FrameContext::command_buffer), then hand
/// the context back to `end_render`.
#[must_use = "a begun frame must be passed to Renderer::end_render"]
#[derive(Debug)]
pub struct FrameContext {
    frame_index: usize,
    image_index: u32,
    generation: u64,
    command_buffer: CommandBuffer,
    extent: vk::Extent2D,
}

impl FrameContext {
    /// Frame-in-flight slot, in `0..frames_in_flight`.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Swapchain image being rendered.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Command buffer in the recording state.
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

/// Swapchain, frames in flight and the presenting render pass.
///
/// # Resource Destruction Order
///
/// `Drop` waits for the device to go idle, then fields drop in declaration
/// order: framebuffers and the render pass, depth buffer, swapchain and its
/// views, frame synchronization, the command pool, descriptor layouts and
/// pool, and finally the owned [`GpuContext`] if there is one.
pub struct Renderer {
    main_pass: GeometryPass,
    depth_buffer: DepthBuffer,
    swapchain: Swapchain,
    frames: Vec<FrameSync>,
    command_pool: CommandPool,
    descriptors: DescriptorManager,
    device: SharedDevice,
    surface: vk::SurfaceKHR,
    window: Arc<dyn FramebufferSource>,
    config: RendererConfig,
    counter: FrameCounter,
    resize_requested: bool,
    generation: u64,
    timer: Timer,
    context: Option<GpuContext>,
}

impl Renderer {
    /// Creates the swapchain, depth buffer, main pass and frame slots for
    /// `surface`.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] for an invalid `config` or a window with no
    /// area; [`RenderError::ObjectCreation`] when a GPU object cannot be
    /// created.
    pub fn new(
        device: SharedDevice,
        surface: vk::SurfaceKHR,
        window: Arc<dyn FramebufferSource>,
        config: RendererConfig,
    ) -> RenderResult<Self> {
        config.validate()?;
        let extent = framebuffer_extent(window.as_ref()).ok_or_else(|| {
            RenderError::Config("cannot create a renderer for a zero-sized window".to_string())
        })?;
        info!(
            "Initializing renderer ({}x{}, {} frames in flight)",
            extent.width, extent.height, config.frames_in_flight
        );

        let swapchain = Swapchain::new(
            device.clone(),
            surface,
            extent,
            &config.swapchain_preferences(),
            None,
        )
        .map_err(RenderError::creating("swapchain"))?;
        let depth_buffer = DepthBuffer::new(device.clone(), swapchain.extent(), config.depth_format)
            .map_err(RenderError::creating("depth buffer"))?;

        let mut main_pass = GeometryPass::new(RenderPassSettings {
            device: device.clone(),
            extent: swapchain.extent(),
            clear_color: config.clear_color,
            depth_clear: config.depth_clear,
        });
        main_pass.setup(&swapchain, &depth_buffer)?;

        let command_pool =
            CommandPool::new(device.clone()).map_err(RenderError::creating("command pool"))?;
        let frames = FrameSync::create_all(&device, &command_pool, config.frames_in_flight)
            .map_err(RenderError::creating("frame synchronization"))?;
        let descriptors = DescriptorManager::new(device.clone(), &config.descriptor_pool)?;

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight",
            swapchain.image_count(),
            frames.len()
        );

        Ok(Self {
            main_pass,
            depth_buffer,
            swapchain,
            frames,
            command_pool,
            descriptors,
            counter: FrameCounter::new(config.frames_in_flight),
            device,
            surface,
            window,
            config,
            resize_requested: false,
            generation: 0,
            timer: Timer::new(),
            context: None,
        })
    }

    /// Like [`Renderer::new`], taking ownership of the context so it is
    /// destroyed after everything created from it.
    pub fn with_context(
        context: GpuContext,
        window: Arc<dyn FramebufferSource>,
        config: RendererConfig,
    ) -> RenderResult<Self> {
        let mut renderer = Self::new(context.device(), context.surface_handle(), window, config)?;
        renderer.context = Some(context);
        Ok(renderer)
    }

    /// Waits for the current slot, acquires a swapchain image and begins
    /// recording.
    ///
    /// Returns `None` when there is nothing to render this time: the window
    /// has no area, or the swapchain was out of date and has been rebuilt.
    /// The frame counter does not move in that case.
    ///
    /// A returned frame holds an acquired swapchain image and must be passed
    /// to [`Renderer::end_render`] even if recording fails.
    pub fn begin_render(&mut self) -> RenderResult<Option<FrameContext>> {
        if self.resize_requested && !self.rebuild()? {
            return Ok(None);
        }

        let frame_index = self.counter.current();
        let frame = &self.frames[frame_index];
        frame.in_flight().wait(u64::MAX)?;

        let image_index = match self
            .swapchain
            .acquire_next_image(frame.image_available().handle())
        {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("Acquire reported a suboptimal swapchain");
                    self.resize_requested = true;
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire, rebuilding");
                self.rebuild()?;
                return Ok(None);
            }
            Err(e) => return Err(RhiError::VulkanError(e).into()),
        };

        let command_buffer = frame.command_buffer().clone();
        command_buffer.reset()?;
        command_buffer.begin()?;

        Ok(Some(FrameContext {
            frame_index,
            image_index,
            generation: self.generation,
            command_buffer,
            extent: self.swapchain.extent(),
        }))
    }

    /// Ends recording, submits and presents the frame, then moves to the
    /// next slot. Rebuilds the swapchain if presentation reported it stale
    /// or a resize was requested.
    pub fn end_render(&mut self, frame: FrameContext) -> RenderResult<()> {
        if frame.frame_index != self.counter.current() || frame.generation != self.generation {
            return Err(RenderError::Config(format!(
                "frame {} does not belong to the current slot {}",
                frame.frame_index,
                self.counter.current()
            )));
        }
        let sync = &self.frames[frame.frame_index];
        frame.command_buffer.end()?;

        // Reset only once the submission that signals it is certain.
        sync.in_flight().reset()?;

        let wait_semaphores = [sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished().handle()];
        let command_buffers = [frame.command_buffer.handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        self.device
            .queue_submit(&[submit_info], sync.in_flight().handle())?;

        let stale = match self
            .swapchain
            .present(frame.image_index, sync.render_finished().handle())
        {
            Ok(suboptimal) => {
                if suboptimal {
                    debug!("Present reported a suboptimal swapchain");
                }
                suboptimal
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
                debug!("Swapchain out of date during present");
                true
            }
            Err(e) => return Err(RhiError::VulkanError(e).into()),
        };

        self.counter.advance();
        self.timer.tick();

        if stale || self.resize_requested {
            self.rebuild()?;
        }
        Ok(())
    }

    /// Renders one frame with `content` drawn in the main pass.
    ///
    /// Returns whether a frame was submitted. When `content` fails, whatever
    /// it recorded is still submitted and presented so the acquired image
    /// and its semaphore are handed back, then the content's error is
    /// returned.
    pub fn render_frame(&mut self, content: &mut dyn PassRenderer) -> RenderResult<bool> {
        let Some(frame) = self.begin_render()? else {
            return Ok(false);
        };
        let recorded = self.main_pass.render(
            frame.command_buffer(),
            frame.frame_index(),
            frame.image_index(),
            content,
        );
        if let Err(e) = &recorded {
            warn!("Frame content failed, presenting the partial frame: {}", e);
        }
        self.end_render(frame)?;
        recorded.map(|()| true)
    }

    /// Rebuilds the swapchain and everything sized by it.
    ///
    /// Returns `false`, leaving a resize pending, while the window has no
    /// area.
    fn rebuild(&mut self) -> RenderResult<bool> {
        let Some(extent) = framebuffer_extent(self.window.as_ref()) else {
            debug!("Window has no area, postponing swapchain rebuild");
            self.resize_requested = true;
            return Ok(false);
        };

        self.device.wait_idle()?;

        // Framebuffers reference the old views and depth buffer.
        self.main_pass.pass_mut().reset_attachments();

        let swapchain = Swapchain::new(
            self.device.clone(),
            self.surface,
            extent,
            &self.config.swapchain_preferences(),
            Some(&self.swapchain),
        )
        .map_err(RenderError::creating("swapchain"))?;
        self.swapchain = swapchain;

        self.depth_buffer = DepthBuffer::new(
            self.device.clone(),
            self.swapchain.extent(),
            self.config.depth_format,
        )
        .map_err(RenderError::creating("depth buffer"))?;
        self.main_pass.setup(&self.swapchain, &self.depth_buffer)?;

        self.generation += 1;
        self.resize_requested = false;
        info!(
            "Swapchain rebuilt: {}x{}, {} images (generation {})",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.swapchain.image_count(),
            self.generation
        );
        Ok(true)
    }

    /// Rebuilds the swapchain before the next frame.
    pub fn request_resize(&mut self) {
        debug!("Resize requested");
        self.resize_requested = true;
    }

    #[inline]
    pub fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Layout cache and pool sized by [`RendererConfig::descriptor_pool`].
    #[inline]
    pub fn descriptor_manager(&self) -> &DescriptorManager {
        &self.descriptors
    }

    #[inline]
    pub fn descriptor_manager_mut(&mut self) -> &mut DescriptorManager {
        &mut self.descriptors
    }

    /// The presenting pass.
    #[inline]
    pub fn render_pass(&self) -> &RenderPass {
        self.main_pass.pass()
    }

    #[inline]
    pub fn render_pass_mut(&mut self) -> &mut RenderPass {
        self.main_pass.pass_mut()
    }

    #[inline]
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    #[inline]
    pub fn depth_buffer(&self) -> &DepthBuffer {
        &self.depth_buffer
    }

    /// Slot the next frame will use.
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.counter.current()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.counter.frames_in_flight()
    }

    /// Incremented on every swapchain rebuild.
    #[inline]
    pub fn swapchain_generation(&self) -> u64 {
        self.generation
    }

    pub fn device_limits(&self) -> DeviceLimits {
        self.device.limits()
    }

    /// Rounds `size` up to the device's uniform buffer offset alignment.
    pub fn pad_uniform_buffer_size(&self, size: vk::DeviceSize) -> vk::DeviceSize {
        self.device.limits().pad_uniform_buffer_size(size)
    }

    /// Time between the last two presented frames.
    #[inline]
    pub fn frame_time(&self) -> Duration {
        self.timer.last_delta()
    }

    #[inline]
    pub fn device(&self) -> &SharedDevice {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {}", e);
        }
        info!("Renderer destroyed");
    }
}

fn framebuffer_extent(window: &dyn FramebufferSource) -> Option<vk::Extent2D> {
    match window.framebuffer_size() {
        (0, _) | (_, 0) => None,
        (width, height) => Some(vk::Extent2D { width, height }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use lumen_rhi::mock::{MockDevice, MockObject};
    use lumen_rhi::vk::Handle;

    use super::*;
    use crate::config::DescriptorPoolConfig;
    use crate::descriptor_manager::{DescriptorSetLayoutInfo, LayoutBinding};
    use crate::render_pass::PassContext;

    struct TestWindow(AtomicU64);

    impl TestWindow {
        fn new(width: u32, height: u32) -> Arc<Self> {
            let window = Arc::new(Self(AtomicU64::new(0)));
            window.resize(width, height);
            window
        }

        fn resize(&self, width: u32, height: u32) {
            self.0
                .store((u64::from(width) << 32) | u64::from(height), Ordering::Relaxed);
        }
    }

    impl FramebufferSource for TestWindow {
        fn framebuffer_size(&self) -> (u32, u32) {
            let packed = self.0.load(Ordering::Relaxed);
            ((packed >> 32) as u32, packed as u32)
        }
    }

    fn renderer(device: &Arc<MockDevice>, window: &Arc<TestWindow>) -> Renderer {
        Renderer::new(
            device.clone(),
            vk::SurfaceKHR::from_raw(1),
            window.clone(),
            RendererConfig::default(),
        )
        .unwrap()
    }

    fn noop() -> impl FnMut(&PassContext<'_>) -> RenderResult<()> {
        |_: &PassContext<'_>| -> RenderResult<()> { Ok(()) }
    }

    #[test]
    fn test_new_creates_swapchain_resources() {
        let device = Arc::new(MockDevice::new());
        let window = TestWindow::new(800, 600);
        let renderer = renderer(&device, &window);

        assert_eq!(
            renderer.swapchain_extent(),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
        assert_eq!(renderer.swapchain_format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(renderer.render_pass().framebuffer_count(), 3);
        assert_eq!(renderer.frames_in_flight(), 2);
        assert_eq!(device.created(MockObject::Fence), 2);
        assert_eq!(renderer.pad_uniform_buffer_size(100), 256);
    }

    #[test]
    fn test_zero_sized_window_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let result = Renderer::new(
            device.clone(),
            vk::SurfaceKHR::from_raw(1),
            TestWindow::new(0, 600),
            RendererConfig::default(),
        );
        assert!(matches!(result, Err(RenderError::Config(_))));
    }

    #[test]
    fn test_frame_submits_and_presents() {
        let device = Arc::new(MockDevice::new());
        let window = TestWindow::new(640, 480);
        let mut renderer = renderer(&device, &window);

        assert!(renderer.render_frame(&mut noop()).unwrap());
        assert_eq!(renderer.current_frame(), 1);

        let submit = &device.submissions()[0];
        assert_eq!(
            submit.wait_stages,
            vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
        );
        assert_eq!(submit.signal_semaphores.len(), 1);
        let present = &device.presents()[0];
        assert_eq!(present.wait_semaphore, submit.signal_semaphores[0]);
        assert_eq!(present.image_index, 0);
    }

    #[test]
    fn test_mismatched_frame_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let window = TestWindow::new(640, 480);
        let mut renderer = renderer(&device, &window);

        let frame = renderer.begin_render().unwrap().unwrap();
        renderer.end_render(frame).unwrap();
        let stale = renderer.begin_render().unwrap().unwrap();
        let forged = FrameContext {
            frame_index: 0,
            image_index: stale.image_index,
            generation: stale.generation,
            command_buffer: stale.command_buffer.clone(),
            extent: stale.extent,
        };
        assert!(matches!(renderer.end_render(forged), Err(RenderError::Config(_))));
        renderer.end_render(stale).unwrap();
    }

    #[test]
    fn test_suboptimal_present_rebuilds_after_frame() {
        let device = Arc::new(MockDevice::new());
        let window = TestWindow::new(640, 480);
        let mut renderer = renderer(&device, &window);

        device.push_present_result(vk::Result::SUBOPTIMAL_KHR);
        window.resize(1024, 768);
        assert!(renderer.render_frame(&mut noop()).unwrap());

        assert_eq!(renderer.swapchain_generation(), 1);
        assert_eq!(renderer.swapchain_extent().width, 1024);
        assert_eq!(renderer.depth_buffer().extent().height, 768);
        assert_eq!(renderer.current_frame(), 1);
        assert_eq!(device.live(MockObject::Swapchain), 1);
    }

    #[test]
    fn test_requested_resize_waits_for_nonzero_size() {
        let device = Arc::new(MockDevice::new());
        let window = TestWindow::new(640, 480);
        let mut renderer = renderer(&device, &window);

        window.resize(0, 0);
        renderer.request_resize();
        assert!(renderer.begin_render().unwrap().is_none());
        assert!(!renderer.render_frame(&mut noop()).unwrap());
        assert_eq!(renderer.current_frame(), 0);
        assert_eq!(renderer.swapchain_generation(), 0);

        window.resize(320, 200);
        assert!(renderer.render_frame(&mut noop()).unwrap());
        assert_eq!(renderer.swapchain_generation(), 1);
        assert_eq!(renderer.swapchain_extent().height, 200);
    }

    #[test]
    fn test_descriptor_pool_follows_config() {
        let device = Arc::new(MockDevice::new());
        let window = TestWindow::new(640, 480);
        let config = RendererConfig {
            descriptor_pool: DescriptorPoolConfig {
                max_sets: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut renderer =
            Renderer::new(device.clone(), vk::SurfaceKHR::from_raw(1), window.clone(), config).unwrap();
        assert_eq!(device.created(MockObject::DescriptorPool), 1);

        let descriptors = renderer.descriptor_manager_mut();
        let layout = descriptors
            .get_descriptor_set_layout(&DescriptorSetLayoutInfo::new(
                0,
                vec![LayoutBinding::uniform_buffer(0, vk::ShaderStageFlags::VERTEX)],
            ))
            .unwrap();
        let per_frame = descriptors.allocate_descriptor_sets(layout, 2).unwrap();
        assert!(matches!(
            renderer.descriptor_manager().allocate_descriptor_sets(layout, 1),
            Err(RenderError::Config(_))
        ));
        drop(per_frame);
    }

    #[test]
    fn test_drop_waits_idle_and_releases_everything() {
        let device = Arc::new(MockDevice::new());
        let window = TestWindow::new(640, 480);
        let mut renderer = renderer(&device, &window);
        renderer.render_frame(&mut noop()).unwrap();

        drop(renderer);
        assert!(device.idle_waits() >= 1);
        for kind in [
            MockObject::Fence,
            MockObject::Semaphore,
            MockObject::Framebuffer,
            MockObject::RenderPass,
            MockObject::ImageView,
            MockObject::Image,
            MockObject::Swapchain,
            MockObject::CommandPool,
            MockObject::DescriptorPool,
        ] {
            assert_eq!(device.live(kind), 0, "{kind:?} leaked");
        }
    }
}
