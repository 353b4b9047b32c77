//! In-memory [`GpuDevice`] for tests.
//!
//! `MockDevice` hands out unique fake handles, counts creations and
//! destructions per object kind, records command buffers, submissions,
//! fence waits and presents, and models the parts of Vulkan's validity
//! rules the frame engine relies on: fences signal only after the work
//! they guard was waited for, a command buffer cannot be reset while a
//! pending submission still references it, descriptor pools run out.
//!
//! Acquire and present results can be scripted to simulate out-of-date or
//! suboptimal surfaces.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;

use crate::device::{DeviceLimits, GpuDevice};
use crate::error::{RhiError, RhiResult};
use crate::physical_device::QueueFamilyIndices;
use crate::swapchain::SwapchainSupportDetails;

/// Object kinds tracked by the mock's creation/destruction counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockObject {
    Image,
    ImageView,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    Fence,
    Semaphore,
    CommandPool,
    CommandBuffer,
    Swapchain,
}

/// A command recorded into a command buffer.
#[derive(Clone, Debug)]
pub enum MockCommand {
    Reset,
    Begin,
    End,
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        /// Clear values viewed as `float32[4]` (a depth clear reads as `[depth, stencil bits, 0, 0]`).
        clear_values: Vec<[f32; 4]>,
    },
    EndRenderPass,
    SetViewport {
        width: f32,
        height: f32,
    },
    SetScissor(vk::Rect2D),
    BindPipeline(vk::Pipeline),
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: Vec<vk::DescriptorSet>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<vk::Buffer>,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    },
    PushConstants {
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
}

/// Summary of a created render pass.
#[derive(Clone, Debug)]
pub struct RenderPassRecord {
    pub handle: vk::RenderPass,
    pub formats: Vec<vk::Format>,
    pub final_layouts: Vec<vk::ImageLayout>,
    pub color_attachments: Vec<u32>,
    pub depth_attachment: Option<u32>,
    pub input_attachments: Vec<u32>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Summary of a created framebuffer.
#[derive(Clone, Debug)]
pub struct FramebufferRecord {
    pub handle: vk::Framebuffer,
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub width: u32,
    pub height: u32,
}

/// Summary of a created graphics pipeline.
#[derive(Clone, Debug)]
pub struct PipelineRecord {
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    pub stage_count: u32,
    pub vertex_bindings: u32,
    pub vertex_attributes: u32,
    pub depth_compare_op: Option<vk::CompareOp>,
}

/// Summary of a created image.
#[derive(Clone, Debug)]
pub struct ImageRecord {
    pub handle: vk::Image,
    pub name: String,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
}

/// Summary of a created swapchain.
#[derive(Clone, Debug)]
pub struct SwapchainRecord {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// One queue submission.
#[derive(Clone, Debug)]
pub struct SubmitRecord {
    /// Monotonic submission number, starting at 1.
    pub serial: u64,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// One fence observed by a `wait_for_fences` call.
#[derive(Clone, Debug)]
pub struct FenceWaitRecord {
    pub fence: vk::Fence,
    /// Submission the wait blocked on, `None` if the fence was already signaled.
    pub blocked_on: Option<u64>,
    /// Latest submission serial at the time of the wait.
    pub latest_submission: u64,
}

/// One `queue_present` call.
#[derive(Clone, Debug)]
pub struct PresentRecord {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
    pub result: vk::Result,
}

#[derive(Clone, Debug)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending {
        serial: u64,
        command_buffers: Vec<vk::CommandBuffer>,
    },
}

#[derive(Debug)]
struct PoolState {
    max_sets: u32,
    allocated: u32,
}

#[derive(Debug)]
struct SwapchainState {
    images: Vec<vk::Image>,
    next_image: u32,
}

#[derive(Default)]
struct State {
    next_raw: u64,
    created: HashMap<MockObject, usize>,
    destroyed: HashMap<MockObject, usize>,
    failures: HashMap<MockObject, vk::Result>,

    fences: HashMap<vk::Fence, FenceState>,
    max_pending_fences: usize,
    /// Binary semaphores with a signal nobody has waited on yet.
    signaled_semaphores: HashSet<vk::Semaphore>,
    submissions: Vec<SubmitRecord>,
    fence_waits: Vec<FenceWaitRecord>,
    idle_waits: usize,

    recording: HashMap<vk::CommandBuffer, bool>,
    commands: Vec<(vk::CommandBuffer, MockCommand)>,

    live_render_passes: HashMap<vk::RenderPass, usize>,
    render_passes: Vec<RenderPassRecord>,
    framebuffers: Vec<FramebufferRecord>,
    pipelines: Vec<PipelineRecord>,
    images: Vec<ImageRecord>,

    pools: HashMap<vk::DescriptorPool, PoolState>,
    set_pools: HashMap<vk::DescriptorSet, vk::DescriptorPool>,
    descriptor_writes: usize,

    support: Option<SwapchainSupportDetails>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainState>,
    swapchain_records: Vec<SwapchainRecord>,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    presents: Vec<PresentRecord>,
}

impl State {
    fn create(&mut self, kind: MockObject) -> RhiResult<u64> {
        if let Some(result) = self.failures.remove(&kind) {
            return Err(RhiError::VulkanError(result));
        }
        *self.created.entry(kind).or_default() += 1;
        self.next_raw += 1;
        Ok(0x1000 + self.next_raw)
    }

    fn destroy(&mut self, kind: MockObject) {
        *self.destroyed.entry(kind).or_default() += 1;
    }

    fn pending_fences(&self) -> usize {
        self.fences
            .values()
            .filter(|state| matches!(state, FenceState::Pending { .. }))
            .count()
    }

    fn is_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.signaled_semaphores.contains(&semaphore)
    }

    fn record(&mut self, command_buffer: vk::CommandBuffer, command: MockCommand) {
        self.commands.push((command_buffer, command));
    }
}

/// Reads a Vulkan `(pointer, count)` pair as a slice.
///
/// # Safety
///
/// `ptr` must be null or point at `len` initialized values that outlive `'a`.
unsafe fn raw_slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }
    }
}

/// The default surface: 2..=3 images, window-sized extent, sRGB BGRA, FIFO and MAILBOX.
pub fn default_surface_support() -> SwapchainSupportDetails {
    SwapchainSupportDetails {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

/// In-memory GPU device.
pub struct MockDevice {
    limits: DeviceLimits,
    state: Mutex<State>,
}

impl MockDevice {
    /// Creates a mock with default limits and the default surface.
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// Creates a mock reporting `limits`.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("mock device state poisoned")
    }

    /// Number of objects of `kind` created so far.
    pub fn created(&self, kind: MockObject) -> usize {
        self.state().created.get(&kind).copied().unwrap_or(0)
    }

    /// Number of objects of `kind` destroyed so far.
    pub fn destroyed(&self, kind: MockObject) -> usize {
        self.state().destroyed.get(&kind).copied().unwrap_or(0)
    }

    /// Objects of `kind` created and not yet destroyed.
    pub fn live(&self, kind: MockObject) -> usize {
        self.created(kind).saturating_sub(self.destroyed(kind))
    }

    /// Makes the next creation of `kind` fail with `result`.
    pub fn fail_next(&self, kind: MockObject, result: vk::Result) {
        self.state().failures.insert(kind, result);
    }

    /// Replaces what `surface_support` reports.
    pub fn set_surface_support(&self, support: SwapchainSupportDetails) {
        self.state().support = Some(support);
    }

    /// Pins the surface's current extent, as a compositor does on most platforms.
    pub fn set_current_extent(&self, width: u32, height: u32) {
        let mut state = self.state();
        let mut support = state.support.take().unwrap_or_else(default_surface_support);
        support.capabilities.current_extent = vk::Extent2D { width, height };
        state.support = Some(support);
    }

    /// Queues a result for an upcoming `acquire_next_image` call.
    ///
    /// Error codes fail the call; `SUBOPTIMAL_KHR` succeeds but reports the
    /// swapchain as suboptimal; `SUCCESS` behaves normally.
    pub fn push_acquire_result(&self, result: vk::Result) {
        self.state().acquire_script.push_back(result);
    }

    /// Queues a result for an upcoming `queue_present` call.
    pub fn push_present_result(&self, result: vk::Result) {
        self.state().present_script.push_back(result);
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state().submissions.clone()
    }

    pub fn fence_waits(&self) -> Vec<FenceWaitRecord> {
        self.state().fence_waits.clone()
    }

    /// Fences submitted and not yet waited for.
    pub fn pending_fences(&self) -> usize {
        self.state().pending_fences()
    }

    /// Whether `semaphore` holds a signal that no wait has consumed.
    pub fn semaphore_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state().is_signaled(semaphore)
    }

    /// Highest number of simultaneously pending fences seen.
    pub fn max_pending_fences(&self) -> usize {
        self.state().max_pending_fences
    }

    pub fn idle_waits(&self) -> usize {
        self.state().idle_waits
    }

    /// All recorded commands, in recording order.
    pub fn commands(&self) -> Vec<(vk::CommandBuffer, MockCommand)> {
        self.state().commands.clone()
    }

    /// Commands recorded into `command_buffer`, in order.
    pub fn commands_for(&self, command_buffer: vk::CommandBuffer) -> Vec<MockCommand> {
        self.state()
            .commands
            .iter()
            .filter(|(cb, _)| *cb == command_buffer)
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    pub fn render_passes(&self) -> Vec<RenderPassRecord> {
        self.state().render_passes.clone()
    }

    pub fn framebuffers(&self) -> Vec<FramebufferRecord> {
        self.state().framebuffers.clone()
    }

    pub fn pipelines(&self) -> Vec<PipelineRecord> {
        self.state().pipelines.clone()
    }

    pub fn images(&self) -> Vec<ImageRecord> {
        self.state().images.clone()
    }

    pub fn swapchains(&self) -> Vec<SwapchainRecord> {
        self.state().swapchain_records.clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state().presents.clone()
    }

    /// Number of descriptor writes applied through `update_descriptor_sets`.
    pub fn descriptor_writes(&self) -> usize {
        self.state().descriptor_writes
    }

    /// Sets currently allocated from `pool`.
    pub fn allocated_sets(&self, pool: vk::DescriptorPool) -> u32 {
        self.state()
            .pools
            .get(&pool)
            .map(|pool| pool.allocated)
            .unwrap_or(0)
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn validation_failed() -> RhiError {
    RhiError::VulkanError(vk::Result::ERROR_VALIDATION_FAILED_EXT)
}

impl GpuDevice for MockDevice {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state();
        for fence in state.fences.values_mut() {
            if matches!(fence, FenceState::Pending { .. }) {
                *fence = FenceState::Signaled;
            }
        }
        state.idle_waits += 1;
        Ok(())
    }

    fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        _location: MemoryLocation,
        name: &str,
    ) -> RhiResult<vk::Image> {
        let mut state = self.state();
        let image = vk::Image::from_raw(state.create(MockObject::Image)?);
        state.images.push(ImageRecord {
            handle: image,
            name: name.to_string(),
            format: info.format,
            extent: info.extent,
            usage: info.usage,
        });
        Ok(image)
    }

    fn destroy_image(&self, _image: vk::Image) {
        self.state().destroy(MockObject::Image);
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(
            self.state().create(MockObject::ImageView)?,
        ))
    }

    fn destroy_image_view(&self, _view: vk::ImageView) {
        self.state().destroy(MockObject::ImageView);
    }

    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> RhiResult<vk::RenderPass> {
        let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) };
        let subpasses = unsafe { raw_slice(info.p_subpasses, info.subpass_count) };
        let dependencies = unsafe { raw_slice(info.p_dependencies, info.dependency_count) };
        let Some(subpass) = subpasses.first() else {
            return Err(validation_failed());
        };

        let color_attachments = unsafe {
            raw_slice(subpass.p_color_attachments, subpass.color_attachment_count)
        };
        let input_attachments = unsafe {
            raw_slice(subpass.p_input_attachments, subpass.input_attachment_count)
        };
        let depth_attachment = if subpass.p_depth_stencil_attachment.is_null() {
            None
        } else {
            Some(unsafe { (*subpass.p_depth_stencil_attachment).attachment })
        };

        let references = color_attachments
            .iter()
            .chain(input_attachments)
            .map(|reference| reference.attachment)
            .chain(depth_attachment);
        for index in references {
            if index as usize >= attachments.len() {
                return Err(validation_failed());
            }
        }

        let mut state = self.state();
        let handle = vk::RenderPass::from_raw(state.create(MockObject::RenderPass)?);
        state.live_render_passes.insert(handle, attachments.len());
        state.render_passes.push(RenderPassRecord {
            handle,
            formats: attachments.iter().map(|a| a.format).collect(),
            final_layouts: attachments.iter().map(|a| a.final_layout).collect(),
            color_attachments: color_attachments.iter().map(|r| r.attachment).collect(),
            depth_attachment,
            input_attachments: input_attachments.iter().map(|r| r.attachment).collect(),
            dependencies: dependencies.to_vec(),
        });
        Ok(handle)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut state = self.state();
        state.live_render_passes.remove(&render_pass);
        state.destroy(MockObject::RenderPass);
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> RhiResult<vk::Framebuffer> {
        let attachments = unsafe { raw_slice(info.p_attachments, info.attachment_count) };
        let mut state = self.state();
        match state.live_render_passes.get(&info.render_pass) {
            Some(&count) if count == attachments.len() => {}
            _ => return Err(validation_failed()),
        }
        let handle = vk::Framebuffer::from_raw(state.create(MockObject::Framebuffer)?);
        state.framebuffers.push(FramebufferRecord {
            handle,
            render_pass: info.render_pass,
            attachments: attachments.to_vec(),
            width: info.width,
            height: info.height,
        });
        Ok(handle)
    }

    fn destroy_framebuffer(&self, _framebuffer: vk::Framebuffer) {
        self.state().destroy(MockObject::Framebuffer);
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        Ok(vk::DescriptorSetLayout::from_raw(
            self.state().create(MockObject::DescriptorSetLayout)?,
        ))
    }

    fn destroy_descriptor_set_layout(&self, _layout: vk::DescriptorSetLayout) {
        self.state().destroy(MockObject::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool> {
        let mut state = self.state();
        let pool = vk::DescriptorPool::from_raw(state.create(MockObject::DescriptorPool)?);
        state.pools.insert(
            pool,
            PoolState {
                max_sets: info.max_sets,
                allocated: 0,
            },
        );
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        state.pools.remove(&pool);
        state.set_pools.retain(|_, owner| *owner != pool);
        state.destroy(MockObject::DescriptorPool);
    }

    fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let count = info.descriptor_set_count;
        if count == 0 {
            return Err(validation_failed());
        }
        let mut state = self.state();
        let Some(pool) = state.pools.get_mut(&info.descriptor_pool) else {
            return Err(validation_failed());
        };
        if pool.allocated + count > pool.max_sets {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        pool.allocated += count;

        let mut sets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let set = vk::DescriptorSet::from_raw(state.create(MockObject::DescriptorSet)?);
            state.set_pools.insert(set, info.descriptor_pool);
            sets.push(set);
        }
        Ok(sets)
    }

    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> RhiResult<()> {
        let mut state = self.state();
        for set in sets {
            if state.set_pools.remove(set) != Some(pool) {
                return Err(validation_failed());
            }
            if let Some(pool) = state.pools.get_mut(&pool) {
                pool.allocated -= 1;
            }
            state.destroy(MockObject::DescriptorSet);
        }
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        self.state().descriptor_writes += writes.len();
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        if code.is_empty() {
            return Err(RhiError::ShaderError("empty SPIR-V module".to_string()));
        }
        Ok(vk::ShaderModule::from_raw(
            self.state().create(MockObject::ShaderModule)?,
        ))
    }

    fn destroy_shader_module(&self, _module: vk::ShaderModule) {
        self.state().destroy(MockObject::ShaderModule);
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(
            self.state().create(MockObject::PipelineLayout)?,
        ))
    }

    fn destroy_pipeline_layout(&self, _layout: vk::PipelineLayout) {
        self.state().destroy(MockObject::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline> {
        let (vertex_bindings, vertex_attributes) = if info.p_vertex_input_state.is_null() {
            (0, 0)
        } else {
            let input = unsafe { &*info.p_vertex_input_state };
            (
                input.vertex_binding_description_count,
                input.vertex_attribute_description_count,
            )
        };
        let depth_compare_op = if info.p_depth_stencil_state.is_null() {
            None
        } else {
            let depth = unsafe { &*info.p_depth_stencil_state };
            (depth.depth_test_enable == vk::TRUE).then_some(depth.depth_compare_op)
        };

        let mut state = self.state();
        let handle = vk::Pipeline::from_raw(state.create(MockObject::Pipeline)?);
        state.pipelines.push(PipelineRecord {
            handle,
            layout: info.layout,
            render_pass: info.render_pass,
            subpass: info.subpass,
            stage_count: info.stage_count,
            vertex_bindings,
            vertex_attributes,
            depth_compare_op,
        });
        Ok(handle)
    }

    fn destroy_pipeline(&self, _pipeline: vk::Pipeline) {
        self.state().destroy(MockObject::Pipeline);
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state();
        let fence = vk::Fence::from_raw(state.create(MockObject::Fence)?);
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(fence, initial);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        state.fences.remove(&fence);
        state.destroy(MockObject::Fence);
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout: u64) -> RhiResult<()> {
        let mut state = self.state();
        let latest_submission = state.submissions.last().map_or(0, |s| s.serial);
        for &fence in fences {
            let blocked_on = match state.fences.get(&fence) {
                Some(FenceState::Signaled) => None,
                Some(FenceState::Pending { serial, .. }) => Some(*serial),
                // Nothing will ever signal it: a real device would hang here.
                Some(FenceState::Unsignaled) => {
                    return Err(RhiError::VulkanError(vk::Result::TIMEOUT));
                }
                None => return Err(RhiError::InvalidHandle(format!("{fence:?}"))),
            };
            state.fences.insert(fence, FenceState::Signaled);
            state.fence_waits.push(FenceWaitRecord {
                fence,
                blocked_on,
                latest_submission,
            });
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()> {
        let mut state = self.state();
        for fence in fences {
            match state.fences.get(fence) {
                Some(FenceState::Pending { .. }) => return Err(validation_failed()),
                Some(_) => {
                    state.fences.insert(*fence, FenceState::Unsignaled);
                }
                None => return Err(RhiError::InvalidHandle(format!("{fence:?}"))),
            }
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        match self.state().fences.get(&fence) {
            Some(state) => Ok(matches!(state, FenceState::Signaled)),
            None => Err(RhiError::InvalidHandle(format!("{fence:?}"))),
        }
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(
            self.state().create(MockObject::Semaphore)?,
        ))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state();
        state.signaled_semaphores.remove(&semaphore);
        state.destroy(MockObject::Semaphore);
    }

    fn create_command_pool(
        &self,
        _flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool> {
        Ok(vk::CommandPool::from_raw(
            self.state().create(MockObject::CommandPool)?,
        ))
    }

    fn destroy_command_pool(&self, _pool: vk::CommandPool) {
        self.state().destroy(MockObject::CommandPool);
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        (0..count)
            .map(|_| {
                let command_buffer =
                    vk::CommandBuffer::from_raw(state.create(MockObject::CommandBuffer)?);
                state.recording.insert(command_buffer, false);
                Ok(command_buffer)
            })
            .collect()
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        let in_flight = state.fences.values().any(|fence| match fence {
            FenceState::Pending {
                command_buffers, ..
            } => command_buffers.contains(&command_buffer),
            _ => false,
        });
        if in_flight {
            return Err(validation_failed());
        }
        state.recording.insert(command_buffer, false);
        state.record(command_buffer, MockCommand::Reset);
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let mut state = self.state();
        if state.recording.insert(command_buffer, true) == Some(true) {
            return Err(validation_failed());
        }
        state.record(command_buffer, MockCommand::Begin);
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        if state.recording.insert(command_buffer, false) != Some(true) {
            return Err(validation_failed());
        }
        state.record(command_buffer, MockCommand::End);
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
    ) {
        let clear_values = unsafe { raw_slice(info.p_clear_values, info.clear_value_count) };
        self.state().record(
            command_buffer,
            MockCommand::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                extent: info.render_area.extent,
                clear_values: clear_values
                    .iter()
                    .map(|value| unsafe { value.color.float32 })
                    .collect(),
            },
        );
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.state()
            .record(command_buffer, MockCommand::EndRenderPass);
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state().record(
            command_buffer,
            MockCommand::SetViewport {
                width: viewport.width,
                height: viewport.height,
            },
        );
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.state()
            .record(command_buffer, MockCommand::SetScissor(scissor));
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.state()
            .record(command_buffer, MockCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        _dynamic_offsets: &[u32],
    ) {
        self.state().record(
            command_buffer,
            MockCommand::BindDescriptorSets {
                layout,
                first_set,
                sets: sets.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        _offsets: &[vk::DeviceSize],
    ) {
        self.state().record(
            command_buffer,
            MockCommand::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.state().record(
            command_buffer,
            MockCommand::BindIndexBuffer { buffer, index_type },
        );
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.state().record(
            command_buffer,
            MockCommand::PushConstants {
                stages,
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.state().record(
            command_buffer,
            MockCommand::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.state().record(
            command_buffer,
            MockCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn queue_submit(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state();

        if fence != vk::Fence::null() {
            match state.fences.get(&fence) {
                Some(FenceState::Unsignaled) => {}
                Some(_) => return Err(validation_failed()),
                None => return Err(RhiError::InvalidHandle(format!("{fence:?}"))),
            }
        }

        let mut submitted = Vec::new();
        for submit in submits {
            let command_buffers =
                unsafe { raw_slice(submit.p_command_buffers, submit.command_buffer_count) };
            if command_buffers
                .iter()
                .any(|cb| state.recording.get(cb).copied().unwrap_or(false))
            {
                return Err(validation_failed());
            }

            // Waits consume a pending signal; signals need an unsignaled semaphore.
            let waits = unsafe { raw_slice(submit.p_wait_semaphores, submit.wait_semaphore_count) };
            let signals =
                unsafe { raw_slice(submit.p_signal_semaphores, submit.signal_semaphore_count) };
            if waits.iter().any(|s| !state.is_signaled(*s))
                || signals.iter().any(|s| state.is_signaled(*s) && !waits.contains(s))
            {
                return Err(validation_failed());
            }
            for semaphore in waits {
                state.signaled_semaphores.remove(semaphore);
            }
            state.signaled_semaphores.extend(signals.iter().copied());

            let serial = state.submissions.last().map_or(1, |s| s.serial + 1);
            state.submissions.push(SubmitRecord {
                serial,
                command_buffers: command_buffers.to_vec(),
                wait_semaphores: unsafe {
                    raw_slice(submit.p_wait_semaphores, submit.wait_semaphore_count)
                }
                .to_vec(),
                wait_stages: unsafe {
                    raw_slice(submit.p_wait_dst_stage_mask, submit.wait_semaphore_count)
                }
                .to_vec(),
                signal_semaphores: unsafe {
                    raw_slice(submit.p_signal_semaphores, submit.signal_semaphore_count)
                }
                .to_vec(),
                fence,
            });
            submitted.extend_from_slice(command_buffers);
        }

        if fence != vk::Fence::null() {
            let serial = state.submissions.last().map_or(0, |s| s.serial);
            state.fences.insert(
                fence,
                FenceState::Pending {
                    serial,
                    command_buffers: submitted,
                },
            );
            let pending = state.pending_fences();
            state.max_pending_fences = state.max_pending_fences.max(pending);
        }
        Ok(())
    }

    fn surface_support(&self, _surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails> {
        Ok(self
            .state()
            .support
            .clone()
            .unwrap_or_else(default_surface_support))
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR> {
        let mut state = self.state();
        let handle = vk::SwapchainKHR::from_raw(state.create(MockObject::Swapchain)?);

        let mut images = Vec::with_capacity(info.min_image_count as usize);
        for _ in 0..info.min_image_count {
            state.next_raw += 1;
            images.push(vk::Image::from_raw(0x1000 + state.next_raw));
        }
        state.swapchains.insert(
            handle,
            SwapchainState {
                images,
                next_image: 0,
            },
        );
        state.swapchain_records.push(SwapchainRecord {
            handle,
            format: info.image_format,
            extent: info.image_extent,
            min_image_count: info.min_image_count,
            present_mode: info.present_mode,
            old_swapchain: info.old_swapchain,
        });
        Ok(handle)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        state.swapchains.remove(&swapchain);
        state.destroy(MockObject::Swapchain);
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        self.state()
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or_else(|| RhiError::InvalidHandle(format!("{swapchain:?}")))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        let mut state = self.state();
        // A real driver would hang or misbehave here.
        if semaphore != vk::Semaphore::null() && state.is_signaled(semaphore) {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        let scripted = state.acquire_script.pop_front().unwrap_or(vk::Result::SUCCESS);
        if scripted.as_raw() < 0 {
            return Err(scripted);
        }
        let Some(chain) = state.swapchains.get_mut(&swapchain) else {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };
        let index = chain.next_image;
        chain.next_image = (index + 1) % chain.images.len().max(1) as u32;
        if semaphore != vk::Semaphore::null() {
            state.signaled_semaphores.insert(semaphore);
        }
        Ok((index, scripted == vk::Result::SUBOPTIMAL_KHR))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let mut state = self.state();
        let mut result = state.present_script.pop_front().unwrap_or(vk::Result::SUCCESS);
        if !state.swapchains.contains_key(&swapchain) {
            result = vk::Result::ERROR_SURFACE_LOST_KHR;
        }
        if wait_semaphore != vk::Semaphore::null() && !state.signaled_semaphores.remove(&wait_semaphore) {
            result = vk::Result::ERROR_VALIDATION_FAILED_EXT;
        }
        state.presents.push(PresentRecord {
            swapchain,
            image_index,
            wait_semaphore,
            result,
        });
        if result.as_raw() < 0 {
            Err(result)
        } else {
            Ok(result == vk::Result::SUBOPTIMAL_KHR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(device: &MockDevice, command_buffer: vk::CommandBuffer, fence: vk::Fence) {
        let command_buffers = [command_buffer];
        let info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        device.queue_submit(&[info], fence).unwrap();
    }

    #[test]
    fn test_handles_are_unique() {
        let device = MockDevice::new();
        let a = device.create_semaphore().unwrap();
        let b = device.create_semaphore().unwrap();
        assert_ne!(a, b);
        assert_eq!(device.created(MockObject::Semaphore), 2);
    }

    #[test]
    fn test_fence_lifecycle() {
        let device = MockDevice::new();
        let fence = device.create_fence(true).unwrap();
        let cb = device
            .allocate_command_buffers(vk::CommandPool::null(), 1)
            .unwrap()[0];

        // Signaled fences cannot be submitted.
        assert!(device.queue_submit(&[], fence).is_err());

        device.reset_fences(&[fence]).unwrap();
        device.begin_command_buffer(cb, vk::CommandBufferUsageFlags::empty()).unwrap();
        device.end_command_buffer(cb).unwrap();
        submit(&device, cb, fence);
        assert_eq!(device.pending_fences(), 1);
        assert!(!device.fence_signaled(fence).unwrap());

        // In-flight command buffers cannot be reset.
        assert!(device.reset_command_buffer(cb).is_err());

        device.wait_for_fences(&[fence], u64::MAX).unwrap();
        assert!(device.fence_signaled(fence).unwrap());
        assert_eq!(device.pending_fences(), 0);
        assert_eq!(device.fence_waits()[0].blocked_on, Some(1));
        device.reset_command_buffer(cb).unwrap();
    }

    #[test]
    fn test_waiting_on_unsubmitted_fence_times_out() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();
        let err = device.wait_for_fences(&[fence], u64::MAX).unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::TIMEOUT));
    }

    #[test]
    fn test_submit_rejects_recording_command_buffer() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();
        let cb = device
            .allocate_command_buffers(vk::CommandPool::null(), 1)
            .unwrap()[0];
        device.begin_command_buffer(cb, vk::CommandBufferUsageFlags::empty()).unwrap();

        let command_buffers = [cb];
        let info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        assert!(device.queue_submit(&[info], fence).is_err());
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let device = MockDevice::new();
        let pool = device
            .create_descriptor_pool(&vk::DescriptorPoolCreateInfo::default().max_sets(2))
            .unwrap();
        let layouts = [vk::DescriptorSetLayout::null(); 2];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = device.allocate_descriptor_sets(&info).unwrap();
        assert_eq!(device.allocated_sets(pool), 2);

        let err = device.allocate_descriptor_sets(&info).unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_OUT_OF_POOL_MEMORY));

        device.free_descriptor_sets(pool, &sets).unwrap();
        assert_eq!(device.allocated_sets(pool), 0);
    }

    #[test]
    fn test_scripted_acquire_and_present() {
        let device = MockDevice::new();
        let info = vk::SwapchainCreateInfoKHR::default().min_image_count(2);
        let swapchain = device.create_swapchain(&info).unwrap();
        let semaphore = vk::Semaphore::null();

        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore),
            Ok((0, false))
        );
        device.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
        device.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, semaphore),
            Ok((1, true))
        );

        device.push_present_result(vk::Result::SUBOPTIMAL_KHR);
        assert_eq!(device.queue_present(swapchain, 1, semaphore), Ok(true));
        assert_eq!(device.queue_present(swapchain, 0, semaphore), Ok(false));
        assert_eq!(device.presents().len(), 2);
    }

    #[test]
    fn test_binary_semaphores_pair_signals_with_waits() {
        let device = MockDevice::new();
        let info = vk::SwapchainCreateInfoKHR::default().min_image_count(2);
        let swapchain = device.create_swapchain(&info).unwrap();
        let image_available = device.create_semaphore().unwrap();
        let render_finished = device.create_semaphore().unwrap();
        let cb = device
            .allocate_command_buffers(vk::CommandPool::null(), 1)
            .unwrap()[0];

        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, image_available),
            Ok((0, false))
        );
        assert!(device.semaphore_signaled(image_available));
        // A second signal before anyone waited is rejected.
        assert_eq!(
            device.acquire_next_image(swapchain, u64::MAX, image_available),
            Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
        );

        // Waiting on a semaphore nothing signaled is rejected.
        let waits = [render_finished];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let bad = vk::SubmitInfo::default().wait_semaphores(&waits).wait_dst_stage_mask(&stages);
        assert!(device.queue_submit(&[bad], vk::Fence::null()).is_err());

        let waits = [image_available];
        let signals = [render_finished];
        let command_buffers = [cb];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signals);
        device.queue_submit(&[submit], vk::Fence::null()).unwrap();
        assert!(!device.semaphore_signaled(image_available));
        assert!(device.semaphore_signaled(render_finished));

        assert_eq!(device.queue_present(swapchain, 0, render_finished), Ok(false));
        assert!(!device.semaphore_signaled(render_finished));
        assert_eq!(
            device.queue_present(swapchain, 0, render_finished),
            Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
        );
    }

    #[test]
    fn test_fail_next_applies_once() {
        let device = MockDevice::new();
        device.fail_next(MockObject::Fence, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(device.create_fence(false).is_err());
        assert!(device.create_fence(false).is_ok());
        assert_eq!(device.created(MockObject::Fence), 1);
    }
}
