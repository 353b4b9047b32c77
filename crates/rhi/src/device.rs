//! Vulkan logical device, queues and the [`GpuDevice`] trait.
//!
//! [`GpuDevice`] is the single seam between the frame engine and the GPU.
//! Object creation, command recording, queue submission and presentation
//! all go through it, so the engine can run against the ash-backed
//! [`Device`] or against an in-memory implementation in tests.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::instance::Instance;
//! use lumen_rhi::physical_device::select_physical_device;
//! use lumen_rhi::device::{Device, GpuDevice};
//! use ash::vk;
//!
//! # fn display() -> raw_window_handle::RawDisplayHandle { unimplemented!() }
//! let instance = Instance::new(false, display()).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//!
//! let physical_device_info = select_physical_device(&instance, surface)
//!     .expect("No suitable GPU found");
//!
//! let device = Device::new(&instance, &physical_device_info)
//!     .expect("Failed to create logical device");
//! println!("min UBO alignment: {}", device.limits().min_uniform_buffer_offset_alignment);
//! ```

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use crate::swapchain::SwapchainSupportDetails;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Physical-device limits the frame engine consults.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceLimits {
    /// Required alignment of dynamic uniform buffer offsets.
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    /// Largest supported sampler anisotropy (1.0 when unsupported).
    pub max_sampler_anisotropy: f32,
    /// Largest framebuffer width.
    pub max_framebuffer_width: u32,
    /// Largest framebuffer height.
    pub max_framebuffer_height: u32,
}

impl DeviceLimits {
    /// Extracts the limits the engine cares about from device properties.
    pub fn from_properties(
        properties: &vk::PhysicalDeviceProperties,
        features: &vk::PhysicalDeviceFeatures,
    ) -> Self {
        let limits = &properties.limits;
        Self {
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            max_sampler_anisotropy: if features.sampler_anisotropy == vk::TRUE {
                limits.max_sampler_anisotropy
            } else {
                1.0
            },
            max_framebuffer_width: limits.max_framebuffer_width,
            max_framebuffer_height: limits.max_framebuffer_height,
        }
    }

    /// Rounds `size` up to the uniform buffer offset alignment.
    pub fn pad_uniform_buffer_size(&self, size: vk::DeviceSize) -> vk::DeviceSize {
        let alignment = self.min_uniform_buffer_offset_alignment;
        if alignment > 0 {
            (size + alignment - 1) & !(alignment - 1)
        } else {
            size
        }
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            max_sampler_anisotropy: 16.0,
            max_framebuffer_width: 16384,
            max_framebuffer_height: 16384,
        }
    }
}

/// Shared, type-erased device handle.
pub type SharedDevice = Arc<dyn GpuDevice>;

/// Everything the frame engine asks of a GPU device.
///
/// Creation methods return Vulkan handles; the caller owns them and must
/// give them back through the matching `destroy_*` method (usually via
/// [`Owned`](crate::Owned)). `cmd_*` methods record into a command buffer
/// that is in the recording state.
pub trait GpuDevice: Send + Sync {
    /// Limits of the physical device backing this device.
    fn limits(&self) -> DeviceLimits;

    /// Queue families used for graphics and presentation.
    fn queue_families(&self) -> QueueFamilyIndices;

    /// Blocks until every queue is idle.
    fn wait_idle(&self) -> RhiResult<()>;

    // Images

    /// Creates an image and binds freshly allocated memory to it.
    fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> RhiResult<vk::Image>;
    /// Destroys an image created by [`GpuDevice::create_image`] and frees its memory.
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    // Render passes

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo<'_>)
    -> RhiResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>)
    -> RhiResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Descriptors

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> RhiResult<Vec<vk::DescriptorSet>>;
    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> RhiResult<()>;
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);

    // Pipelines

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Synchronization

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()>;
    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool>;
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Command buffers

    /// Creates a command pool on the graphics queue family.
    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags)
    -> RhiResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
    );
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );
    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    );
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    // Queues and presentation

    /// Submits to the graphics queue, signaling `fence` on completion.
    fn queue_submit(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> RhiResult<()>;

    /// Queries what `surface` supports on this device.
    fn surface_support(&self, surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails>;
    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    /// Acquires the next presentable image.
    ///
    /// Returns `(image_index, suboptimal)`. Out-of-date surfaces are reported
    /// as `Err(vk::Result::ERROR_OUT_OF_DATE_KHR)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;

    /// Presents `image_index` on the present queue once `wait_semaphore` fires.
    ///
    /// Returns `true` when the swapchain is suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result>;
}

/// Vulkan logical device wrapper.
///
/// Owns the logical device, its queues, the swapchain and surface extension
/// loaders and the GPU memory allocator.
///
/// # Thread Safety
///
/// The [`Device`] is designed to be shared across threads using `Arc`. The
/// allocator and the image allocation table are each behind a `Mutex`.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// Surface extension loader (instance level).
    surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader.
    swapchain_loader: ash::khr::swapchain::Device,
    /// GPU memory allocator. Dropped before the device.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Allocations backing images created through [`GpuDevice::create_image`].
    image_allocations: Mutex<HashMap<vk::Image, Allocation>>,
    /// Graphics queue handle.
    graphics_queue: vk::Queue,
    /// Presentation queue handle.
    present_queue: vk::Queue,
    /// Queue family indices.
    queue_families: QueueFamilyIndices,
    limits: DeviceLimits,
}

impl Device {
    /// Creates a new logical device with the swapchain extension enabled
    /// and initializes the gpu-allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the physical device lacks graphics or present
    /// queues, device creation fails or the allocator cannot be created.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(physical_device_info.features.sampler_anisotropy == vk::TRUE);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), &device);

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            surface_loader,
            swapchain_loader,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            image_allocations: Mutex::new(HashMap::new()),
            graphics_queue,
            present_queue,
            queue_families,
            limits: DeviceLimits::from_properties(
                &physical_device_info.properties,
                &physical_device_info.features,
            ),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns a reference to the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }
}

impl GpuDevice for Device {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn create_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> RhiResult<vk::Image> {
        let image = unsafe { self.device.create_image(info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self
            .allocator
            .lock()
            .expect("allocator mutex poisoned")
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            unsafe { self.device.destroy_image(image, None) };
            if let Err(free_err) = self
                .allocator
                .lock()
                .expect("allocator mutex poisoned")
                .free(allocation)
            {
                error!("Failed to free image memory for '{}': {}", name, free_err);
            }
            return Err(e.into());
        }

        debug!(
            "Image '{}' created ({}x{}, {:?})",
            name, info.extent.width, info.extent.height, info.format
        );

        self.image_allocations
            .lock()
            .expect("image allocation table poisoned")
            .insert(image, allocation);
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
        let allocation = self
            .image_allocations
            .lock()
            .expect("image allocation table poisoned")
            .remove(&image);
        if let Some(allocation) = allocation
            && let Err(e) = self
                .allocator
                .lock()
                .expect("allocator mutex poisoned")
                .free(allocation)
        {
            error!("Failed to free image memory: {}", e);
        }
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView> {
        Ok(unsafe { self.device.create_image_view(info, None)? })
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> RhiResult<vk::RenderPass> {
        Ok(unsafe { self.device.create_render_pass(info, None)? })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> RhiResult<vk::Framebuffer> {
        Ok(unsafe { self.device.create_framebuffer(info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        Ok(unsafe { self.device.create_descriptor_set_layout(info, None)? })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        info: &vk::DescriptorPoolCreateInfo<'_>,
    ) -> RhiResult<vk::DescriptorPool> {
        Ok(unsafe { self.device.create_descriptor_pool(info, None)? })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        Ok(unsafe { self.device.allocate_descriptor_sets(info)? })
    }

    fn free_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        sets: &[vk::DescriptorSet],
    ) -> RhiResult<()> {
        unsafe { self.device.free_descriptor_sets(pool, sets)? };
        Ok(())
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        unsafe { self.device.update_descriptor_sets(writes, &[]) };
    }

    fn create_shader_module(&self, code: &[u32]) -> RhiResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(|e| RhiError::ShaderError(format!("Failed to create shader module: {e}")))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(
        &self,
        info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> RhiResult<vk::PipelineLayout> {
        Ok(unsafe { self.device.create_pipeline_layout(info, None)? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> RhiResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
                .map_err(|(_, e)| {
                    RhiError::PipelineError(format!("Failed to create graphics pipeline: {e}"))
                })?
        };
        pipelines.into_iter().next().ok_or_else(|| {
            RhiError::PipelineError("Driver returned no graphics pipeline".to_string())
        })
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device.create_fence(&create_info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> RhiResult<()> {
        unsafe { self.device.wait_for_fences(fences, true, timeout)? };
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> RhiResult<()> {
        unsafe { self.device.reset_fences(fences)? };
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RhiResult<bool> {
        Ok(unsafe { self.device.get_fence_status(fence)? })
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device.create_semaphore(&create_info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_command_pool(
        &self,
        flags: vk::CommandPoolCreateFlags,
    ) -> RhiResult<vk::CommandPool> {
        let queue_family_index = self
            .queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(flags)
            .queue_family_index(queue_family_index);
        Ok(unsafe { self.device.create_command_pool(&create_info, None)? })
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.allocate_command_buffers(&allocate_info)? })
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?
        };
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer)? };
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo<'_>,
    ) {
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) };
    }

    fn cmd_set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(command_buffer, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(command_buffer, 0, &[scissor]) };
    }

    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, bind_point, pipeline)
        };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                bind_point,
                layout,
                first_set,
                sets,
                dynamic_offsets,
            )
        };
    }

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: vk::CommandBuffer,
        first_binding: u32,
        buffers: &[vk::Buffer],
        offsets: &[vk::DeviceSize],
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(command_buffer, first_binding, buffers, offsets)
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(command_buffer, buffer, offset, index_type)
        };
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(command_buffer, layout, stages, offset, data)
        };
    }

    fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        };
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                command_buffer,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            )
        };
    }

    fn queue_submit(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submits, fence)?
        };
        Ok(())
    }

    fn surface_support(&self, surface: vk::SurfaceKHR) -> RhiResult<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(self.physical_device, surface, &self.surface_loader)
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> RhiResult<vk::SwapchainKHR> {
        Ok(unsafe { self.swapchain_loader.create_swapchain(info, None)? })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            let leaked = self
                .image_allocations
                .get_mut()
                .map(|allocations| allocations.len())
                .unwrap_or(0);
            if leaked > 0 {
                error!("{} image allocation(s) still alive at device drop", leaked);
            }

            // The allocator must release its memory blocks while the device is alive.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device and the extension loaders are function tables plus
// handles; the allocator and allocation table are behind mutexes.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert_eq!(DEVICE_EXTENSIONS, &[ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }

    #[test]
    fn test_gpu_device_is_object_safe() {
        fn takes_shared(_: Option<SharedDevice>) {}
        takes_shared(None);
    }

    #[test]
    fn test_pad_uniform_buffer_size() {
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: 64,
            ..Default::default()
        };
        assert_eq!(limits.pad_uniform_buffer_size(0), 0);
        assert_eq!(limits.pad_uniform_buffer_size(1), 64);
        assert_eq!(limits.pad_uniform_buffer_size(64), 64);
        assert_eq!(limits.pad_uniform_buffer_size(65), 128);

        let unaligned = DeviceLimits {
            min_uniform_buffer_offset_alignment: 0,
            ..Default::default()
        };
        assert_eq!(unaligned.pad_uniform_buffer_size(100), 100);
    }

    #[test]
    fn test_limits_without_anisotropy() {
        let properties = vk::PhysicalDeviceProperties::default();
        let features = vk::PhysicalDeviceFeatures::default();
        let limits = DeviceLimits::from_properties(&properties, &features);
        assert_eq!(limits.max_sampler_anisotropy, 1.0);
    }
}
