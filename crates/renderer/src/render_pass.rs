//! Render passes built from registered attachments.
//!
//! A [`RenderPass`] collects attachments by slot id, then [`RenderPass::build`]
//! turns them into a single-subpass Vulkan render pass plus one framebuffer
//! per swapchain image (or a single framebuffer when no attachment varies
//! per image). Each frame, [`RenderPass::render`] begins the pass on the
//! right framebuffer and hands a [`PassContext`] to the pass content.
//!
//! ```no_run
//! use ash::vk;
//! use lumen_renderer::render_pass::{PassContext, RenderPass, RenderPassSettings};
//! use lumen_renderer::attachment::{AttachmentHandle, present_description};
//! # fn example(
//! #     settings: RenderPassSettings,
//! #     views: &[vk::ImageView],
//! #     cmd: &lumen_rhi::command::CommandBuffer,
//! # ) -> lumen_renderer::RenderResult<()> {
//! let mut pass = RenderPass::new(settings);
//! for (i, &view) in views.iter().enumerate() {
//!     pass.set_output_attachment(
//!         0,
//!         vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
//!         AttachmentHandle::borrowed(view, present_description(vk::Format::B8G8R8A8_SRGB)),
//!         i,
//!     );
//! }
//! pass.build()?;
//! pass.render(cmd, 0, 0, &mut |ctx: &PassContext<'_>| -> lumen_renderer::RenderResult<()> {
//!     ctx.draw(3, 1, 0, 0);
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use ash::vk;
use tracing::{debug, info, warn};

use lumen_rhi::command::CommandBuffer;
use lumen_rhi::pipeline::Pipeline;
use lumen_rhi::{Owned, SharedDevice};

use crate::attachment::AttachmentHandle;
use crate::error::{RenderError, RenderResult};

/// Slot an attachment is registered under. Attachment indices follow slot
/// order.
pub type AttachmentId = u32;

/// What every render pass is created with.
#[derive(Clone)]
pub struct RenderPassSettings {
    pub device: SharedDevice,
    /// Framebuffer size; also the render area, viewport and scissor.
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub depth_clear: f32,
}

impl RenderPassSettings {
    pub fn new(device: SharedDevice, extent: vk::Extent2D) -> Self {
        Self {
            device,
            extent,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_clear: 1.0,
        }
    }
}

/// Whether `layout` is one a depth attachment is used in.
pub fn is_depth_layout(layout: vk::ImageLayout) -> bool {
    matches!(
        layout,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            | vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
            | vk::ImageLayout::DEPTH_ATTACHMENT_STENCIL_READ_ONLY_OPTIMAL
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttachmentRole {
    Input,
    Color,
    Depth,
}

#[derive(Debug)]
struct AttachmentSlot {
    role: AttachmentRole,
    /// Layout during the subpass.
    layout: vk::ImageLayout,
    /// Indexed by swapchain image; a single entry applies to every image.
    variants: Vec<Option<AttachmentHandle>>,
}

/// Everything about the attachments that makes two render pass objects
/// interchangeable.
#[derive(Clone, Debug, PartialEq, Eq)]
struct AttachmentSignature {
    role: AttachmentRole,
    layout: vk::ImageLayout,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    load_op: vk::AttachmentLoadOp,
    store_op: vk::AttachmentStoreOp,
    initial_layout: vk::ImageLayout,
    final_layout: vk::ImageLayout,
}

impl AttachmentSignature {
    fn new(slot: &AttachmentSlot, description: &vk::AttachmentDescription) -> Self {
        Self {
            role: slot.role,
            layout: slot.layout,
            format: description.format,
            samples: description.samples,
            load_op: description.load_op,
            store_op: description.store_op,
            initial_layout: description.initial_layout,
            final_layout: description.final_layout,
        }
    }
}

/// Pass-specific drawing, invoked inside the begun render pass.
pub trait PassRenderer {
    fn render(&mut self, ctx: &PassContext<'_>) -> RenderResult<()>;
}

impl<F> PassRenderer for F
where
    F: FnMut(&PassContext<'_>) -> RenderResult<()>,
{
    fn render(&mut self, ctx: &PassContext<'_>) -> RenderResult<()> {
        self(ctx)
    }
}

/// Recording helpers for one pass in one frame.
pub struct PassContext<'a> {
    device: &'a SharedDevice,
    command_buffer: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    frame_index: usize,
    swapchain_image_index: u32,
    extent: vk::Extent2D,
}

impl<'a> PassContext<'a> {
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn device(&self) -> &'a SharedDevice {
        self.device
    }

    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Frame-in-flight slot, in `0..frames_in_flight`.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn swapchain_image_index(&self) -> u32 {
        self.swapchain_image_index
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn bind_pipeline(&self, pipeline: &Pipeline) {
        self.device
            .cmd_bind_pipeline(self.command_buffer, pipeline.bind_point(), pipeline.handle());
    }

    pub fn bind_descriptor_sets(&self, pipeline: &Pipeline, first_set: u32, sets: &[vk::DescriptorSet]) {
        self.device.cmd_bind_descriptor_sets(
            self.command_buffer,
            pipeline.bind_point(),
            pipeline.layout(),
            first_set,
            sets,
            &[],
        );
    }

    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        self.device
            .cmd_bind_vertex_buffers(self.command_buffer, first_binding, buffers, offsets);
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        self.device
            .cmd_bind_index_buffer(self.command_buffer, buffer, offset, index_type);
    }

    /// Pushes `value` as raw bytes at `offset`.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        pipeline: &Pipeline,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: &T,
    ) {
        self.device.cmd_push_constants(
            self.command_buffer,
            pipeline.layout(),
            stages,
            offset,
            bytemuck::bytes_of(value),
        );
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.device.cmd_draw(
            self.command_buffer,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        );
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.device.cmd_draw_indexed(
            self.command_buffer,
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
    }
}

/// A single-subpass render pass and its framebuffers.
///
/// Fields drop in declaration order: framebuffers, then the render pass
/// object, then the attachments whose views the framebuffers referenced.
pub struct RenderPass {
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    render_pass: Option<Owned<vk::RenderPass>>,
    attachments: BTreeMap<AttachmentId, AttachmentSlot>,
    signature: Vec<AttachmentSignature>,
    clear_values: Vec<vk::ClearValue>,
    settings: RenderPassSettings,
}

impl RenderPass {
    pub fn new(settings: RenderPassSettings) -> Self {
        Self {
            framebuffers: Vec::new(),
            render_pass: None,
            attachments: BTreeMap::new(),
            signature: Vec::new(),
            clear_values: Vec::new(),
            settings,
        }
    }

    /// Registers `handle` as an input attachment read in `layout`.
    ///
    /// Replaces whatever was registered under `id`.
    pub fn set_input_attachment(&mut self, id: AttachmentId, layout: vk::ImageLayout, handle: AttachmentHandle) {
        self.attachments.insert(
            id,
            AttachmentSlot {
                role: AttachmentRole::Input,
                layout,
                variants: vec![Some(handle)],
            },
        );
    }

    /// Registers `handle` as the output written in `layout` for swapchain
    /// image `swapchain_image_index`.
    ///
    /// Register index 0 only for an output shared by every image. A depth
    /// layout makes the slot the depth attachment.
    pub fn set_output_attachment(
        &mut self,
        id: AttachmentId,
        layout: vk::ImageLayout,
        handle: AttachmentHandle,
        swapchain_image_index: usize,
    ) {
        let role = if is_depth_layout(layout) {
            AttachmentRole::Depth
        } else {
            AttachmentRole::Color
        };
        let slot = self.attachments.entry(id).or_insert_with(|| AttachmentSlot {
            role,
            layout,
            variants: Vec::new(),
        });
        if slot.role == AttachmentRole::Input {
            slot.variants.clear();
        }
        slot.role = role;
        slot.layout = layout;
        if slot.variants.len() <= swapchain_image_index {
            slot.variants.resize_with(swapchain_image_index + 1, || None);
        }
        slot.variants[swapchain_image_index] = Some(handle);
    }

    /// Drops every registered attachment and the framebuffers built from
    /// them. The render pass object is kept for the next build.
    pub fn reset_attachments(&mut self) {
        self.framebuffers.clear();
        self.attachments.clear();
    }

    /// Sets the framebuffer size used by the next build.
    pub fn set_extent(&mut self, extent: vk::Extent2D) {
        self.settings.extent = extent;
    }

    /// Builds (or rebuilds) the render pass object and framebuffers.
    ///
    /// The GPU must no longer use the current framebuffers. On error the
    /// pass is left exactly as it was.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] for no outputs, more than one depth
    /// attachment, per-image counts that disagree with the framebuffer
    /// count, or an empty extent. [`RenderError::ObjectCreation`] when the
    /// device fails.
    pub fn build(&mut self) -> RenderResult<()> {
        let framebuffer_count = self.validate()?;
        let extent = self.settings.extent;
        let device = self.settings.device.clone();

        let signature: Vec<AttachmentSignature> = self
            .attachments
            .values()
            .map(|slot| AttachmentSignature::new(slot, first_variant(slot).description()))
            .collect();

        let reused = match &self.render_pass {
            Some(existing) if self.signature == signature => Some(existing.handle()),
            Some(_) => {
                warn!("Attachment layout changed, recreating render pass object");
                None
            }
            None => None,
        };
        let created = match reused {
            Some(_) => None,
            None => Some(self.create_render_pass(&device)?),
        };
        let render_pass = reused.or(created.as_ref().map(Owned::handle)).ok_or_else(|| {
            RenderError::Config("render pass object unavailable".to_string())
        })?;

        let mut framebuffers = Vec::with_capacity(framebuffer_count);
        for image_index in 0..framebuffer_count {
            let views: Vec<vk::ImageView> = self
                .attachments
                .values()
                .map(|slot| variant_for(slot, image_index).image_view())
                .collect();
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&views)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = device
                .create_framebuffer(&create_info)
                .map_err(RenderError::creating("framebuffer"))?;
            framebuffers.push(Owned::new(device.clone(), framebuffer));
        }

        // Everything exists; commit.
        self.framebuffers = framebuffers;
        if let Some(created) = created {
            self.render_pass = Some(created);
        }
        self.signature = signature;
        self.clear_values = self.assign_references();

        debug!(
            "Render pass built: {} attachment(s), {} framebuffer(s) at {}x{}",
            self.attachments.len(),
            framebuffer_count,
            extent.width,
            extent.height
        );
        Ok(())
    }

    /// Returns the framebuffer count the registered attachments imply.
    fn validate(&self) -> RenderResult<usize> {
        let outputs = self
            .attachments
            .values()
            .filter(|slot| slot.role != AttachmentRole::Input)
            .count();
        if outputs == 0 {
            return Err(RenderError::Config(
                "render pass has no output attachments".to_string(),
            ));
        }

        let depth = self
            .attachments
            .values()
            .filter(|slot| slot.role == AttachmentRole::Depth)
            .count();
        if depth > 1 {
            return Err(RenderError::Config(format!(
                "render pass has {depth} depth attachments, at most one is allowed"
            )));
        }

        let framebuffer_count = self
            .attachments
            .values()
            .map(|slot| slot.variants.len())
            .max()
            .unwrap_or(1);
        for (id, slot) in &self.attachments {
            let registered = slot.variants.iter().filter(|v| v.is_some()).count();
            let consistent = registered == slot.variants.len()
                && (registered == 1 || registered == framebuffer_count);
            if !consistent {
                return Err(RenderError::Config(format!(
                    "attachment {id} has {registered} of {} image(s) registered, expected 1 or {framebuffer_count}",
                    slot.variants.len()
                )));
            }
        }

        let extent = self.settings.extent;
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::Config(format!(
                "render pass extent {}x{} is empty",
                extent.width, extent.height
            )));
        }

        Ok(framebuffer_count)
    }

    fn create_render_pass(&self, device: &SharedDevice) -> RenderResult<Owned<vk::RenderPass>> {
        let mut descriptions = Vec::with_capacity(self.attachments.len());
        let mut inputs = Vec::new();
        let mut colors = Vec::new();
        let mut depth = None;
        let mut presents = false;

        for (index, slot) in self.attachments.values().enumerate() {
            let description = *first_variant(slot).description();
            presents |= description.final_layout == vk::ImageLayout::PRESENT_SRC_KHR;
            descriptions.push(description);

            let reference = vk::AttachmentReference {
                attachment: index as u32,
                layout: slot.layout,
            };
            match slot.role {
                AttachmentRole::Input => inputs.push(reference),
                AttachmentRole::Color => colors.push(reference),
                AttachmentRole::Depth => depth = Some(reference),
            }
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .input_attachments(&inputs)
            .color_attachments(&colors);
        if let Some(depth) = depth.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpasses = [subpass];

        // Wait for the presentation engine to release the image before
        // writing it.
        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies: Vec<vk::SubpassDependency> = if presents {
            vec![
                vk::SubpassDependency::default()
                    .src_subpass(vk::SUBPASS_EXTERNAL)
                    .dst_subpass(0)
                    .src_stage_mask(stages)
                    .dst_stage_mask(stages)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(
                        vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    ),
            ]
        } else {
            Vec::new()
        };

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = device
            .create_render_pass(&create_info)
            .map_err(RenderError::creating("render pass"))?;

        info!(
            "Created render pass: {} color, {} input, depth: {}",
            colors.len(),
            inputs.len(),
            depth.is_some()
        );
        Ok(Owned::new(device.clone(), render_pass))
    }

    /// Writes each attachment's index and layout back into its handles and
    /// returns the clear values in attachment order.
    fn assign_references(&mut self) -> Vec<vk::ClearValue> {
        let clear_color = self.settings.clear_color;
        let depth_clear = self.settings.depth_clear;
        self.attachments
            .values_mut()
            .enumerate()
            .map(|(index, slot)| {
                for handle in slot.variants.iter_mut().flatten() {
                    handle.set_reference(index as u32, slot.layout);
                }
                match slot.role {
                    AttachmentRole::Depth => vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: depth_clear,
                            stencil: 0,
                        },
                    },
                    _ => vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_color,
                        },
                    },
                }
            })
            .collect()
    }

    /// Records the pass for one frame: begin on the framebuffer of
    /// `swapchain_image_index`, full-extent viewport and scissor, the
    /// content, end.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] if the pass is not built or the image index
    /// has no framebuffer; otherwise whatever the content returns. The pass
    /// is ended even when the content fails.
    pub fn render(
        &self,
        command_buffer: &CommandBuffer,
        frame_index: usize,
        swapchain_image_index: u32,
        content: &mut dyn PassRenderer,
    ) -> RenderResult<()> {
        let Some(render_pass) = self.render_pass.as_ref().filter(|_| self.is_built()) else {
            return Err(RenderError::Config(
                "render pass rendered before it was built".to_string(),
            ));
        };
        let framebuffer = if self.framebuffers.len() == 1 {
            &self.framebuffers[0]
        } else {
            self.framebuffers
                .get(swapchain_image_index as usize)
                .ok_or_else(|| {
                    RenderError::Config(format!(
                        "no framebuffer for swapchain image {swapchain_image_index}"
                    ))
                })?
        };

        let device = &self.settings.device;
        let cmd = command_buffer.handle();
        let extent = self.settings.extent;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(render_area)
            .clear_values(&self.clear_values);
        device.cmd_begin_render_pass(cmd, &begin_info);
        device.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        device.cmd_set_scissor(cmd, render_area);

        let ctx = PassContext {
            device,
            command_buffer: cmd,
            render_pass: render_pass.handle(),
            frame_index,
            swapchain_image_index,
            extent,
        };
        let result = content.render(&ctx);
        device.cmd_end_render_pass(cmd);
        result
    }

    /// Whether framebuffers exist for the current attachments.
    #[inline]
    pub fn is_built(&self) -> bool {
        !self.framebuffers.is_empty()
    }

    /// The render pass object, null before the first build.
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
            .as_ref()
            .map_or(vk::RenderPass::null(), Owned::handle)
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }

    #[inline]
    pub fn device(&self) -> &SharedDevice {
        &self.settings.device
    }

    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn framebuffers(&self) -> impl ExactSizeIterator<Item = vk::Framebuffer> + '_ {
        self.framebuffers.iter().map(Owned::handle)
    }

    /// Clear values in attachment order, as of the last build.
    #[inline]
    pub fn clear_values(&self) -> &[vk::ClearValue] {
        &self.clear_values
    }

    /// Number of color outputs, which pipelines for this pass blend into.
    pub fn color_attachment_count(&self) -> u32 {
        self.attachments
            .values()
            .filter(|slot| slot.role == AttachmentRole::Color)
            .count() as u32
    }

    /// The handle registered under `id` for image `swapchain_image_index`.
    pub fn attachment(&self, id: AttachmentId, swapchain_image_index: usize) -> Option<&AttachmentHandle> {
        let slot = self.attachments.get(&id)?;
        match slot.variants.as_slice() {
            [single] => single.as_ref(),
            variants => variants.get(swapchain_image_index)?.as_ref(),
        }
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle())
            .field("attachments", &self.attachments.len())
            .field("framebuffers", &self.framebuffers.len())
            .field("extent", &self.settings.extent)
            .finish()
    }
}

// Callers validate first: every slot has at least one variant and no gaps.
fn first_variant(slot: &AttachmentSlot) -> &AttachmentHandle {
    variant_for(slot, 0)
}

fn variant_for(slot: &AttachmentSlot, image_index: usize) -> &AttachmentHandle {
    let index = if slot.variants.len() == 1 { 0 } else { image_index };
    match slot.variants.get(index) {
        Some(Some(handle)) => handle,
        _ => unreachable!("attachment slots are validated before use"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk::Handle;
    use lumen_rhi::command::CommandPool;
    use lumen_rhi::mock::{MockCommand, MockDevice, MockObject};

    use super::*;
    use crate::attachment::{color_description, depth_description, input_description, present_description};

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 320,
        height: 240,
    };

    fn pass(device: &Arc<MockDevice>) -> RenderPass {
        RenderPass::new(RenderPassSettings::new(device.clone(), EXTENT))
    }

    fn present(view: u64) -> AttachmentHandle {
        AttachmentHandle::borrowed(
            vk::ImageView::from_raw(view),
            present_description(vk::Format::B8G8R8A8_SRGB),
        )
    }

    fn depth(view: u64) -> AttachmentHandle {
        AttachmentHandle::borrowed(
            vk::ImageView::from_raw(view),
            depth_description(vk::Format::D32_SFLOAT),
        )
    }

    #[test]
    fn test_color_and_depth_pass() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        for i in 0..3 {
            pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(100 + i), i as usize);
        }
        pass.set_output_attachment(1, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, depth(200), 0);
        pass.build().unwrap();

        assert_eq!(pass.framebuffer_count(), 3);
        assert_eq!(pass.color_attachment_count(), 1);

        let record = &device.render_passes()[0];
        assert_eq!(record.color_attachments, vec![0]);
        assert_eq!(record.depth_attachment, Some(1));
        assert_eq!(record.dependencies.len(), 1);
        assert_eq!(record.dependencies[0].src_subpass, vk::SUBPASS_EXTERNAL);

        let framebuffers = device.framebuffers();
        assert_eq!(framebuffers[2].attachments, vec![
            vk::ImageView::from_raw(102),
            vk::ImageView::from_raw(200)
        ]);
        assert_eq!((framebuffers[0].width, framebuffers[0].height), (320, 240));

        let depth_ref = pass.attachment(1, 2).unwrap().reference();
        assert_eq!(depth_ref.attachment, 1);
        assert_eq!(depth_ref.layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(unsafe { pass.clear_values()[1].depth_stencil.depth }, 1.0);
    }

    #[test]
    fn test_offscreen_pass_has_single_framebuffer_and_no_dependency() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        pass.set_output_attachment(
            0,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            AttachmentHandle::borrowed(
                vk::ImageView::from_raw(1),
                color_description(vk::Format::R8G8B8A8_UNORM, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            ),
            0,
        );
        pass.build().unwrap();
        assert_eq!(pass.framebuffer_count(), 1);
        assert!(device.render_passes()[0].dependencies.is_empty());
    }

    #[test]
    fn test_inputs_only_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        pass.set_input_attachment(
            0,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            AttachmentHandle::borrowed(vk::ImageView::from_raw(1), input_description(vk::Format::R8G8B8A8_UNORM)),
        );
        assert!(matches!(pass.build(), Err(RenderError::Config(_))));
        assert!(matches!(RenderPass::new(RenderPassSettings::new(device.clone(), EXTENT)).build(), Err(RenderError::Config(_))));
        assert_eq!(device.created(MockObject::RenderPass), 0);
    }

    #[test]
    fn test_gap_in_per_image_outputs_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(1), 0);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(3), 2);
        assert!(matches!(pass.build(), Err(RenderError::Config(_))));
    }

    #[test]
    fn test_rebuild_reuses_render_pass_object() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(1), 0);
        pass.build().unwrap();
        let handle = pass.handle();

        pass.reset_attachments();
        assert!(!pass.is_built());
        assert_eq!(device.live(MockObject::Framebuffer), 0);

        pass.set_extent(vk::Extent2D { width: 640, height: 480 });
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(2), 0);
        pass.build().unwrap();
        assert_eq!(pass.handle(), handle);
        assert_eq!(device.created(MockObject::RenderPass), 1);
        assert_eq!(device.framebuffers()[1].width, 640);
    }

    #[test]
    fn test_format_change_recreates_render_pass_object() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(1), 0);
        pass.build().unwrap();
        let first = pass.handle();

        pass.reset_attachments();
        pass.set_output_attachment(
            0,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            AttachmentHandle::borrowed(
                vk::ImageView::from_raw(2),
                present_description(vk::Format::B8G8R8A8_UNORM),
            ),
            0,
        );
        pass.build().unwrap();
        assert_ne!(pass.handle(), first);
        assert_eq!(device.live(MockObject::RenderPass), 1);
    }

    #[test]
    fn test_failed_framebuffer_keeps_previous_build() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(1), 0);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(2), 1);
        pass.build().unwrap();
        let before: Vec<_> = pass.framebuffers().collect();

        device.fail_next(MockObject::Framebuffer, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = pass.build().unwrap_err();
        assert!(matches!(err, RenderError::ObjectCreation { object: "framebuffer", .. }));
        assert_eq!(pass.framebuffers().collect::<Vec<_>>(), before);
        assert_eq!(device.live(MockObject::Framebuffer), 2);
    }

    #[test]
    fn test_render_records_pass() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(1), 0);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(2), 1);

        let pool = CommandPool::new(device.clone()).unwrap();
        let cmd = pool.allocate_command_buffer().unwrap();
        let mut noop = |_: &PassContext<'_>| -> RenderResult<()> { Ok(()) };
        assert!(matches!(pass.render(&cmd, 0, 0, &mut noop), Err(RenderError::Config(_))));

        pass.build().unwrap();
        cmd.begin().unwrap();
        let mut seen = None;
        pass.render(&cmd, 1, 1, &mut |ctx: &PassContext<'_>| -> RenderResult<()> {
            seen = Some((ctx.frame_index(), ctx.swapchain_image_index(), ctx.extent()));
            ctx.draw(3, 1, 0, 0);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, Some((1, 1, EXTENT)));

        let commands = device.commands_for(cmd.handle());
        let framebuffer = pass.framebuffers().nth(1).unwrap();
        assert!(matches!(
            commands.as_slice(),
            [
                MockCommand::Begin,
                MockCommand::BeginRenderPass { framebuffer: fb, .. },
                MockCommand::SetViewport { .. },
                MockCommand::SetScissor(_),
                MockCommand::Draw { vertex_count: 3, instance_count: 1 },
                MockCommand::EndRenderPass,
            ] if *fb == framebuffer
        ));
        assert!(matches!(pass.render(&cmd, 0, 5, &mut noop), Err(RenderError::Config(_))));
    }

    #[test]
    fn test_failing_content_still_ends_pass() {
        let device = Arc::new(MockDevice::new());
        let mut pass = pass(&device);
        pass.set_output_attachment(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, present(1), 0);
        pass.build().unwrap();

        let pool = CommandPool::new(device.clone()).unwrap();
        let cmd = pool.allocate_command_buffer().unwrap();
        let result = pass.render(&cmd, 0, 0, &mut |_: &PassContext<'_>| -> RenderResult<()> {
            Err(RenderError::Config("content failed".to_string()))
        });
        assert!(result.is_err());
        assert!(matches!(
            device.commands_for(cmd.handle()).last(),
            Some(MockCommand::EndRenderPass)
        ));
    }
}
