use std::sync::Arc;

use ash::vk;

use lumen_rhi::command::CommandBuffer;
use lumen_rhi::pipeline::Pipeline;

use crate::attachment::{AttachmentHandle, input_description};
use crate::descriptor_manager::DescriptorSetHandle;
use crate::error::{RenderError, RenderResult};
use crate::render_pass::{AttachmentId, PassContext, RenderPass, RenderPassSettings};

/// Fullscreen pass that reads earlier outputs as input attachments and
/// writes a color target.
///
/// Draws one vertex-less triangle covering the target with the caller's
/// pipeline; the vertex shader derives positions from the vertex index.
/// Descriptor sets are used round-robin by frame-in-flight index.
#[derive(Debug)]
pub struct CompositePass {
    pass: RenderPass,
    pipeline: Option<Arc<Pipeline>>,
    descriptor_sets: Vec<DescriptorSetHandle>,
}

impl CompositePass {
    pub fn new(settings: RenderPassSettings) -> Self {
        Self {
            pass: RenderPass::new(settings),
            pipeline: None,
            descriptor_sets: Vec::new(),
        }
    }

    /// Reads `view` as an input attachment in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn add_input(&mut self, id: AttachmentId, view: vk::ImageView, format: vk::Format) {
        self.pass.set_input_attachment(
            id,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            AttachmentHandle::borrowed(view, input_description(format)),
        );
    }

    /// Writes into `target` for swapchain image `swapchain_image_index`
    /// (index 0 for a target shared by every image).
    pub fn add_color_target(&mut self, id: AttachmentId, target: AttachmentHandle, swapchain_image_index: usize) {
        self.pass.set_output_attachment(
            id,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            target,
            swapchain_image_index,
        );
    }

    pub fn build(&mut self) -> RenderResult<()> {
        self.pass.build()
    }

    /// Sets the pipeline and per-frame descriptor sets used by [`render`].
    ///
    /// [`render`]: CompositePass::render
    pub fn set_material(&mut self, pipeline: Arc<Pipeline>, descriptor_sets: Vec<DescriptorSetHandle>) {
        self.pipeline = Some(pipeline);
        self.descriptor_sets = descriptor_sets;
    }

    /// Records the fullscreen draw for one frame.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] without a pipeline, or when the pass is not
    /// built.
    pub fn render(
        &self,
        command_buffer: &CommandBuffer,
        frame_index: usize,
        swapchain_image_index: u32,
    ) -> RenderResult<()> {
        let pipeline = self.pipeline.as_deref().ok_or_else(|| {
            RenderError::Config("composite pass rendered without a pipeline".to_string())
        })?;
        let set = match self.descriptor_sets.len() {
            0 => None,
            n => Some(self.descriptor_sets[frame_index % n].handle()),
        };

        self.pass.render(
            command_buffer,
            frame_index,
            swapchain_image_index,
            &mut |ctx: &PassContext<'_>| -> RenderResult<()> {
                ctx.bind_pipeline(pipeline);
                if let Some(set) = set {
                    ctx.bind_descriptor_sets(pipeline, 0, &[set]);
                }
                ctx.draw(3, 1, 0, 0);
                Ok(())
            },
        )
    }

    #[inline]
    pub fn pass(&self) -> &RenderPass {
        &self.pass
    }

    #[inline]
    pub fn pass_mut(&mut self) -> &mut RenderPass {
        &mut self.pass
    }
}
