use ash::vk;
use tracing::debug;

use lumen_rhi::command::CommandBuffer;
use lumen_rhi::swapchain::Swapchain;

use crate::attachment::{AttachmentHandle, depth_description, present_description};
use crate::depth_buffer::DepthBuffer;
use crate::error::RenderResult;
use crate::render_pass::{AttachmentId, PassRenderer, RenderPass, RenderPassSettings};

/// The presenting pass: swapchain color plus depth.
///
/// Attachments are borrowed from the swapchain and the depth buffer, which
/// the owner must keep alive and rebuild together with this pass.
#[derive(Debug)]
pub struct GeometryPass {
    pass: RenderPass,
}

impl GeometryPass {
    pub const COLOR_ATTACHMENT: AttachmentId = 0;
    pub const DEPTH_ATTACHMENT: AttachmentId = 1;

    pub fn new(settings: RenderPassSettings) -> Self {
        Self {
            pass: RenderPass::new(settings),
        }
    }

    /// Registers every swapchain image and `depth`, then builds.
    ///
    /// Call again after the swapchain is recreated.
    pub fn setup(&mut self, swapchain: &Swapchain, depth: &DepthBuffer) -> RenderResult<()> {
        self.pass.reset_attachments();
        self.pass.set_extent(swapchain.extent());

        let color = present_description(swapchain.format());
        for (index, view) in swapchain.image_views().enumerate() {
            self.pass.set_output_attachment(
                Self::COLOR_ATTACHMENT,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                AttachmentHandle::borrowed(view, color),
                index,
            );
        }
        self.pass.set_output_attachment(
            Self::DEPTH_ATTACHMENT,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            AttachmentHandle::borrowed(depth.image_view(), depth_description(depth.format())),
            0,
        );

        self.pass.build()?;
        debug!(
            "Geometry pass set up for {} swapchain image(s)",
            swapchain.image_count()
        );
        Ok(())
    }

    pub fn render(
        &self,
        command_buffer: &CommandBuffer,
        frame_index: usize,
        swapchain_image_index: u32,
        content: &mut dyn PassRenderer,
    ) -> RenderResult<()> {
        self.pass
            .render(command_buffer, frame_index, swapchain_image_index, content)
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
