//! Attachments a render pass reads from or writes to.

use ash::vk;

use lumen_rhi::{Owned, SharedDevice};

/// One image view used as a render pass attachment.
///
/// The handle carries the attachment description (format, load/store ops,
/// layout transitions) and, once the pass is built, the reference the
/// subpass uses for it. Created with [`AttachmentHandle::owned`] it destroys
/// its view on drop; created with [`AttachmentHandle::borrowed`] it leaves
/// the view to whoever owns it (a swapchain, a depth buffer).
#[derive(Debug)]
pub struct AttachmentHandle {
    description: vk::AttachmentDescription,
    reference: vk::AttachmentReference,
    view: Owned<vk::ImageView>,
}

impl AttachmentHandle {
    /// Takes ownership of `view`; it is destroyed with the handle.
    pub fn owned(
        device: SharedDevice,
        view: vk::ImageView,
        description: vk::AttachmentDescription,
    ) -> Self {
        Self::from_view(Owned::new(device, view), description)
    }

    /// Refers to `view` without owning it.
    pub fn borrowed(view: vk::ImageView, description: vk::AttachmentDescription) -> Self {
        Self::from_view(Owned::borrowed(view), description)
    }

    pub fn from_view(view: Owned<vk::ImageView>, description: vk::AttachmentDescription) -> Self {
        Self {
            description,
            reference: vk::AttachmentReference {
                attachment: vk::ATTACHMENT_UNUSED,
                layout: vk::ImageLayout::UNDEFINED,
            },
            view,
        }
    }

    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.view.handle()
    }

    #[inline]
    pub fn description(&self) -> &vk::AttachmentDescription {
        &self.description
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.description.format
    }

    /// Index and subpass layout assigned by the last successful build.
    /// `ATTACHMENT_UNUSED` before that.
    #[inline]
    pub fn reference(&self) -> vk::AttachmentReference {
        self.reference
    }

    #[inline]
    pub fn is_owning(&self) -> bool {
        self.view.is_owning()
    }

    pub(crate) fn set_reference(&mut self, attachment: u32, layout: vk::ImageLayout) {
        self.reference = vk::AttachmentReference { attachment, layout };
    }
}

/// Color target cleared on load and stored, ending in `final_layout`.
pub fn color_description(
    format: vk::Format,
    final_layout: vk::ImageLayout,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(final_layout)
}

/// Presented swapchain image.
pub fn present_description(format: vk::Format) -> vk::AttachmentDescription {
    color_description(format, vk::ImageLayout::PRESENT_SRC_KHR)
}

/// Depth target cleared on load; contents are discarded after the pass.
pub fn depth_description(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
}

/// Image written by an earlier pass and read here as an input attachment.
pub fn input_description(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::LOAD)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk::Handle;
    use lumen_rhi::mock::{MockDevice, MockObject};

    use super::*;

    #[test]
    fn test_borrowed_handle_never_destroys_view() {
        let device = Arc::new(MockDevice::new());
        let handle = AttachmentHandle::borrowed(
            vk::ImageView::from_raw(42),
            present_description(vk::Format::B8G8R8A8_SRGB),
        );
        assert!(!handle.is_owning());
        assert_eq!(handle.reference().attachment, vk::ATTACHMENT_UNUSED);
        drop(handle);
        assert_eq!(device.destroyed(MockObject::ImageView), 0);
    }

    #[test]
    fn test_owned_handle_destroys_view_once() {
        let device = Arc::new(MockDevice::new());
        let handle = AttachmentHandle::owned(
            device.clone(),
            vk::ImageView::from_raw(7),
            color_description(vk::Format::R16G16B16A16_SFLOAT, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
        );
        assert_eq!(handle.format(), vk::Format::R16G16B16A16_SFLOAT);
        drop(handle);
        assert_eq!(device.destroyed(MockObject::ImageView), 1);
    }

    #[test]
    fn test_descriptions() {
        let depth = depth_description(vk::Format::D32_SFLOAT);
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);

        let input = input_description(vk::Format::R8G8B8A8_UNORM);
        assert_eq!(input.load_op, vk::AttachmentLoadOp::LOAD);
    }
}
