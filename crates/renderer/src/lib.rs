//! Render passes and the frame loop.
//!
//! - [`RenderPass`] and the passes built on it ([`GeometryPass`],
//!   [`CompositePass`]), fed by [`AttachmentHandle`]s
//! - [`DescriptorManager`] and [`PipelineManager`], the layout and pipeline
//!   caches scene code queries lazily
//! - [`Renderer`], which owns the swapchain and drives frames in flight
//! - [`GpuContext`], the instance, surface and device for a window
//!
//! Everything GPU-facing goes through [`lumen_rhi::GpuDevice`], so the whole
//! crate runs against `lumen_rhi::mock::MockDevice` in tests.

mod context;
mod error;

pub mod attachment;
pub mod config;
pub mod depth_buffer;
pub mod descriptor_manager;
pub mod frame;
pub mod passes;
pub mod pipeline_manager;
pub mod render_pass;
pub mod renderer;

pub use attachment::AttachmentHandle;
pub use config::{DEFAULT_FRAMES_IN_FLIGHT, DescriptorPoolConfig, RendererConfig};
pub use context::GpuContext;
pub use depth_buffer::DepthBuffer;
pub use descriptor_manager::{
    DescriptorManager, DescriptorSetHandle, DescriptorSetLayoutHandle, DescriptorSetLayoutInfo,
    INITIAL_LAYOUT_CAPACITY, LayoutBinding,
};
pub use error::{RenderError, RenderResult};
pub use frame::FrameCounter;
pub use passes::{CompositePass, GeometryPass};
pub use pipeline_manager::PipelineManager;
pub use render_pass::{AttachmentId, PassContext, PassRenderer, RenderPass, RenderPassSettings};
pub use renderer::{FrameContext, Renderer};
