//! Graphics pipelines and pipeline layouts.
//!
//! A [`Pipeline`] is created against a render pass and subpass from a
//! [`GraphicsPipelineDesc`]: a shader pair, descriptor set layouts, a vertex
//! input layout, and the fixed-function state in [`PipelineConfig`].
//! Viewport and scissor are always dynamic, so pipelines survive
//! swapchain resizes.
//!
//! # Example
//!
//! ```no_run
//! use lumen_rhi::SharedDevice;
//! use lumen_rhi::pipeline::{GraphicsPipelineDesc, Pipeline, PipelineConfig, VertexInputLayout};
//! use lumen_rhi::shader::Shader;
//! use ash::vk;
//!
//! # fn example(device: SharedDevice, vs: &Shader, fs: &Shader, render_pass: vk::RenderPass)
//! #     -> lumen_rhi::RhiResult<()> {
//! let config = PipelineConfig::for_render_pass(render_pass, 0);
//! let pipeline = Pipeline::new(
//!     device,
//!     &GraphicsPipelineDesc {
//!         vertex_shader: vs,
//!         fragment_shader: fs,
//!         set_layouts: &[],
//!         vertex_input: &VertexInputLayout::default(),
//!         config: &config,
//!     },
//! )?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::device::SharedDevice;
use crate::error::{RhiError, RhiResult};
use crate::owned::Owned;
use crate::shader::{Shader, ShaderStage};

/// Vertex buffer bindings and the attributes read from them.
#[derive(Clone, Debug, Default)]
pub struct VertexInputLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInputLayout {
    /// A single interleaved per-vertex binding with the given attributes.
    ///
    /// Each entry is `(format, offset)`; locations are assigned in order.
    pub fn interleaved(stride: u32, attributes: &[(vk::Format, u32)]) -> Self {
        Self {
            bindings: vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }],
            attributes: attributes
                .iter()
                .enumerate()
                .map(|(location, &(format, offset))| vk::VertexInputAttributeDescription {
                    location: location as u32,
                    binding: 0,
                    format,
                    offset,
                })
                .collect(),
        }
    }

    /// Returns whether the pipeline reads no vertex buffers.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// How fragment output is combined with the attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Overwrite.
    #[default]
    Opaque,
    /// Standard `src * a + dst * (1 - a)`.
    AlphaBlend,
    /// `src + dst`.
    Additive,
}

impl BlendMode {
    fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            BlendMode::Opaque => state.blend_enable(false),
            BlendMode::AlphaBlend => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD),
            BlendMode::Additive => state
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD),
        }
    }
}

/// Fixed-function state and render pass compatibility of a pipeline.
///
/// Depth comparison is left to the caller: forward depth uses `LESS` with a
/// clear of 1.0, reversed depth uses `GREATER` with a clear of 0.0.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
    /// Number of color attachments the subpass writes.
    pub color_attachment_count: u32,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub blend: BlendMode,
    pub samples: vk::SampleCountFlags,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_pass: vk::RenderPass::null(),
            subpass: 0,
            color_attachment_count: 1,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: vk::CompareOp::LESS,
            blend: BlendMode::Opaque,
            samples: vk::SampleCountFlags::TYPE_1,
            push_constant_ranges: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Default state targeting `subpass` of `render_pass`.
    pub fn for_render_pass(render_pass: vk::RenderPass, subpass: u32) -> Self {
        Self {
            render_pass,
            subpass,
            ..Default::default()
        }
    }

    /// State for a fullscreen pass: no culling, no depth, no vertex buffers.
    pub fn fullscreen(render_pass: vk::RenderPass, subpass: u32) -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            depth_test_enable: false,
            depth_write_enable: false,
            ..Self::for_render_pass(render_pass, subpass)
        }
    }
}

/// Everything needed to compile one graphics pipeline.
pub struct GraphicsPipelineDesc<'a> {
    pub vertex_shader: &'a Shader,
    pub fragment_shader: &'a Shader,
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub vertex_input: &'a VertexInputLayout,
    pub config: &'a PipelineConfig,
}

/// Vulkan pipeline layout.
#[derive(Debug)]
pub struct PipelineLayout {
    layout: Owned<vk::PipelineLayout>,
}

impl PipelineLayout {
    /// Creates a layout from descriptor set layouts and push constant ranges.
    pub fn new(
        device: SharedDevice,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = device.create_pipeline_layout(&create_info)?;
        debug!(
            "Created pipeline layout: {} set layout(s), {} push constant range(s)",
            set_layouts.len(),
            push_constant_ranges.len()
        );
        Ok(Self {
            layout: Owned::new(device, layout),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }
}

/// Compiled graphics pipeline together with its layout.
///
/// Fields drop in declaration order: the pipeline before its layout.
#[derive(Debug)]
pub struct Pipeline {
    pipeline: Owned<vk::Pipeline>,
    layout: PipelineLayout,
}

impl Pipeline {
    /// Compiles a graphics pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if the shaders are bound to the
    /// wrong stages, or the device error if compilation fails.
    pub fn new(device: SharedDevice, desc: &GraphicsPipelineDesc<'_>) -> RhiResult<Self> {
        if desc.vertex_shader.stage() != ShaderStage::Vertex
            || desc.fragment_shader.stage() != ShaderStage::Fragment
        {
            return Err(RhiError::PipelineError(
                "expected a vertex and a fragment shader".to_string(),
            ));
        }

        let config = desc.config;
        let layout = PipelineLayout::new(
            device.clone(),
            desc.set_layouts,
            &config.push_constant_ranges,
        )?;

        let stages = [
            desc.vertex_shader.stage_create_info(),
            desc.fragment_shader.stage_create_info(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_input.bindings)
            .vertex_attribute_descriptions(&desc.vertex_input.attributes);

        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(config.topology);

        // Counts only; the rectangles are dynamic.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(config.polygon_mode)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(config.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth_test_enable)
            .depth_write_enable(config.depth_write_enable)
            .depth_compare_op(config.depth_compare_op)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_attachments =
            vec![config.blend.attachment_state(); config.color_attachment_count as usize];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(config.render_pass)
            .subpass(config.subpass);

        let pipeline = device.create_graphics_pipeline(&create_info)?;
        debug!(
            "Created graphics pipeline (render pass {:?}, subpass {})",
            config.render_pass, config.subpass
        );

        Ok(Self {
            pipeline: Owned::new(device, pipeline),
            layout,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    #[inline]
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::GRAPHICS
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ash::vk::Handle;

    use super::*;
    use crate::mock::{MockDevice, MockObject};
    use crate::shader::SPIRV_MAGIC;

    fn shader(device: &Arc<MockDevice>, stage: ShaderStage) -> Shader {
        Shader::from_spirv_words(device.clone(), &[SPIRV_MAGIC, 0], stage, "main").unwrap()
    }

    #[test]
    fn test_interleaved_layout_assigns_locations() {
        let layout = VertexInputLayout::interleaved(
            20,
            &[(vk::Format::R32G32B32_SFLOAT, 0), (vk::Format::R32G32_SFLOAT, 12)],
        );
        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.bindings[0].stride, 20);
        assert_eq!(layout.attributes[1].location, 1);
        assert_eq!(layout.attributes[1].offset, 12);
        assert!(VertexInputLayout::default().is_empty());
    }

    #[test]
    fn test_pipeline_targets_render_pass() {
        let device = Arc::new(MockDevice::new());
        let vs = shader(&device, ShaderStage::Vertex);
        let fs = shader(&device, ShaderStage::Fragment);
        let render_pass = vk::RenderPass::from_raw(7);

        let mut config = PipelineConfig::for_render_pass(render_pass, 0);
        config.depth_compare_op = vk::CompareOp::GREATER;
        let vertex_input = VertexInputLayout::interleaved(12, &[(vk::Format::R32G32B32_SFLOAT, 0)]);

        let pipeline = Pipeline::new(
            device.clone(),
            &GraphicsPipelineDesc {
                vertex_shader: &vs,
                fragment_shader: &fs,
                set_layouts: &[],
                vertex_input: &vertex_input,
                config: &config,
            },
        )
        .unwrap();

        let record = &device.pipelines()[0];
        assert_eq!(record.render_pass, render_pass);
        assert_eq!(record.layout, pipeline.layout());
        assert_eq!(record.stage_count, 2);
        assert_eq!(record.vertex_bindings, 1);
        assert_eq!(record.depth_compare_op, Some(vk::CompareOp::GREATER));

        drop(pipeline);
        assert_eq!(device.live(MockObject::Pipeline), 0);
        assert_eq!(device.live(MockObject::PipelineLayout), 0);
    }

    #[test]
    fn test_fullscreen_config_disables_depth() {
        let device = Arc::new(MockDevice::new());
        let vs = shader(&device, ShaderStage::Vertex);
        let fs = shader(&device, ShaderStage::Fragment);
        let config = PipelineConfig::fullscreen(vk::RenderPass::from_raw(3), 0);

        Pipeline::new(
            device.clone(),
            &GraphicsPipelineDesc {
                vertex_shader: &vs,
                fragment_shader: &fs,
                set_layouts: &[],
                vertex_input: &VertexInputLayout::default(),
                config: &config,
            },
        )
        .unwrap();
        assert_eq!(device.pipelines()[0].depth_compare_op, None);
    }

    #[test]
    fn test_swapped_stages_are_rejected() {
        let device = Arc::new(MockDevice::new());
        let vs = shader(&device, ShaderStage::Vertex);
        let fs = shader(&device, ShaderStage::Fragment);
        let config = PipelineConfig::default();

        let result = Pipeline::new(
            device.clone(),
            &GraphicsPipelineDesc {
                vertex_shader: &fs,
                fragment_shader: &vs,
                set_layouts: &[],
                vertex_input: &VertexInputLayout::default(),
                config: &config,
            },
        );
        assert!(matches!(result, Err(RhiError::PipelineError(_))));
        assert_eq!(device.created(MockObject::PipelineLayout), 0);
    }
}
