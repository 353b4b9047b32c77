//! Graphics pipeline cache.
//!
//! Pipelines are keyed by their shader pair and compiled on first request
//! from the manager's default [`PipelineConfig`], the requested vertex
//! input and the resolved descriptor set layouts. Cached pipelines live as
//! long as the manager.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use lumen_rhi::SharedDevice;
use lumen_rhi::pipeline::{GraphicsPipelineDesc, Pipeline, PipelineConfig, VertexInputLayout};
use lumen_rhi::shader::{Shader, ShaderId};

use crate::descriptor_manager::{DescriptorManager, DescriptorSetLayoutHandle};
use crate::error::{RenderError, RenderResult};

type PipelineKey = (ShaderId, ShaderId);

pub struct PipelineManager {
    device: SharedDevice,
    default_config: PipelineConfig,
    pipelines: HashMap<PipelineKey, Arc<Pipeline>>,
}

impl PipelineManager {
    /// Creates an empty cache compiling against `default_config`.
    pub fn new(device: SharedDevice, default_config: PipelineConfig) -> Self {
        Self {
            device,
            default_config,
            pipelines: HashMap::new(),
        }
    }

    /// Replaces the state used for pipelines compiled from now on.
    /// Already cached pipelines are kept.
    pub fn set_default_config(&mut self, config: PipelineConfig) {
        self.default_config = config;
    }

    #[inline]
    pub fn default_config(&self) -> &PipelineConfig {
        &self.default_config
    }

    /// Returns the pipeline for `vertex` and `fragment`, compiling it on
    /// first request.
    ///
    /// `layouts` are placed in the pipeline layout by their set index and
    /// must cover `0..layouts.len()` exactly once. A cache hit ignores
    /// `layouts` and `vertex_input`.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] for layout handles that do not resolve or
    /// whose set indices have gaps or duplicates;
    /// [`RenderError::ObjectCreation`] when compilation fails.
    pub fn get_pipeline(
        &mut self,
        vertex: &Shader,
        fragment: &Shader,
        descriptors: &DescriptorManager,
        layouts: &[DescriptorSetLayoutHandle],
        vertex_input: &VertexInputLayout,
    ) -> RenderResult<Arc<Pipeline>> {
        let key = (vertex.id(), fragment.id());
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }

        let set_layouts = ordered_set_layouts(descriptors, layouts)?;
        let desc = GraphicsPipelineDesc {
            vertex_shader: vertex,
            fragment_shader: fragment,
            set_layouts: &set_layouts,
            vertex_input,
            config: &self.default_config,
        };
        let pipeline = Pipeline::new(self.device.clone(), &desc)
            .map_err(RenderError::creating("graphics pipeline"))?;

        info!(
            "Compiled pipeline for shaders {:?}/{:?} ({} set layout(s))",
            key.0,
            key.1,
            set_layouts.len()
        );
        let pipeline = Arc::new(pipeline);
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Whether a pipeline for this shader pair is cached.
    pub fn contains(&self, vertex: &Shader, fragment: &Shader) -> bool {
        self.pipelines.contains_key(&(vertex.id(), fragment.id()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("pipelines", &self.pipelines.len())
            .field("render_pass", &self.default_config.render_pass)
            .finish()
    }
}

/// Resolves `layouts` and orders them by set index.
fn ordered_set_layouts(
    descriptors: &DescriptorManager,
    layouts: &[DescriptorSetLayoutHandle],
) -> RenderResult<Vec<vk::DescriptorSetLayout>> {
    let mut resolved = Vec::with_capacity(layouts.len());
    for &handle in layouts {
        let set = descriptors.set_index(handle)?;
        resolved.push((set, descriptors.resolve(handle)?));
    }
    resolved.sort_by_key(|&(set, _)| set);

    for (expected, &(set, _)) in resolved.iter().enumerate() {
        if set as usize != expected {
            return Err(RenderError::Config(format!(
                "descriptor set indices must be 0..{} without gaps or duplicates, found set {} at position {}",
                resolved.len(),
                set,
                expected
            )));
        }
    }
    debug!("Resolved {} descriptor set layout(s)", resolved.len());
    Ok(resolved.into_iter().map(|(_, layout)| layout).collect())
}
