//! Descriptor set layout cache and descriptor set allocation.
//!
//! Layouts are deduplicated structurally: asking for a layout equal to one
//! already compiled returns a handle aliasing it. A handle is the layout's
//! slot index plus the set index it was requested for, resolved through the
//! manager on every access, so it stays valid while the layout storage
//! grows and lookups allocate nothing on a cache hit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use tracing::{debug, error, info};

use lumen_rhi::descriptor::{DescriptorPool, buffer_info, image_info};
use lumen_rhi::{Owned, RhiError, SharedDevice};

use crate::config::DescriptorPoolConfig;
use crate::error::{RenderError, RenderResult};

/// Layout storage reserved up front; more is allocated on demand.
pub const INITIAL_LAYOUT_CAPACITY: usize = 8;

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

/// One binding of a descriptor set layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub descriptor_count: u32,
    pub stage_flags: vk::ShaderStageFlags,
    pub immutable_samplers: Vec<vk::Sampler>,
}

impl LayoutBinding {
    pub fn new(
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        Self {
            binding,
            descriptor_type,
            descriptor_count: 1,
            stage_flags,
            immutable_samplers: Vec::new(),
        }
    }

    pub fn uniform_buffer(binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        Self::new(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    pub fn combined_image_sampler(binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        Self::new(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Input attachments are only visible to fragment shaders.
    pub fn input_attachment(binding: u32) -> Self {
        Self::new(
            binding,
            vk::DescriptorType::INPUT_ATTACHMENT,
            vk::ShaderStageFlags::FRAGMENT,
        )
    }

    fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'_> {
        let binding = vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .descriptor_count(self.descriptor_count)
            .stage_flags(self.stage_flags);
        if self.immutable_samplers.is_empty() {
            binding
        } else {
            binding.immutable_samplers(&self.immutable_samplers)
        }
    }
}

/// Description of a descriptor set layout and the set index it binds to.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayoutInfo {
    /// Set index in the pipeline layout. Not part of equality.
    pub set: u32,
    pub flags: vk::DescriptorSetLayoutCreateFlags,
    pub bindings: Vec<LayoutBinding>,
}

impl DescriptorSetLayoutInfo {
    pub fn new(set: u32, bindings: Vec<LayoutBinding>) -> Self {
        Self {
            set,
            flags: vk::DescriptorSetLayoutCreateFlags::empty(),
            bindings,
        }
    }
}

impl PartialEq for DescriptorSetLayoutInfo {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags && self.bindings == other.bindings
    }
}

impl Eq for DescriptorSetLayoutInfo {}

/// Reference to a layout owned by a [`DescriptorManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutHandle {
    manager: u64,
    slot: usize,
    set: u32,
}

impl DescriptorSetLayoutHandle {
    /// Index into the manager's layout storage.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Set index the layout was requested for.
    #[inline]
    pub fn set(&self) -> u32 {
        self.set
    }
}

struct LayoutSlot {
    info: DescriptorSetLayoutInfo,
    layout: Owned<vk::DescriptorSetLayout>,
}

/// Owns descriptor set layouts and the pool sets are allocated from.
///
/// Outstanding [`DescriptorSetHandle`]s keep the pool alive, so they may
/// outlive the manager.
pub struct DescriptorManager {
    id: u64,
    device: SharedDevice,
    layouts: Vec<LayoutSlot>,
    lookups: usize,
    pool: Arc<DescriptorPool>,
}

impl DescriptorManager {
    /// Creates a manager with an empty layout cache and a pool sized by
    /// `pool_config`.
    pub fn new(device: SharedDevice, pool_config: &DescriptorPoolConfig) -> RenderResult<Self> {
        pool_config.validate()?;
        let pool = DescriptorPool::new(device.clone(), pool_config.max_sets, &pool_config.pool_sizes)
            .map_err(RenderError::creating("descriptor pool"))?;

        let id = NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            "Descriptor manager {} ready: up to {} set(s)",
            id, pool_config.max_sets
        );

        Ok(Self {
            id,
            device,
            layouts: Vec::with_capacity(INITIAL_LAYOUT_CAPACITY),
            lookups: 0,
            pool: Arc::new(pool),
        })
    }

    /// Returns a handle to a layout equal to `info`, compiling it on first
    /// request.
    pub fn get_descriptor_set_layout(
        &mut self,
        info: &DescriptorSetLayoutInfo,
    ) -> RenderResult<DescriptorSetLayoutHandle> {
        let slot = match self.layouts.iter().position(|slot| slot.info == *info) {
            Some(slot) => {
                debug!("Descriptor set layout cache hit: slot {}", slot);
                slot
            }
            None => {
                let bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> =
                    info.bindings.iter().map(LayoutBinding::to_vk).collect();
                let create_info = vk::DescriptorSetLayoutCreateInfo::default()
                    .flags(info.flags)
                    .bindings(&bindings);
                let layout = self
                    .device
                    .create_descriptor_set_layout(&create_info)
                    .map_err(RenderError::creating("descriptor set layout"))?;

                self.layouts.push(LayoutSlot {
                    info: info.clone(),
                    layout: Owned::new(self.device.clone(), layout),
                });
                debug!(
                    "Created descriptor set layout: slot {}, {} binding(s)",
                    self.layouts.len() - 1,
                    info.bindings.len()
                );
                self.layouts.len() - 1
            }
        };

        self.lookups += 1;
        Ok(DescriptorSetLayoutHandle {
            manager: self.id,
            slot,
            set: info.set,
        })
    }

    fn slot(&self, handle: DescriptorSetLayoutHandle) -> RenderResult<&LayoutSlot> {
        if handle.manager != self.id {
            return Err(RenderError::Config(format!(
                "descriptor set layout handle belongs to manager {}, not {}",
                handle.manager, self.id
            )));
        }
        self.layouts.get(handle.slot).ok_or_else(|| {
            RenderError::Config(format!(
                "unknown descriptor set layout slot {}",
                handle.slot
            ))
        })
    }

    /// The layout `handle` refers to.
    pub fn resolve(&self, handle: DescriptorSetLayoutHandle) -> RenderResult<vk::DescriptorSetLayout> {
        self.slot(handle).map(|slot| slot.layout.handle())
    }

    /// The description `handle`'s layout was compiled from. For an alias
    /// its `set` is that of the first request; see [`set_index`].
    ///
    /// [`set_index`]: DescriptorManager::set_index
    pub fn layout_info(&self, handle: DescriptorSetLayoutHandle) -> RenderResult<&DescriptorSetLayoutInfo> {
        self.slot(handle).map(|slot| &slot.info)
    }

    /// The set index `handle` was requested for.
    pub fn set_index(&self, handle: DescriptorSetLayoutHandle) -> RenderResult<u32> {
        self.slot(handle).map(|_| handle.set)
    }

    /// Allocates `count` sets of `handle`'s layout. Zero sets allocate
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`RenderError::Config`] when the pool is exhausted or `handle` came
    /// from another manager.
    pub fn allocate_descriptor_sets(
        &self,
        handle: DescriptorSetLayoutHandle,
        count: usize,
    ) -> RenderResult<Vec<DescriptorSetHandle>> {
        let layout = self.resolve(handle)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let layouts = vec![layout; count];
        let sets = self.pool.allocate(&layouts).map_err(|err| {
            if is_pool_exhaustion(&err) {
                RenderError::Config(format!(
                    "descriptor pool exhausted allocating {count} set(s): {err}"
                ))
            } else {
                RenderError::ObjectCreation {
                    object: "descriptor set",
                    source: err,
                }
            }
        })?;

        debug!("Allocated {} descriptor set(s) from slot {}", count, handle.slot);
        Ok(sets
            .into_iter()
            .map(|set| DescriptorSetHandle {
                set,
                pool: self.pool.clone(),
            })
            .collect())
    }

    /// Distinct layouts compiled so far.
    #[inline]
    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }

    /// Lookups served so far, cache hits included.
    #[inline]
    pub fn handle_count(&self) -> usize {
        self.lookups
    }

    #[inline]
    pub fn layout_capacity(&self) -> usize {
        self.layouts.capacity()
    }

    #[inline]
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }
}

impl std::fmt::Debug for DescriptorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorManager")
            .field("id", &self.id)
            .field("layouts", &self.layouts.len())
            .field("lookups", &self.lookups)
            .finish()
    }
}

/// One descriptor set, returned to its pool on drop.
pub struct DescriptorSetHandle {
    set: vk::DescriptorSet,
    pool: Arc<DescriptorPool>,
}

impl DescriptorSetHandle {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Points `binding` at `range` bytes of `buffer` starting at `offset`.
    pub fn write_buffer(
        &self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    ) {
        let infos = [buffer_info(buffer, offset, range)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .descriptor_type(descriptor_type)
            .buffer_info(&infos);
        self.pool.device().update_descriptor_sets(&[write]);
    }

    /// Points a combined image sampler `binding` at `view`.
    pub fn write_image(
        &self,
        binding: u32,
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) {
        let infos = [image_info(sampler, view, layout)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&infos);
        self.pool.device().update_descriptor_sets(&[write]);
    }

    /// Points an input attachment `binding` at `view`, read in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    pub fn write_input_attachment(&self, binding: u32, view: vk::ImageView) {
        let infos = [image_info(
            vk::Sampler::null(),
            view,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
            .image_info(&infos);
        self.pool.device().update_descriptor_sets(&[write]);
    }
}

impl Drop for DescriptorSetHandle {
    fn drop(&mut self) {
        if let Err(e) = self.pool.free(&[self.set]) {
            error!("Failed to free descriptor set {:?}: {}", self.set, e);
        }
    }
}

impl std::fmt::Debug for DescriptorSetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DescriptorSetHandle").field(&self.set).finish()
    }
}

fn is_pool_exhaustion(err: &RhiError) -> bool {
    matches!(
        err.vk_result(),
        Some(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)
    )
}
