//! Shader modules.
//!
//! A [`Shader`] owns one SPIR-V module for one pipeline stage. Its
//! [`ShaderId`] is derived from the module handle, so two `Shader`s never
//! share an id while both are alive; pipeline caches key on it.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use lumen_rhi::SharedDevice;
//! use lumen_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: SharedDevice) -> lumen_rhi::RhiResult<()> {
//! let vertex = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/mesh.vert.spv"),
//!     ShaderStage::Vertex,
//!     "main",
//! )?;
//! let _stage = vertex.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, CString};
use std::fmt;
use std::path::Path;

use ash::vk::{self, Handle};
use tracing::debug;

use crate::device::SharedDevice;
use crate::error::{RhiError, RhiResult};
use crate::owned::Owned;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Graphics pipeline stage a shader runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    /// Converts the stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        })
    }
}

/// Identity of a live shader module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(u64);

/// Vulkan shader module with its stage and entry point.
pub struct Shader {
    module: Owned<vk::ShaderModule>,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    /// Loads a SPIR-V module from a file.
    pub fn from_spirv_file(
        device: SharedDevice,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);
        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;
        Self::from_spirv_bytes(device, &bytes, stage, entry_point)
    }

    /// Creates a module from little-endian SPIR-V bytes.
    pub fn from_spirv_bytes(
        device: SharedDevice,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        if !bytes.len().is_multiple_of(4) {
            return Err(RhiError::ShaderError(format!(
                "SPIR-V code must be 4-byte aligned, got {} bytes",
                bytes.len()
            )));
        }
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::from_spirv_words(device, &words, stage, entry_point)
    }

    /// Creates a module from SPIR-V words.
    pub fn from_spirv_words(
        device: SharedDevice,
        words: &[u32],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        if words.first() != Some(&SPIRV_MAGIC) {
            return Err(RhiError::ShaderError(
                "missing SPIR-V magic number".to_string(),
            ));
        }
        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))?;

        let module = device.create_shader_module(words)?;
        debug!(
            "Created {} shader module ({} words, entry '{}')",
            stage,
            words.len(),
            entry_point.to_string_lossy()
        );

        Ok(Self {
            module: Owned::new(device, module),
            stage,
            entry_point,
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module.handle()
    }

    /// Returns the identity used to key pipeline caches.
    #[inline]
    pub fn id(&self) -> ShaderId {
        ShaderId(self.module.handle().as_raw())
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    /// Stage description for pipeline creation; borrows from `self`.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.handle())
            .name(&self.entry_point)
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("stage", &self.stage)
            .field("module", &self.handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mock::{MockDevice, MockObject};

    const MODULE: [u32; 5] = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(ShaderStage::Vertex.to_vk_stage(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_distinct_modules_have_distinct_ids() {
        let device = Arc::new(MockDevice::new());
        let a = Shader::from_spirv_words(device.clone(), &MODULE, ShaderStage::Vertex, "main")
            .unwrap();
        let b = Shader::from_spirv_words(device.clone(), &MODULE, ShaderStage::Vertex, "main")
            .unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.entry_point(), c"main");
    }

    #[test]
    fn test_bytes_are_little_endian_words() {
        let device = Arc::new(MockDevice::new());
        let bytes: Vec<u8> = MODULE.iter().flat_map(|w| w.to_le_bytes()).collect();
        let shader =
            Shader::from_spirv_bytes(device.clone(), &bytes, ShaderStage::Fragment, "main")
                .unwrap();
        assert_eq!(shader.stage(), ShaderStage::Fragment);
        drop(shader);
        assert_eq!(device.destroyed(MockObject::ShaderModule), 1);
    }

    #[test]
    fn test_invalid_spirv_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let misaligned = [0u8; 5];
        assert!(
            Shader::from_spirv_bytes(device.clone(), &misaligned, ShaderStage::Vertex, "main")
                .is_err()
        );
        assert!(
            Shader::from_spirv_words(device.clone(), &[1, 2, 3], ShaderStage::Vertex, "main")
                .is_err()
        );
        assert!(
            Shader::from_spirv_words(device.clone(), &MODULE, ShaderStage::Vertex, "ma\0in")
                .is_err()
        );
        assert_eq!(device.created(MockObject::ShaderModule), 0);
    }
}
