//! Precompiled SPIR-V shader modules.
//!
//! Shaders ship as `<name>.<stage>.spv` files in the configured shader
//! directory. The stage comes from the file name and every entry point is
//! `main`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use horizon_rhi::device::Device;
//! use horizon_rhi::shader::Shader;
//!
//! # fn example(device: Arc<Device>) -> Result<(), horizon_rhi::RhiError> {
//! let compute = Shader::load(device, Path::new("shaders"), "kerr.comp.spv")?;
//! assert!(compute.stage().is_compute());
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage a module runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Stage from the `vert`/`frag`/`comp` component of `name.<stage>.spv`.
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".spv")?;
        match stem.rsplit_once('.')?.1 {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "comp" => Some(Self::Compute),
            _ => None,
        }
    }

    pub fn is_compute(self) -> bool {
        self == Self::Compute
    }

    fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Splits SPIR-V bytes into little-endian words.
fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be a non-empty multiple of 4 bytes, got {} bytes",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// A loaded shader module and the stage it belongs to.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Loads `dir/file_name`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the stage cannot be inferred from
    /// the name, the file is missing or is not SPIR-V sized, or the Vulkan
    /// error if module creation fails.
    pub fn load(device: Arc<Device>, dir: &Path, file_name: &str) -> RhiResult<Self> {
        let stage = ShaderStage::from_file_name(file_name).ok_or_else(|| {
            RhiError::ShaderError(format!("cannot infer shader stage from '{}'", file_name))
        })?;

        let path = dir.join(file_name);
        let bytes = std::fs::read(&path)
            .map_err(|e| RhiError::ShaderError(format!("cannot read {:?}: {}", path, e)))?;
        let code = spirv_words(&bytes)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("Loaded {:?} shader {:?}", stage, path);

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Stage info for pipeline creation.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.flags())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_from_file_name() {
        assert_eq!(
            ShaderStage::from_file_name("quad.vert.spv"),
            Some(ShaderStage::Vertex)
        );
        assert_eq!(
            ShaderStage::from_file_name("overlay.frag.spv"),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(
            ShaderStage::from_file_name("schwarzschild.comp.spv"),
            Some(ShaderStage::Compute)
        );
        assert_eq!(ShaderStage::from_file_name("quad.vert"), None);
        assert_eq!(ShaderStage::from_file_name("quad.geom.spv"), None);
        assert_eq!(ShaderStage::from_file_name("comp.spv"), None);
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(ShaderStage::Compute.flags(), vk::ShaderStageFlags::COMPUTE);
        assert!(ShaderStage::Compute.is_compute());
        assert!(!ShaderStage::Fragment.is_compute());
    }

    #[test]
    fn test_spirv_words_rejects_misaligned() {
        assert!(spirv_words(&[0u8; 5]).is_err());
        assert!(spirv_words(&[]).is_err());
    }

    #[test]
    fn test_spirv_words_little_endian() {
        // SPIR-V magic number
        let words = spirv_words(&[0x03, 0x02, 0x23, 0x07]).unwrap();
        assert_eq!(words, vec![0x0723_0203]);
    }
}
