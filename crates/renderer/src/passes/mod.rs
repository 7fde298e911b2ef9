//! The per-frame passes: init, compute, full-screen quad and overlay.
//!
//! A frame runs `[init] -> compute -> quad -> overlay -> present`. Init and
//! compute record outside the render pass; quad and overlay record inside
//! it, quad first.

mod compute;
mod init;
mod overlay;
mod quad;

pub use compute::ComputePass;
pub use init::InitPass;
pub use overlay::{OverlayPass, OverlayTarget, Panel, PanelPushConstants, UI_POOL_TYPES};
pub use quad::QuadPass;

use std::sync::Arc;

use ash::vk;

use horizon_core::RendererConfig;
use horizon_rhi::RhiResult;
use horizon_rhi::device::Device;
use horizon_rhi::shader::Shader;

/// Output a pass renders for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassTarget {
    /// Color attachment format; unused by compute-only passes.
    pub color_format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Loads a shader from the configured shader directory.
fn load_shader(device: &Arc<Device>, config: &RendererConfig, file_name: &str) -> RhiResult<Shader> {
    Shader::load(device.clone(), &config.shader_dir, file_name)
}
