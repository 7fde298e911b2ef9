//! Overlay drawn on top of the quad.
//!
//! The overlay collects panels between [`OverlayPass::new_frame`] and
//! [`OverlayPass::render`] and draws them as alpha-blended rectangles in
//! the frame's render pass. It also owns a descriptor pool sized for an
//! immediate-mode UI backend and describes the swapchain through
//! [`OverlayTarget`], so such a backend can be initialized against it.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use horizon_core::RendererConfig;
use horizon_rhi::RhiResult;
use horizon_rhi::command::CommandBuffer;
use horizon_rhi::descriptor::{DescriptorPool, DescriptorPoolBuilder};
use horizon_rhi::device::Device;
use horizon_rhi::pipeline::{
    ColorBlendAttachment, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
};

use super::load_shader;

/// Descriptor types the UI pool reserves capacity for.
pub const UI_POOL_TYPES: [vk::DescriptorType; 11] = [
    vk::DescriptorType::SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
    vk::DescriptorType::STORAGE_TEXEL_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    vk::DescriptorType::INPUT_ATTACHMENT,
];

/// Descriptors of each type in the UI pool.
const UI_POOL_DESCRIPTORS_PER_TYPE: u32 = 1000;

/// What a UI backend needs to know about the presentation chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayTarget {
    pub color_format: vk::Format,
    pub image_count: u32,
    pub min_image_count: u32,
    pub queue_family: u32,
}

/// A rectangle in pixels, origin top-left, with an RGBA color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Panel {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub color: [f32; 4],
}

/// Push constant block read by `overlay.vert` / `overlay.frag`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PanelPushConstants {
    /// Corners in normalized device coordinates: min x, min y, max x, max y.
    pub rect: [f32; 4],
    pub color: [f32; 4],
}

impl PanelPushConstants {
    /// Converts a pixel-space panel for a viewport of `extent`.
    pub fn from_panel(panel: &Panel, extent: vk::Extent2D) -> Self {
        let width = extent.width.max(1) as f32;
        let height = extent.height.max(1) as f32;
        let to_ndc_x = |px: f32| (px / width) * 2.0 - 1.0;
        let to_ndc_y = |py: f32| (py / height) * 2.0 - 1.0;
        Self {
            rect: [
                to_ndc_x(panel.x),
                to_ndc_y(panel.y),
                to_ndc_x(panel.x + panel.width),
                to_ndc_y(panel.y + panel.height),
            ],
            color: panel.color,
        }
    }
}

/// Alpha-blended panel overlay plus the UI descriptor pool.
pub struct OverlayPass {
    layout: PipelineLayout,
    pipeline: Pipeline,
    ui_pool: DescriptorPool,
    target: OverlayTarget,
    visible: bool,
    extent: vk::Extent2D,
    panels: Vec<PanelPushConstants>,
}

impl OverlayPass {
    /// Builds the panel pipeline for `target.color_format` and the UI pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the shaders cannot be loaded, or pipeline or
    /// pool creation fails.
    pub fn new(
        device: Arc<Device>,
        target: OverlayTarget,
        config: &RendererConfig,
    ) -> RhiResult<Self> {
        let vertex = load_shader(&device, config, "overlay.vert.spv")?;
        let fragment = load_shader(&device, config, "overlay.frag.spv")?;

        let push_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<PanelPushConstants>() as u32,
        };
        let layout = PipelineLayout::new(device.clone(), &[], &[push_range])?;

        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .topology(vk::PrimitiveTopology::TRIANGLE_STRIP)
            .color_blend(ColorBlendAttachment::alpha_blend())
            .color_attachment_format(target.color_format)
            .build(device.clone(), &layout)?;

        let ui_pool = ui_descriptor_pool(device)?;

        info!(
            "Overlay pass created ({:?}, {} images)",
            target.color_format, target.image_count
        );

        Ok(Self {
            layout,
            pipeline,
            ui_pool,
            target,
            visible: config.overlay_visible,
            extent: vk::Extent2D::default(),
            panels: Vec::new(),
        })
    }

    /// Starts collecting panels for a frame of `extent`.
    pub fn new_frame(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
        self.panels.clear();
    }

    /// Queues a panel for this frame. Ignored while hidden.
    pub fn panel(&mut self, panel: Panel) {
        if self.visible {
            self.panels
                .push(PanelPushConstants::from_panel(&panel, self.extent));
        }
    }

    /// Records the queued panels into `cmd`. Records nothing while hidden.
    ///
    /// Must be called inside the frame's render pass, after the quad.
    pub fn render(&self, cmd: &CommandBuffer) {
        if !self.visible || self.panels.is_empty() {
            return;
        }

        cmd.bind_pipeline(&self.pipeline);
        for panel in &self.panels {
            cmd.push_constants(
                &self.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                panel,
            );
            cmd.draw(4);
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Flips visibility and returns the new state.
    pub fn toggle(&mut self) -> bool {
        self.visible = !self.visible;
        debug!("Overlay {}", if self.visible { "shown" } else { "hidden" });
        self.visible
    }

    /// Presentation chain description for a UI backend.
    pub fn target(&self) -> OverlayTarget {
        self.target
    }

    /// Updates image counts after a swapchain rebuild.
    pub fn set_image_counts(&mut self, image_count: u32, min_image_count: u32) {
        self.target.image_count = image_count;
        self.target.min_image_count = min_image_count;
    }

    /// Pool a UI backend allocates its descriptor sets from.
    pub fn ui_pool(&self) -> &DescriptorPool {
        &self.ui_pool
    }
}

fn ui_descriptor_pool(device: Arc<Device>) -> RhiResult<DescriptorPool> {
    UI_POOL_TYPES
        .iter()
        .fold(DescriptorPoolBuilder::new(device), |builder, &ty| {
            builder.add_pool_size(ty, UI_POOL_DESCRIPTORS_PER_TYPE)
        })
        .set_pool_flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .set_max_sets(UI_POOL_DESCRIPTORS_PER_TYPE * UI_POOL_TYPES.len() as u32)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    #[test]
    fn test_full_screen_panel_maps_to_ndc_corners() {
        let panel = Panel {
            x: 0.0,
            y: 0.0,
            width: 800.0,
            height: 600.0,
            color: [1.0, 0.0, 0.0, 0.5],
        };
        let pc = PanelPushConstants::from_panel(&panel, EXTENT);
        assert_eq!(pc.rect, [-1.0, -1.0, 1.0, 1.0]);
        assert_eq!(pc.color, [1.0, 0.0, 0.0, 0.5]);
    }

    #[test]
    fn test_centered_panel() {
        let panel = Panel {
            x: 200.0,
            y: 150.0,
            width: 400.0,
            height: 300.0,
            color: [0.0; 4],
        };
        let pc = PanelPushConstants::from_panel(&panel, EXTENT);
        assert_eq!(pc.rect, [-0.5, -0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_zero_extent_does_not_divide_by_zero() {
        let panel = Panel {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            color: [0.0; 4],
        };
        let pc = PanelPushConstants::from_panel(&panel, vk::Extent2D::default());
        assert!(pc.rect.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_push_constants_fit_minimum_limit() {
        // Vulkan guarantees at least 128 bytes of push constants
        assert!(std::mem::size_of::<PanelPushConstants>() <= 128);
        assert_eq!(std::mem::size_of::<PanelPushConstants>(), 32);
    }

    #[test]
    fn test_ui_pool_types_are_distinct() {
        let unique: std::collections::HashSet<_> = UI_POOL_TYPES.iter().collect();
        assert_eq!(unique.len(), 11);
        assert_eq!(UI_POOL_DESCRIPTORS_PER_TYPE * UI_POOL_TYPES.len() as u32, 11_000);
    }
}
