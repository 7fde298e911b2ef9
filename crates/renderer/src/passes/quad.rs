//! Full-screen quad that samples the compute output.

use std::sync::Arc;

use tracing::info;

use horizon_core::RendererConfig;
use horizon_rhi::RhiResult;
use horizon_rhi::descriptor::DescriptorSetLayout;
use horizon_rhi::device::Device;
use horizon_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};

use super::{PassTarget, load_shader};
use crate::frame_params::PassContext;

/// Draws one triangle covering the viewport; the vertex shader derives
/// positions from the vertex index, so there is no vertex input.
pub struct QuadPass {
    layout: PipelineLayout,
    pipeline: Pipeline,
}

impl QuadPass {
    /// # Errors
    ///
    /// Returns an error if the shaders cannot be loaded or pipeline
    /// creation fails.
    pub fn new(
        device: Arc<Device>,
        target: PassTarget,
        set_layout: &DescriptorSetLayout,
        config: &RendererConfig,
    ) -> RhiResult<Self> {
        let vertex = load_shader(&device, config, "quad.vert.spv")?;
        let fragment = load_shader(&device, config, "quad.frag.spv")?;

        let layout = PipelineLayout::new(device.clone(), &[set_layout.handle()], &[])?;
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&vertex)
            .fragment_shader(&fragment)
            .color_attachment_format(target.color_format)
            .build(device, &layout)?;

        info!("Quad pass created ({:?})", target.color_format);

        Ok(Self { layout, pipeline })
    }

    /// Records the draw. Must be inside the frame's render pass.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn run(&self, ctx: &PassContext<'_>) -> RhiResult<()> {
        let cmd = ctx.command_buffer;
        cmd.bind_pipeline(&self.pipeline);
        cmd.bind_set(&self.pipeline, &self.layout, ctx.descriptor_set);
        // Fullscreen triangle
        cmd.draw(3);
        Ok(())
    }
}
