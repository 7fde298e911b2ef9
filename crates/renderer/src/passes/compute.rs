//! The raymarching compute pass.

use std::sync::Arc;

use ash::vk;
use tracing::info;

use horizon_core::RendererConfig;
use horizon_rhi::RhiResult;
use horizon_rhi::descriptor::DescriptorSetLayout;
use horizon_rhi::device::Device;
use horizon_rhi::pipeline::{Pipeline, PipelineLayout};

use super::{PassTarget, load_shader};
use crate::dispatch::dispatch_group_count;
use crate::frame_params::{FrameParameters, PassContext, SimulationVariant};

const SCHWARZSCHILD_SHADER: &str = "schwarzschild.comp.spv";
const KERR_SHADER: &str = "kerr.comp.spv";

/// Dispatches the variant's kernel into the slot's storage image.
///
/// Both kernels share one pipeline layout, so switching variants is only a
/// pipeline bind.
pub struct ComputePass {
    layout: PipelineLayout,
    schwarzschild: Pipeline,
    kerr: Pipeline,
    workgroup_size: (u32, u32),
}

impl ComputePass {
    /// # Errors
    ///
    /// Returns an error if either shader cannot be loaded or pipeline
    /// creation fails.
    pub fn new(
        device: Arc<Device>,
        _target: PassTarget,
        set_layout: &DescriptorSetLayout,
        config: &RendererConfig,
    ) -> RhiResult<Self> {
        let layout = PipelineLayout::new(device.clone(), &[set_layout.handle()], &[])?;

        let schwarzschild_shader = load_shader(&device, config, SCHWARZSCHILD_SHADER)?;
        let kerr_shader = load_shader(&device, config, KERR_SHADER)?;
        let schwarzschild = Pipeline::create_compute(device.clone(), &schwarzschild_shader, &layout)?;
        let kerr = Pipeline::create_compute(device, &kerr_shader, &layout)?;

        info!(
            "Compute pass created (workgroup {}x{})",
            config.workgroup_size.0, config.workgroup_size.1
        );

        Ok(Self {
            layout,
            schwarzschild,
            kerr,
            workgroup_size: config.workgroup_size,
        })
    }

    fn pipeline(&self, variant: SimulationVariant) -> &Pipeline {
        match variant {
            SimulationVariant::Schwarzschild => &self.schwarzschild,
            SimulationVariant::Kerr => &self.kerr,
        }
    }

    /// Records the dispatch into `ctx.command_buffer`, followed by a
    /// barrier making the writes visible to fragment shader reads.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn run(&self, ctx: &PassContext<'_>, params: &FrameParameters) -> RhiResult<()> {
        let cmd = ctx.command_buffer;
        let (groups_x, groups_y) = dispatch_group_count(ctx.extent, self.workgroup_size);

        let pipeline = self.pipeline(params.variant());
        cmd.bind_pipeline(pipeline);
        cmd.bind_set(pipeline, &self.layout, ctx.descriptor_set);
        cmd.dispatch(groups_x, groups_y);

        cmd.memory_barrier(
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        );
        Ok(())
    }
}
