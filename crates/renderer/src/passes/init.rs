//! Seeds the storage images before the first compute dispatch.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use horizon_core::RendererConfig;
use horizon_rhi::RhiResult;
use horizon_rhi::command::OneShotCommands;
use horizon_rhi::descriptor::DescriptorSetLayout;
use horizon_rhi::device::Device;
use horizon_rhi::pipeline::{Pipeline, PipelineLayout};
use horizon_rhi::sync::Fence;

use super::{PassTarget, load_shader};
use crate::dispatch::dispatch_group_count;
use crate::frame_params::PassContext;

const SHADER: &str = "frame_init.comp.spv";

/// One-shot compute pass that writes the initial state of a slot's
/// storage image.
///
/// The pass is armed per slot. Running it on an armed slot records a
/// separate command buffer, submits it with the pass's own fence and
/// blocks until it completes; the slot is then disarmed. A resize or a
/// camera jump re-arms every slot.
pub struct InitPass {
    device: Arc<Device>,
    layout: PipelineLayout,
    pipeline: Pipeline,
    fence: Fence,
    workgroup_size: (u32, u32),
    armed: Vec<bool>,
}

impl InitPass {
    /// Builds the init pipeline against `set_layout`. Every slot starts
    /// armed.
    ///
    /// # Errors
    ///
    /// Returns an error if the shader cannot be loaded or pipeline creation
    /// fails.
    pub fn new(
        device: Arc<Device>,
        _target: PassTarget,
        set_layout: &DescriptorSetLayout,
        config: &RendererConfig,
    ) -> RhiResult<Self> {
        let shader = load_shader(&device, config, SHADER)?;
        let layout = PipelineLayout::new(device.clone(), &[set_layout.handle()], &[])?;
        let pipeline = Pipeline::create_compute(device.clone(), &shader, &layout)?;
        let fence = Fence::new(device.clone(), false)?;

        info!("Init pass created");

        Ok(Self {
            device,
            layout,
            pipeline,
            fence,
            workgroup_size: config.workgroup_size,
            armed: vec![true; config.frames_in_flight],
        })
    }

    /// Whether `frame_index` still needs seeding.
    pub fn is_armed(&self, frame_index: usize) -> bool {
        self.armed.get(frame_index).copied().unwrap_or(false)
    }

    /// Marks every slot for seeding.
    pub fn rearm(&mut self) {
        self.armed.fill(true);
        debug!("Init pass re-armed");
    }

    /// Seeds `ctx.frame_index`'s image if armed; otherwise does nothing.
    ///
    /// Uses `ctx.fence` when given, else the pass's own fence. Blocks until
    /// the dispatch has finished.
    ///
    /// # Errors
    ///
    /// Returns an error if recording, submission or the wait fails. The
    /// slot stays armed in that case.
    pub fn run(&mut self, ctx: &PassContext<'_>) -> RhiResult<()> {
        if !self.is_armed(ctx.frame_index) {
            return Ok(());
        }

        let (groups_x, groups_y) = dispatch_group_count(ctx.extent, self.workgroup_size);

        let one_shot = OneShotCommands::begin(self.device.clone())?;
        let cmd = one_shot.commands();
        cmd.bind_pipeline(&self.pipeline);
        cmd.bind_set(&self.pipeline, &self.layout, ctx.descriptor_set);
        cmd.dispatch(groups_x, groups_y);
        // Later submissions on this queue read the seeded image
        cmd.memory_barrier(
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        );
        one_shot.submit(Some(ctx.fence.unwrap_or(&self.fence)))?;

        self.armed[ctx.frame_index] = false;
        debug!(
            "Seeded frame slot {} ({}x{} groups)",
            ctx.frame_index, groups_x, groups_y
        );
        Ok(())
    }
}
