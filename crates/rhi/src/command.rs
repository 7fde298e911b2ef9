//! Command recording.
//!
//! - [`CommandPool`] backs the per-slot buffers of the frame loop
//! - [`CommandBuffer`] records the handful of commands the passes need
//! - [`OneShotCommands`] records setup work (storage image seeding) that is
//!   submitted on its own and waited for
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use horizon_rhi::device::Device;
//! use horizon_rhi::command::{CommandBuffer, CommandPool, OneShotCommands};
//!
//! # fn example(device: Arc<Device>) -> Result<(), horizon_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_family())?;
//! let cmd = CommandBuffer::new(device.clone(), &pool)?;
//! cmd.begin()?;
//! cmd.end()?;
//!
//! let one_shot = OneShotCommands::begin(device.clone())?;
//! one_shot.commands().dispatch(1, 1);
//! one_shot.submit(None)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::pipeline::{Pipeline, PipelineLayout};
use crate::sync::Fence;

/// Pool for the frame slots' command buffers.
///
/// Created with `RESET_COMMAND_BUFFER` so a slot can reset its buffer while
/// the others are still pending.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// # Errors
    ///
    /// Returns the Vulkan error if creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!("Frame command pool created for family {}", queue_family_index);

        Ok(Self { device, pool })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
    }
}

/// A primary command buffer.
///
/// Does not own the handle; it is freed with its pool. Clones refer to the
/// same command buffer.
#[derive(Clone)]
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates a primary command buffer from `pool`.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error if allocation fails.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe { device.handle().allocate_command_buffers(&alloc_info)? }
            .into_iter()
            .next()
            .ok_or_else(|| RhiError::InvalidHandle("empty command buffer allocation".to_string()))?;
        Ok(Self { device, buffer })
    }

    fn from_handle(device: Arc<Device>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording for a single submission.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error, e.g. if the buffer is already recording.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the Vulkan error if any recorded command was invalid.
    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    /// Returns the buffer to the initial state. Its fence must have
    /// signaled.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    /// Binds `pipeline` at its own bind point.
    pub fn bind_pipeline(&self, pipeline: &Pipeline) {
        unsafe {
            self.device.handle().cmd_bind_pipeline(
                self.buffer,
                pipeline.bind_point(),
                pipeline.handle(),
            );
        }
    }

    /// Binds `set` as set 0 for `pipeline`, which was built with `layout`.
    pub fn bind_set(&self, pipeline: &Pipeline, layout: &PipelineLayout, set: vk::DescriptorSet) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                pipeline.bind_point(),
                layout.handle(),
                0,
                &[set],
                &[],
            );
        }
    }

    /// Pushes `data` at offset 0.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) {
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                layout.handle(),
                stages,
                0,
                bytemuck::bytes_of(data),
            );
        }
    }

    pub fn set_viewport(&self, viewport: &vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, std::slice::from_ref(viewport));
        }
    }

    pub fn set_scissor(&self, scissor: &vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, std::slice::from_ref(scissor));
        }
    }

    /// One instance of `vertex_count` vertices generated in the shader.
    pub fn draw(&self, vertex_count: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw(self.buffer, vertex_count, 1, 0, 0);
        }
    }

    /// Dispatches a 2D grid of workgroups.
    pub fn dispatch(&self, groups_x: u32, groups_y: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_dispatch(self.buffer, groups_x, groups_y, 1);
        }
    }

    /// Records a layout transition or other image barrier.
    pub fn image_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            );
        }
    }

    /// Makes `src_access` writes at `src_stage` visible to `dst_access` at
    /// `dst_stage`.
    pub fn memory_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    ) {
        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);
        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                self.buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }
}

impl PartialEq for CommandBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CommandBuffer").field(&self.buffer).finish()
    }
}

/// Raw one-shot handle that is released exactly once, either by submit
/// or by drop.
#[derive(Debug)]
struct PendingOneShot {
    raw: Option<vk::CommandBuffer>,
}

impl PendingOneShot {
    fn new(raw: vk::CommandBuffer) -> Self {
        Self { raw: Some(raw) }
    }

    /// Hands the buffer over for submission.
    fn take(&mut self) -> Option<vk::CommandBuffer> {
        self.raw.take()
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        self.raw.is_some()
    }
}

/// A command buffer recorded outside the frame loop and submitted on its
/// own.
///
/// Created with [`OneShotCommands::begin`], recorded through
/// [`OneShotCommands::commands`], and consumed by
/// [`OneShotCommands::submit`], which blocks until the device is done.
/// Dropping it unsubmitted frees the buffer.
pub struct OneShotCommands {
    device: Arc<Device>,
    commands: CommandBuffer,
    pending: PendingOneShot,
}

impl OneShotCommands {
    /// Allocates and begins a one-shot command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or begin fails.
    pub fn begin(device: Arc<Device>) -> RhiResult<Self> {
        let raw = device.begin_single_time_commands()?;
        let commands = CommandBuffer::from_handle(device.clone(), raw);
        Ok(Self {
            device,
            commands,
            pending: PendingOneShot::new(raw),
        })
    }

    /// The recording command buffer.
    #[inline]
    pub fn commands(&self) -> &CommandBuffer {
        &self.commands
    }

    /// Ends, submits and waits. When `fence` is given it is reset first and
    /// signalled by the submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the fence reset, submission or wait fails.
    pub fn submit(mut self, fence: Option<&Fence>) -> RhiResult<()> {
        if let Some(fence) = fence {
            fence.reset()?;
        }
        let raw = self
            .pending
            .take()
            .ok_or_else(|| RhiError::InvalidHandle("one-shot buffer already released".to_string()))?;
        self.device
            .end_single_time_commands(raw, fence.map(Fence::handle))
    }
}

impl Drop for OneShotCommands {
    fn drop(&mut self) {
        if let Some(raw) = self.pending.take() {
            if let Err(e) = self.device.free_single_time_commands(raw) {
                error!("Leaking unsubmitted one-shot command buffer: {}", e);
            } else {
                debug!("Freed unsubmitted one-shot command buffer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_command_types_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
        assert_send::<CommandPool>();
        assert_send::<OneShotCommands>();
    }

    #[test]
    fn test_one_shot_released_once() {
        let raw = vk::CommandBuffer::from_raw(0x42);

        let mut submitted = PendingOneShot::new(raw);
        assert_eq!(submitted.take(), Some(raw));
        // Drop after submit has nothing left to free.
        assert!(!submitted.is_pending());
        assert_eq!(submitted.take(), None);

        let abandoned = PendingOneShot::new(raw);
        assert!(abandoned.is_pending());
    }
}
