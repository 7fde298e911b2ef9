//! Frame orchestration and the presentation chain.
//!
//! [`FrameOrchestrator`] owns the Vulkan instance, surface, device,
//! swapchain and the per-slot command buffers and synchronization objects.
//! Each frame follows the same sequence:
//!
//! ```text
//! begin_frame        wait slot fence, acquire image, begin recording
//!   (compute work)
//!   begin_render_pass  UNDEFINED -> COLOR_ATTACHMENT, clear, viewport/scissor
//!     (quad, overlay)
//!   end_render_pass    COLOR_ATTACHMENT -> PRESENT_SRC
//! end_frame          submit, present, advance slot
//! ```
//!
//! An out-of-date or suboptimal surface is rebuilt inside the orchestrator
//! and never reported to the caller; `begin_frame` returns `None` for that
//! frame instead. While the window is minimized the rebuild is deferred.
//!
//! # Example
//!
//! ```no_run
//! use horizon_renderer::orchestrator::FrameOrchestrator;
//!
//! # fn example(orchestrator: &mut FrameOrchestrator, resized: bool) -> Result<(), horizon_rhi::RhiError> {
//! if let Some(cmd) = orchestrator.begin_frame()? {
//!     // Compute dispatches go here
//!     orchestrator.begin_render_pass(&cmd)?;
//!     // Draws go here
//!     orchestrator.end_render_pass(&cmd)?;
//!     orchestrator.end_frame(resized)?;
//! }
//! # Ok(())
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use horizon_core::RendererConfig;
use horizon_platform::{Surface, Window};
use horizon_rhi::command::{CommandBuffer, CommandPool};
use horizon_rhi::device::{Device, layout_transition_barrier};
use horizon_rhi::instance::Instance;
use horizon_rhi::physical_device::select_physical_device;
use horizon_rhi::rendering::ColorTarget;
use horizon_rhi::swapchain::Swapchain;
use horizon_rhi::sync::FrameSync;
use horizon_rhi::{RhiError, RhiResult};

/// Clear color for the presentable image.
pub const CLEAR_COLOR: [f32; 4] = [0.01, 0.01, 0.01, 1.0];

// =============================================================================
// Pure frame bookkeeping
// =============================================================================

/// Slot index and open-frame state, kept apart from the GPU objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameState {
    frame_index: usize,
    frames_in_flight: usize,
    /// Acquired image while a frame is open.
    image_index: Option<u32>,
}

impl FrameState {
    /// # Panics
    ///
    /// Panics if `frames_in_flight` is zero.
    pub fn new(frames_in_flight: usize) -> Self {
        assert!(frames_in_flight > 0, "frames_in_flight must be at least 1");
        Self {
            frame_index: 0,
            frames_in_flight,
            image_index: None,
        }
    }

    /// Opens a frame on `image_index`.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already open.
    pub fn begin(&mut self, image_index: u32) {
        assert!(
            self.image_index.is_none(),
            "Cannot call begin_frame while a frame is already in progress"
        );
        self.image_index = Some(image_index);
    }

    /// Closes the open frame and returns its image index.
    ///
    /// # Panics
    ///
    /// Panics if no frame is open.
    pub fn finish(&mut self) -> u32 {
        self.image_index
            .take()
            .unwrap_or_else(|| panic!("Cannot call end_frame while no frame is in progress"))
    }

    /// Moves to the next slot.
    ///
    /// # Panics
    ///
    /// Panics if a frame is still open.
    pub fn advance(&mut self) {
        assert!(
            self.image_index.is_none(),
            "Cannot advance the frame index while a frame is in progress"
        );
        self.frame_index = (self.frame_index + 1) % self.frames_in_flight;
    }

    /// Image acquired for the open frame.
    ///
    /// # Panics
    ///
    /// Panics if no frame is open.
    pub fn image_index(&self) -> u32 {
        self.image_index
            .unwrap_or_else(|| panic!("Cannot get the image index while no frame is in progress"))
    }

    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    #[inline]
    pub fn is_in_progress(&self) -> bool {
        self.image_index.is_some()
    }
}

/// Outcome of an image acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquiredImage {
    /// Render into this swapchain image.
    Index(u32),
    /// The surface must be rebuilt before rendering.
    Stale,
}

/// Whether the surface can keep being used after a present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceStatus {
    Ready,
    Stale,
}

/// Sorts an acquire result into usable, stale, or fatal.
///
/// A suboptimal acquire is still usable; the present that follows reports
/// it again and triggers the rebuild.
///
/// # Errors
///
/// Returns any result other than success, suboptimal or out-of-date.
pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> RhiResult<AcquiredImage> {
    match result {
        Ok((index, _suboptimal)) => Ok(AcquiredImage::Index(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquiredImage::Stale),
        Err(e) => Err(RhiError::VulkanError(e)),
    }
}

/// Sorts a present result. A pending window resize also makes the surface
/// stale.
///
/// # Errors
///
/// Returns any result other than success, suboptimal or out-of-date.
pub fn classify_present(
    result: Result<bool, vk::Result>,
    window_resized: bool,
) -> RhiResult<SurfaceStatus> {
    match result {
        Ok(suboptimal) if suboptimal || window_resized => Ok(SurfaceStatus::Stale),
        Ok(_) => Ok(SurfaceStatus::Ready),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
            Ok(SurfaceStatus::Stale)
        }
        Err(e) => Err(RhiError::VulkanError(e)),
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives acquire, record, submit and present over N frame slots.
///
/// # Resource Destruction Order
///
/// 1. Wait for the device to idle
/// 2. Per-slot semaphores, fences and command buffers
/// 3. Command pool
/// 4. Swapchain, with its per-image semaphores
/// 5. Surface
/// 6. Device (once every other holder of the `Arc` is gone)
/// 7. Instance
pub struct FrameOrchestrator {
    instance: ManuallyDrop<Instance>,
    surface: ManuallyDrop<Surface>,
    device: ManuallyDrop<Arc<Device>>,
    swapchain: ManuallyDrop<Swapchain>,
    command_pool: ManuallyDrop<CommandPool>,

    /// One command buffer per slot.
    command_buffers: Vec<CommandBuffer>,
    /// Acquire semaphore and in-flight fence per slot.
    frame_sync: Vec<FrameSync>,

    state: FrameState,
    /// Latest framebuffer size reported by the window.
    window_extent: vk::Extent2D,
    /// A rebuild was requested while the window was minimized.
    recreate_pending: bool,
    /// Bumped on every swapchain rebuild.
    surface_generation: u64,
}

impl FrameOrchestrator {
    /// Creates the instance, surface, device, swapchain and per-slot
    /// resources for `window`.
    ///
    /// # Arguments
    ///
    /// * `window` - The window to present to
    /// * `config` - Frame count and validation settings
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan object cannot be created or no
    /// suitable GPU exists.
    pub fn new(window: &Window, config: &RendererConfig) -> RhiResult<Self> {
        let extent = window.extent();
        info!(
            "Initializing frame orchestrator ({}x{}, {} frames in flight)",
            extent.width, extent.height, config.frames_in_flight
        );

        let instance = Instance::new(config.enable_validation)?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            extent.width,
            extent.height,
        )?;

        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;

        let frames_in_flight = config.frames_in_flight;
        let mut command_buffers = Vec::with_capacity(frames_in_flight);
        let mut frame_sync = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            command_buffers.push(CommandBuffer::new(device.clone(), &command_pool)?);
            frame_sync.push(FrameSync::new(device.clone())?);
            debug!("Created frame slot {}", i);
        }

        info!(
            "Frame orchestrator ready: {} swapchain images, {:?}",
            swapchain.image_count(),
            swapchain.format()
        );

        Ok(Self {
            instance: ManuallyDrop::new(instance),
            surface: ManuallyDrop::new(surface),
            device: ManuallyDrop::new(device),
            swapchain: ManuallyDrop::new(swapchain),
            command_pool: ManuallyDrop::new(command_pool),
            command_buffers,
            frame_sync,
            state: FrameState::new(frames_in_flight),
            window_extent: extent,
            recreate_pending: false,
            surface_generation: 0,
        })
    }

    /// Starts a frame and returns the slot's command buffer in the recording
    /// state, or `None` if the surface had to be rebuilt (or the window is
    /// minimized) and this frame should be skipped.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting, acquiring or beginning the command
    /// buffer fails for a reason other than a stale surface.
    pub fn begin_frame(&mut self) -> RhiResult<Option<CommandBuffer>> {
        assert!(
            !self.state.is_in_progress(),
            "Cannot call begin_frame while a frame is already in progress"
        );

        if self.recreate_pending && !self.recreate_swapchain()? {
            return Ok(None);
        }

        let slot = self.state.frame_index();
        let sync = &self.frame_sync[slot];
        sync.in_flight().wait()?;

        let acquired =
            classify_acquire(self.swapchain.acquire_next_image(sync.image_available().handle()))?;
        let image_index = match acquired {
            AcquiredImage::Index(index) => index,
            AcquiredImage::Stale => {
                debug!("Swapchain out of date during acquire");
                self.recreate_swapchain()?;
                return Ok(None);
            }
        };

        // Another slot may still be rendering into this image
        self.swapchain
            .guard_image(image_index, sync.in_flight().handle())?;

        // Reset only once we know work will be submitted
        sync.in_flight().reset()?;

        let cmd = &self.command_buffers[slot];
        cmd.reset()?;
        cmd.begin()?;

        self.state.begin(image_index);
        Ok(Some(cmd.clone()))
    }

    /// Ends recording, submits, presents and advances to the next slot.
    ///
    /// The surface is rebuilt afterwards if presentation reported it stale
    /// or `window_resized` is set.
    ///
    /// # Panics
    ///
    /// Panics if no frame is in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if ending, submitting or presenting fails for a
    /// reason other than a stale surface. The frame is closed either way.
    pub fn end_frame(&mut self, window_resized: bool) -> RhiResult<()> {
        assert!(
            self.state.is_in_progress(),
            "Cannot call end_frame while no frame is in progress"
        );

        let result = self.submit_and_present(window_resized);

        self.state.finish();
        self.state.advance();

        if result? == SurfaceStatus::Stale {
            debug!("Swapchain stale after present, recreating");
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    fn submit_and_present(&self, window_resized: bool) -> RhiResult<SurfaceStatus> {
        let slot = self.state.frame_index();
        let image_index = self.state.image_index();
        let sync = &self.frame_sync[slot];
        let cmd = &self.command_buffers[slot];

        cmd.end()?;

        let wait_semaphores = [sync.image_available().handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.swapchain.render_finished(image_index)];
        let command_buffers = [cmd.handle()];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer finished recording above and the slot
        // fence was reset in begin_frame.
        unsafe {
            self.device
                .submit_graphics(&[submit_info], sync.in_flight().handle())?;
        }

        classify_present(
            self.swapchain
                .present(self.device.present_queue(), image_index),
            window_resized,
        )
    }

    /// Transitions the acquired image for rendering, begins dynamic
    /// rendering with a clear, and sets a full-extent viewport and scissor.
    ///
    /// # Panics
    ///
    /// Panics if no frame is in progress or `cmd` is not the current slot's
    /// command buffer.
    ///
    /// # Errors
    ///
    /// Currently infallible; the result leaves room for attachment setup
    /// that can fail.
    pub fn begin_render_pass(&self, cmd: &CommandBuffer) -> RhiResult<()> {
        self.assert_current_command_buffer(cmd, "begin_render_pass");

        let image_index = self.state.image_index() as usize;
        let extent = self.swapchain.extent();

        // Source stage chains with the acquire semaphore wait
        let barrier = layout_transition_barrier(
            self.swapchain.image(image_index),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        cmd.image_barrier(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            &barrier,
        );

        ColorTarget::new(self.swapchain.image_view(image_index), extent, CLEAR_COLOR).begin(cmd);

        Ok(())
    }

    /// Ends dynamic rendering and transitions the image for presentation.
    ///
    /// # Panics
    ///
    /// Panics if no frame is in progress or `cmd` is not the current slot's
    /// command buffer.
    ///
    /// # Errors
    ///
    /// Currently infallible.
    pub fn end_render_pass(&self, cmd: &CommandBuffer) -> RhiResult<()> {
        self.assert_current_command_buffer(cmd, "end_render_pass");

        cmd.end_rendering();

        let image_index = self.state.image_index() as usize;
        let barrier = layout_transition_barrier(
            self.swapchain.image(image_index),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        cmd.image_barrier(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            &barrier,
        );

        Ok(())
    }

    fn assert_current_command_buffer(&self, cmd: &CommandBuffer, operation: &str) {
        assert!(
            self.state.is_in_progress(),
            "Cannot call {operation} while no frame is in progress"
        );
        assert!(
            *cmd == self.command_buffers[self.state.frame_index()],
            "Cannot call {operation} on a command buffer from a different frame"
        );
    }

    /// Records the window's framebuffer size for the next rebuild.
    pub fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
    }

    /// Rebuilds the swapchain at the last reported window size.
    ///
    /// Returns `false` without touching the swapchain while the window is
    /// minimized; the rebuild is then retried by the next `begin_frame`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebuild fails, including
    /// [`RhiError::SwapchainError`] when the format or color space changed.
    pub fn recreate_swapchain(&mut self) -> RhiResult<bool> {
        let extent = self.window_extent;
        if extent.width == 0 || extent.height == 0 {
            if !self.recreate_pending {
                debug!("Window minimized, deferring swapchain recreation");
            }
            self.recreate_pending = true;
            return Ok(false);
        }

        self.device.wait_idle()?;

        self.swapchain.recreate(
            &self.instance,
            self.surface.handle(),
            extent.width,
            extent.height,
        )?;

        self.recreate_pending = false;
        self.surface_generation += 1;

        info!(
            "Swapchain recreated: {}x{} (generation {})",
            self.swapchain.width(),
            self.swapchain.height(),
            self.surface_generation
        );
        Ok(true)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The logical device shared with passes and resources.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Slot being (or about to be) recorded.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.state.frame_index()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.state.frames_in_flight()
    }

    /// Swapchain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    #[inline]
    pub fn min_image_count(&self) -> u32 {
        self.swapchain.min_image_count()
    }

    #[inline]
    pub fn is_frame_in_progress(&self) -> bool {
        self.state.is_in_progress()
    }

    /// Number of swapchain rebuilds so far.
    #[inline]
    pub fn surface_generation(&self) -> u64 {
        self.surface_generation
    }

    /// Blocks until the device has finished all submitted work.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!(
                "Failed to wait for device idle during orchestrator drop: {:?}",
                e
            );
        }

        self.frame_sync.clear();
        self.command_buffers.clear();

        unsafe {
            ManuallyDrop::drop(&mut self.command_pool);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.surface);

            if Arc::strong_count(&self.device) > 1 {
                warn!(
                    "Device still has {} other owners; it will outlive the instance",
                    Arc::strong_count(&self.device) - 1
                );
            }
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Frame orchestrator destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_state_cycles_slots() {
        let mut state = FrameState::new(2);
        let mut seen = Vec::new();
        for image in 0..5 {
            state.begin(image % 3);
            seen.push(state.frame_index());
            assert_eq!(state.finish(), image % 3);
            state.advance();
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_frame_state_single_slot() {
        let mut state = FrameState::new(1);
        state.advance();
        assert_eq!(state.frame_index(), 0);
    }

    #[test]
    #[should_panic(expected = "already in progress")]
    fn test_double_begin_panics() {
        let mut state = FrameState::new(2);
        state.begin(0);
        state.begin(1);
    }

    #[test]
    #[should_panic(expected = "no frame is in progress")]
    fn test_finish_without_begin_panics() {
        let mut state = FrameState::new(2);
        state.finish();
    }

    #[test]
    #[should_panic(expected = "while a frame is in progress")]
    fn test_advance_with_open_frame_panics() {
        let mut state = FrameState::new(2);
        state.begin(0);
        state.advance();
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn test_zero_frames_in_flight_panics() {
        FrameState::new(0);
    }

    #[test]
    fn test_classify_acquire() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            AcquiredImage::Index(2)
        );
        assert_eq!(
            classify_acquire(Ok((1, true))).unwrap(),
            AcquiredImage::Index(1)
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquiredImage::Stale
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
    }

    #[test]
    fn test_classify_present() {
        assert_eq!(
            classify_present(Ok(false), false).unwrap(),
            SurfaceStatus::Ready
        );
        assert_eq!(
            classify_present(Ok(true), false).unwrap(),
            SurfaceStatus::Stale
        );
        assert_eq!(
            classify_present(Ok(false), true).unwrap(),
            SurfaceStatus::Stale
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR), false).unwrap(),
            SurfaceStatus::Stale
        );
        assert_eq!(
            classify_present(Err(vk::Result::SUBOPTIMAL_KHR), false).unwrap(),
            SurfaceStatus::Stale
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR), false).is_err());
    }

    #[test]
    fn test_clear_color() {
        assert_eq!(CLEAR_COLOR, [0.01, 0.01, 0.01, 1.0]);
    }

    #[test]
    fn test_orchestrator_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameOrchestrator>();
    }
}
