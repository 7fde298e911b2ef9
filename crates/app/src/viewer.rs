//! The black hole viewer: frame orchestrator, passes and slot resources
//! wired into one frame loop.

use anyhow::{Context, Result};
use ash::vk;
use tracing::{debug, info, warn};

use horizon_core::RendererConfig;
use horizon_platform::Window;
use horizon_renderer::passes::{
    ComputePass, InitPass, OverlayPass, OverlayTarget, Panel, PassTarget, QuadPass,
};
use horizon_renderer::{
    FrameOrchestrator, FrameParameters, PassContext, ResizeTracker, SimulationVariant,
    ensure_current,
};
use horizon_rhi::storage_image::storage_format_from_name;

use crate::camera::OrbitCamera;
use crate::slots::SlotResources;

/// Frame time that fills the overlay's timing bar.
const FRAME_BUDGET_SECS: f32 = 1.0 / 30.0;

/// Everything needed to draw frames into one window.
///
/// Fields drop top to bottom: passes and slot resources go before the
/// orchestrator that owns the device.
pub struct Viewer {
    overlay: OverlayPass,
    quad: QuadPass,
    compute: ComputePass,
    init: InitPass,
    slots: SlotResources,
    orchestrator: FrameOrchestrator,
    resize_tracker: ResizeTracker,
    params: FrameParameters,
    camera: OrbitCamera,
}

impl Viewer {
    /// Sets up Vulkan for `window` and builds every pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage format is unknown or any GPU object
    /// cannot be created.
    pub fn new(window: &Window, config: &RendererConfig) -> Result<Self> {
        let storage_format = storage_format_from_name(&config.storage_format)
            .with_context(|| format!("unknown storage format '{}'", config.storage_format))?;

        let orchestrator =
            FrameOrchestrator::new(window, config).context("failed to create frame orchestrator")?;
        let device = orchestrator.device().clone();
        let extent = orchestrator.extent();

        let slots = SlotResources::new(
            device.clone(),
            orchestrator.frames_in_flight(),
            extent,
            storage_format,
        )
        .context("failed to create frame slot resources")?;

        let target = PassTarget {
            color_format: orchestrator.color_format(),
            extent,
        };
        let init = InitPass::new(device.clone(), target, slots.compute_layout(), config)?;
        let compute = ComputePass::new(device.clone(), target, slots.compute_layout(), config)?;
        let quad = QuadPass::new(device.clone(), target, slots.render_layout(), config)?;
        let overlay = OverlayPass::new(
            device.clone(),
            OverlayTarget {
                color_format: orchestrator.color_format(),
                image_count: orchestrator.image_count(),
                min_image_count: orchestrator.min_image_count(),
                queue_family: device.graphics_family(),
            },
            config,
        )?;

        let resize_tracker = ResizeTracker::new(orchestrator.surface_generation());

        info!("Viewer ready");

        Ok(Self {
            overlay,
            quad,
            compute,
            init,
            slots,
            orchestrator,
            resize_tracker,
            params: FrameParameters::default(),
            camera: OrbitCamera::default(),
        })
    }

    /// Records and presents one frame.
    ///
    /// A frame runs `[resize] -> [init] -> compute -> quad -> overlay ->
    /// present`. Frames the orchestrator skips (stale surface, minimized
    /// window) record nothing.
    ///
    /// # Errors
    ///
    /// Returns an error on any unrecoverable GPU failure.
    pub fn render(&mut self, window: &mut Window, time: f32, delta: f32) -> Result<()> {
        let Some(cmd) = self.orchestrator.begin_frame()? else {
            return Ok(());
        };

        // The surface may have been rebuilt by this or an earlier frame;
        // images and sets follow before anything is dispatched
        if self
            .resize_tracker
            .is_pending(self.orchestrator.surface_generation())
        {
            self.propagate_resize()?;
        }

        let frame_index = self.orchestrator.frame_index();
        let extent = self.orchestrator.extent();
        let slot = self.slots.slot(frame_index);

        let (forward, right, up) = self.camera.basis();
        self.params
            .set_camera(self.camera.position(), forward, right, up);
        self.params.set_resolution(slot.storage_image.extent());
        self.params.time = time;
        self.params.frame = self.params.frame.wrapping_add(1);
        slot.params.write(&self.params)?;

        ensure_current(slot.binding, slot.storage_image.generation())?;

        let compute_extent = slot.storage_image.extent();
        self.init.run(&PassContext {
            frame_index,
            command_buffer: &cmd,
            descriptor_set: slot.init_set.handle(),
            extent: compute_extent,
            fence: None,
        })?;
        self.compute.run(
            &PassContext {
                frame_index,
                command_buffer: &cmd,
                descriptor_set: slot.compute_set.handle(),
                extent: compute_extent,
                fence: None,
            },
            &self.params,
        )?;

        self.orchestrator.begin_render_pass(&cmd)?;
        self.quad.run(&PassContext {
            frame_index,
            command_buffer: &cmd,
            descriptor_set: slot.render_set.handle(),
            extent,
            fence: None,
        })?;
        self.overlay.new_frame(extent);
        self.queue_overlay_panels(delta);
        self.overlay.render(&cmd);
        self.orchestrator.end_render_pass(&cmd)?;

        let resized = window.was_resized();
        window.reset_resized_flag();
        self.orchestrator.end_frame(resized)?;
        Ok(())
    }

    /// Brings every slot up to the current swapchain size.
    fn propagate_resize(&mut self) -> Result<()> {
        let generation = self.orchestrator.surface_generation();
        let extent = self.orchestrator.extent();

        self.orchestrator.wait_idle()?;
        self.slots
            .resize(extent)
            .context("failed to resize frame slot images")?;
        self.overlay.set_image_counts(
            self.orchestrator.image_count(),
            self.orchestrator.min_image_count(),
        );
        self.init.rearm();
        self.resize_tracker.mark_propagated(generation);

        debug!(
            "Resize propagated: {}x{} (surface generation {})",
            extent.width, extent.height, generation
        );
        Ok(())
    }

    fn queue_overlay_panels(&mut self, delta: f32) {
        let variant_color = match self.params.variant() {
            SimulationVariant::Schwarzschild => [1.0, 0.55, 0.1, 0.9],
            SimulationVariant::Kerr => [0.2, 0.5, 1.0, 0.9],
        };
        let load = (delta / FRAME_BUDGET_SECS).clamp(0.0, 1.0);

        self.overlay.panel(Panel {
            x: 10.0,
            y: 10.0,
            width: 220.0,
            height: 56.0,
            color: [0.05, 0.05, 0.08, 0.7],
        });
        self.overlay.panel(Panel {
            x: 18.0,
            y: 18.0,
            width: 16.0,
            height: 16.0,
            color: variant_color,
        });
        self.overlay.panel(Panel {
            x: 18.0,
            y: 44.0,
            width: 204.0 * load,
            height: 12.0,
            color: [load, 1.0 - load, 0.1, 0.9],
        });
    }

    /// Forwards the window's new framebuffer size to the orchestrator.
    pub fn on_resize(&mut self, extent: vk::Extent2D) {
        self.orchestrator.set_window_extent(extent);
    }

    /// Switches between the Schwarzschild and Kerr kernels.
    pub fn toggle_variant(&mut self) {
        let variant = self.params.variant().toggled();
        self.params.set_variant(variant);
        self.init.rearm();
        info!("Simulation variant: {}", variant);
    }

    pub fn toggle_overlay(&mut self) {
        self.overlay.toggle();
    }

    /// Reseeds every slot's image on its next frame.
    pub fn restart(&mut self) {
        self.init.rearm();
    }

    /// Orbits the camera. Accumulated images are invalid afterwards.
    pub fn orbit(&mut self, delta_yaw: f32, delta_pitch: f32) {
        self.camera.orbit(delta_yaw, delta_pitch);
        self.init.rearm();
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        // Runs before any field is dropped
        if let Err(e) = self.orchestrator.wait_idle() {
            warn!("Failed to wait for device idle during viewer drop: {:?}", e);
        }
    }
}
