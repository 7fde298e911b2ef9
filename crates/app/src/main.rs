//! Horizon - Black hole raymarcher
//!
//! Opens a window, builds the frame orchestrator and its passes, and drives
//! one frame per redraw.
//!
//! Controls: arrows orbit the camera, Tab switches between Schwarzschild
//! and Kerr, F1 toggles the overlay, R restarts accumulation, Escape quits.

mod camera;
mod slots;
mod viewer;

use anyhow::Result;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use horizon_core::{RendererConfig, Timer};
use horizon_platform::{InputState, KeyCode, PhysicalKey, Window};

use viewer::Viewer;

/// Camera orbit speed in radians per second.
const ORBIT_SPEED: f32 = 1.2;

struct App {
    config: RendererConfig,
    // Dropped before the window its surface belongs to
    viewer: Option<Viewer>,
    window: Option<Window>,
    input: InputState,
    timer: Timer,
    last_delta: f32,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            viewer: None,
            window: None,
            input: InputState::new(),
            timer: Timer::new(),
            last_delta: 0.0,
        }
    }

    /// Applies key presses since the last call.
    fn handle_controls(&mut self, event_loop: &ActiveEventLoop) {
        if self.input.is_key_just_pressed(KeyCode::Escape) {
            info!("Escape pressed, shutting down");
            event_loop.exit();
            return;
        }

        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };

        if self.input.is_key_just_pressed(KeyCode::Tab) {
            viewer.toggle_variant();
        }
        if self.input.is_key_just_pressed(KeyCode::F1) {
            viewer.toggle_overlay();
        }
        if self.input.is_key_just_pressed(KeyCode::KeyR) {
            info!("Restarting accumulation");
            viewer.restart();
        }

        let (yaw, pitch) = orbit_direction(&self.input);
        if yaw != 0.0 || pitch != 0.0 {
            let step = ORBIT_SPEED * self.last_delta;
            viewer.orbit(yaw * step, pitch * step);
        }
    }
}

/// Orbit direction from the arrow keys, each axis in `-1..=1`.
fn orbit_direction(input: &InputState) -> (f32, f32) {
    let axis = |negative: KeyCode, positive: KeyCode| {
        input.is_key_pressed(positive) as i8 as f32 - input.is_key_pressed(negative) as i8 as f32
    };
    (
        axis(KeyCode::ArrowLeft, KeyCode::ArrowRight),
        axis(KeyCode::ArrowDown, KeyCode::ArrowUp),
    )
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(
            event_loop,
            self.config.window_width,
            self.config.window_height,
            &self.config.window_title,
        ) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match Viewer::new(&window, &self.config) {
            Ok(viewer) => {
                info!("Initialization complete, entering main loop");
                self.viewer = Some(viewer);
                self.window = Some(window);
                self.timer.reset();
            }
            Err(e) => {
                error!("Failed to create viewer: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                    if let Some(ref mut viewer) = self.viewer {
                        viewer.on_resize(window.extent());
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                self.last_delta = self.timer.delta_secs();
                let time = self.timer.elapsed_secs();

                if let (Some(viewer), Some(window)) = (self.viewer.as_mut(), self.window.as_mut())
                    && let Err(e) = viewer.render(window, time, self.last_delta)
                {
                    error!("Render error: {:#}", e);
                    event_loop.exit();
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
            }
            WindowEvent::Focused(false) => self.input.clear(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        self.handle_controls(event_loop);
        self.input.begin_frame();
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        info!(
            "Rendered {} frames in {:.1}s",
            self.timer.frame_count(),
            self.timer.elapsed_secs()
        );
        self.viewer = None;
    }
}

fn main() -> Result<()> {
    horizon_core::init_logging();
    info!("Starting Horizon");

    let config = RendererConfig::from_env()?;

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orbit_direction_idle() {
        let input = InputState::new();
        assert_eq!(orbit_direction(&input), (0.0, 0.0));
    }

    #[test]
    fn test_orbit_direction_keys() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::ArrowRight);
        input.on_key_pressed(KeyCode::ArrowDown);
        assert_eq!(orbit_direction(&input), (1.0, -1.0));

        // Opposite keys cancel
        input.on_key_pressed(KeyCode::ArrowLeft);
        assert_eq!(orbit_direction(&input), (0.0, -1.0));
    }
}
