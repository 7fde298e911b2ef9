//! Window management using winit.
//!
//! The [`Window`] tracks its framebuffer size and a sticky resize flag the
//! frame loop consumes after presenting. A zero-sized framebuffer means the
//! window is minimized and nothing should be acquired or dispatched.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use horizon_core::{Error, Result};

/// RAII wrapper for a Vulkan surface.
///
/// The caller must ensure that the Vulkan instance outlives this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Get the raw Vulkan surface handle.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Surface loader for capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: created by ash_window::create_surface from the same instance
        // the loader was built from; destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// Framebuffer size bookkeeping, separate from the winit handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FramebufferState {
    width: u32,
    height: u32,
    resized: bool,
}

impl FramebufferState {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            resized: false,
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != (self.width, self.height) {
            self.resized = true;
        }
        self.width = width;
        self.height = height;
    }

    fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A winit window plus the framebuffer state the renderer needs.
pub struct Window {
    window: Arc<WinitWindow>,
    framebuffer: FramebufferState,
}

impl Window {
    /// Create a new resizable window with the given dimensions and title.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Window`] if winit cannot create the window.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        // The platform may not honor the requested size exactly.
        let size = window.inner_size();
        tracing::info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            framebuffer: FramebufferState::new(size.width, size.height),
        })
    }

    /// Current framebuffer size in pixels.
    pub fn extent(&self) -> vk::Extent2D {
        self.framebuffer.extent()
    }

    pub fn width(&self) -> u32 {
        self.framebuffer.width
    }

    pub fn height(&self) -> u32 {
        self.framebuffer.height
    }

    /// True while the framebuffer has a zero dimension.
    pub fn is_minimized(&self) -> bool {
        self.framebuffer.is_minimized()
    }

    /// Records a new framebuffer size, raising the resize flag if it changed.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.framebuffer.resize(width, height);
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    /// Whether the size changed since the flag was last reset.
    pub fn was_resized(&self) -> bool {
        self.framebuffer.resized
    }

    pub fn reset_resized_flag(&mut self) {
        self.framebuffer.resized = false;
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Create a Vulkan surface for this window.
    ///
    /// # Arguments
    /// * `entry` - The Vulkan entry point
    /// * `instance` - The Vulkan instance (must outlive the returned `Surface`)
    ///
    /// # Errors
    /// Returns an error if surface creation fails due to:
    /// - Invalid window or display handles
    /// - Vulkan surface creation failure
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: handles come from a live winit window; the surface is
        // destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Surface(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_sets_flag_only_on_change() {
        let mut fb = FramebufferState::new(800, 600);
        fb.resize(800, 600);
        assert!(!fb.resized);
        fb.resize(1024, 768);
        assert!(fb.resized);
        assert_eq!(
            fb.extent(),
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
    }

    #[test]
    fn test_minimized() {
        let mut fb = FramebufferState::new(800, 600);
        assert!(!fb.is_minimized());
        fb.resize(0, 600);
        assert!(fb.is_minimized());
        fb.resize(800, 0);
        assert!(fb.is_minimized());
        fb.resize(1, 1);
        assert!(!fb.is_minimized());
    }
}
