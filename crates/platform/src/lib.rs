//! Platform layer for Horizon.
//!
//! - Window management via winit, with resize and minimized tracking
//! - Vulkan surface creation
//! - Keyboard input

mod input;
mod window;

pub use input::{InputState, KeyCode};
pub use window::{Surface, Window};

// Re-export winit types that users might need
pub use winit::event::{ElementState, KeyEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::keyboard::PhysicalKey;
