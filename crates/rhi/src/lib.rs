//! Vulkan layer for the frame loop, built on `ash`.
//!
//! Owns every raw handle the renderer touches: instance and device,
//! the presentation chain with its per-image synchronization, frame slot
//! sync, command recording, mapped buffers, resizable storage images,
//! descriptor layouts/pools/writers, and compute and graphics pipelines.
//! Each wrapper destroys its handle on drop.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod sampler;
pub mod shader;
pub mod storage_image;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
