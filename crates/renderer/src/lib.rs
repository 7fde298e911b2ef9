//! Frame orchestration for Horizon.
//!
//! This crate sequences the per-frame GPU work:
//! - [`orchestrator`]: acquire, record, submit and present over N slots
//! - [`passes`]: init, compute, full-screen quad and overlay
//! - [`frame_params`]: the uniform block and per-slot containers
//! - [`resize`]: ordering of size-dependent rebuilds
//! - [`dispatch`]: compute grid sizing

pub mod dispatch;
pub mod frame_params;
pub mod orchestrator;
pub mod passes;
pub mod resize;

pub use dispatch::{WORKGROUP_SIZE, dispatch_group_count};
pub use frame_params::{FrameParameters, PassContext, PerFrame, SimulationVariant};
pub use orchestrator::FrameOrchestrator;
pub use resize::{ImageBinding, ResizeTracker, SizedSlot, ensure_current, resize_slot};
