//! Core utilities shared by the Horizon crates.
//!
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Runtime configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{MAX_FRAMES_IN_FLIGHT_LIMIT, RendererConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
