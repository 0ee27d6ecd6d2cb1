//! Core utilities shared by the framechain crates.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Presentation configuration loaded from TOML
//! - Frame-rate counting for the demo loop

pub mod config;
mod error;
mod logging;
mod stats;

pub use config::{PresentConfig, WindowConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use stats::FrameCounter;
