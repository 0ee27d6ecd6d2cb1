//! Vulkan presentation layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan presentation using
//! the `ash` crate. It handles:
//! - Instance bootstrap and physical device selection
//! - Queue family selection
//! - Surface format, present mode and extent selection
//! - Swapchain creation and recreation
//! - Synchronization primitives
//!
//! All device work goes through the [`device::SurfaceDevice`] trait, so the
//! swapchain and synchronization code runs unchanged against a real GPU
//! ([`device::VulkanDevice`]) or the scripted `mock::MockDevice`.

mod error;

pub mod device;
pub mod instance;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod physical_device;
pub mod swapchain;
pub mod sync;

pub use error::{QueueRole, RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
