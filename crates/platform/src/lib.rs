//! Platform layer: the window and the Vulkan surface bound to it.
//!
//! This crate provides:
//! - Window management via winit
//! - Vulkan surface creation and the instance extensions it needs

mod window;

pub use window::{Surface, Window, required_instance_extensions};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
