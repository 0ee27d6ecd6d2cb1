//! Window management using winit.
//!
//! This module provides window creation and Vulkan surface creation.

use std::ffi::{CStr, c_char};

use ash::vk;
use framechain_core::config::WindowConfig;
use framechain_core::{Error, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

/// RAII wrapper for a Vulkan surface.
///
/// Owns the `vk::SurfaceKHR` and destroys it on drop. The instance must
/// outlive the surface, and every swapchain and device bound to the
/// surface must be dropped first.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Returns the raw Vulkan surface handle.
    ///
    /// Valid only while this `Surface` exists.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Returns the surface extension loader.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created by ash_window::create_surface from
        // the same instance as the loader and is destroyed only here.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// A resizable winit window used as a presentation target.
pub struct Window {
    window: WinitWindow,
}

impl Window {
    /// Creates a window from configuration.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", config.width, config.height);

        Ok(Self { window })
    }

    /// Returns the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Returns the current drawable size as a Vulkan extent.
    ///
    /// Zero in either dimension while the window is minimised.
    pub fn extent(&self) -> vk::Extent2D {
        to_extent(self.window.inner_size())
    }

    /// Requests a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// # Errors
    ///
    /// - [`Error::Window`] if the window or display handle is unavailable
    /// - [`Error::Vulkan`] if surface creation fails
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: the handles come from a live winit window and the
        // instance was created with the extensions this platform requires.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

/// Returns the instance extensions needed to create a surface for `window`.
///
/// The pointers reference static NUL-terminated strings.
pub fn required_instance_extensions(window: &Window) -> Result<Vec<*const c_char>> {
    let display_handle = window
        .window
        .display_handle()
        .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

    let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
        .map_err(|e| Error::Vulkan(format!("Failed to enumerate required extensions: {}", e)))?;

    tracing::debug!(
        "Required Vulkan extensions for surface: {:?}",
        extensions
            .iter()
            // SAFETY: ash_window returns pointers to static NUL-terminated names.
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect::<Vec<_>>()
    );

    Ok(extensions.to_vec())
}

fn to_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}
