//! Vulkan instance bootstrap.
//!
//! Loads the Vulkan library, creates the instance with the window-system
//! extensions the platform layer asks for, and optionally enables the
//! Khronos validation layer with a debug messenger that forwards messages
//! to `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use framechain_rhi::instance::Instance;
//!
//! # fn example(window_extensions: &[*const std::ffi::c_char]) -> framechain_rhi::RhiResult<()> {
//! let instance = Instance::new(c"demo", window_extensions, cfg!(debug_assertions))?;
//! let vk_instance = instance.handle();
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance with optional validation.
///
/// Destroys the debug messenger and then the instance on drop. Everything
/// created from the instance (surface, device) must be dropped first.
pub struct Instance {
    /// Vulkan entry point loader
    entry: Entry,
    /// Vulkan instance handle
    instance: ash::Instance,
    /// Debug utils extension loader (only present when validation is enabled)
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    /// Debug messenger handle (only present when validation is enabled)
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `app_name` - Application name reported to the driver
    /// * `required_extensions` - Window-system extensions needed to create a
    ///   surface (see `framechain_platform::required_instance_extensions`)
    /// * `enable_validation` - If true, enables validation layers and debug messenger
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Vulkan library cannot be loaded
    /// - Required extensions are not available
    /// - Instance creation fails
    /// - Debug messenger setup fails (when validation is enabled)
    pub fn new(
        app_name: &CStr,
        required_extensions: &[*const c_char],
        enable_validation: bool,
    ) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"framechain")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions = Self::required_extensions(required_extensions);
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        // Set up layers
        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        // Create instance
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(RhiError::from)?
        };

        info!("Vulkan instance created ({} extensions)", extensions.len());

        // Set up debug messenger if validation is enabled
        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            info!("Debug messenger created successfully");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    /// Returns the Vulkan instance handle.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the Vulkan entry point loader.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Merges the window-system extensions with `VK_KHR_surface`,
    /// skipping duplicates.
    fn required_extensions(window_extensions: &[*const c_char]) -> Vec<*const c_char> {
        let surface = ash::khr::surface::NAME;
        let mut extensions = vec![surface.as_ptr()];

        for &name in window_extensions {
            // SAFETY: extension names come from ash constants or
            // ash_window, both NUL-terminated statics.
            let already_listed = extensions
                .iter()
                .any(|&listed| unsafe { CStr::from_ptr(listed) == CStr::from_ptr(name) });
            if !already_listed {
                extensions.push(name);
            }
        }

        extensions
    }

    /// Checks if the Khronos validation layer is available.
    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let validation_layer_name = VALIDATION_LAYER_NAME.to_bytes_with_nul();

        let found = available_layers.iter().any(|layer| {
            let layer_name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            layer_name.to_bytes_with_nul() == validation_layer_name
        });

        if !found {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        Ok(found)
    }

    /// Sets up the debug messenger for validation layer callbacks.
    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(RhiError::from)?
        };

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            // Destroy debug messenger before instance
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Debug callback function for validation layer messages.
///
/// This function is called by the Vulkan validation layer when it detects
/// issues with API usage. Messages are logged using the tracing crate.
///
/// # Safety
///
/// This function is called from the Vulkan driver and must follow the
/// Vulkan rules for debug callbacks.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!("[Vulkan {}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            info!("[Vulkan {}] {}", type_str, message);
        }
        _ => {
            debug!("[Vulkan {}] {}", type_str, message);
        }
    }

    // Returning VK_FALSE indicates the call should not be aborted
    vk::FALSE
}
