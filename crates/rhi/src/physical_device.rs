//! Physical device (GPU) and queue family selection.
//!
//! # Overview
//!
//! Queue family selection is a pure function over the reported
//! [`vk::QueueFamilyProperties`] plus an injectable presentation-support
//! test, so it can be exercised without a GPU:
//!
//! ```
//! use framechain_rhi::physical_device::select_queue_families;
//! use framechain_rhi::vk;
//!
//! let families = [vk::QueueFamilyProperties {
//!     queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
//!     queue_count: 1,
//!     ..Default::default()
//! }];
//!
//! let indices = select_queue_families(&families, |_| Ok(true)).unwrap();
//! assert_eq!(indices.graphics_family, 0);
//! assert!(indices.is_shared());
//! ```
//!
//! [`select_physical_device`] runs the same selection against every GPU the
//! instance reports and picks the most suitable one.

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{QueueRole, RhiError, RhiResult};

/// Queue family indices used by the swapchain.
///
/// Both roles are always resolved; the two indices may be equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// Index of the queue family that supports graphics operations.
    pub graphics_family: u32,
    /// Index of the queue family that supports presentation to the surface.
    pub present_family: u32,
}

impl QueueFamilyIndices {
    /// Returns true when graphics and presentation use the same family.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.graphics_family == self.present_family
    }

    /// Returns the distinct family indices, graphics first.
    ///
    /// Used when creating the logical device so a shared family is only
    /// requested once.
    pub fn unique_families(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics_family]
        } else {
            vec![self.graphics_family, self.present_family]
        }
    }
}

/// Selects graphics and presentation queue families.
///
/// Families are scanned in index order and families with no queues are
/// skipped. The first family advertising graphics becomes the graphics
/// family; the first family for which `supports_present` answers true
/// becomes the present family. The scan stops as soon as both are known.
///
/// # Errors
///
/// - [`RhiError::SurfaceLost`] if the presentation-support query fails
/// - [`RhiError::NoSuitableQueue`] if either role has no candidate
pub fn select_queue_families<F>(
    properties: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> RhiResult<QueueFamilyIndices>
where
    F: FnMut(u32) -> VkResult<bool>,
{
    let mut graphics_family = None;
    let mut present_family = None;

    for (index, family) in properties.iter().enumerate() {
        let index = index as u32;

        if family.queue_count == 0 {
            continue;
        }

        if graphics_family.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics_family = Some(index);
        }

        if present_family.is_none() && supports_present(index).map_err(RhiError::SurfaceLost)? {
            present_family = Some(index);
        }

        if graphics_family.is_some() && present_family.is_some() {
            break;
        }
    }

    let graphics_family = graphics_family.ok_or(RhiError::NoSuitableQueue(QueueRole::Graphics))?;
    let present_family = present_family.ok_or(RhiError::NoSuitableQueue(QueueRole::Present))?;

    debug!(
        "Selected queue families: graphics {}, present {}",
        graphics_family, present_family
    );

    Ok(QueueFamilyIndices {
        graphics_family,
        present_family,
    })
}

/// Information about the selected physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// Queue families chosen for this device and surface.
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.properties.device_type)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn device_type_name(device_type: vk::PhysicalDeviceType) -> &'static str {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
        vk::PhysicalDeviceType::CPU => "CPU",
        _ => "Other",
    }
}

/// Selects the most suitable physical device for presenting to `surface`.
///
/// A device qualifies when it has graphics and present queue families,
/// supports `VK_KHR_swapchain`, and reports at least one surface format
/// and present mode. Among qualifying devices the one with the highest
/// [`rate_device_type`] score wins; ties keep enumeration order.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no device qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };

    if physical_devices.is_empty() {
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} physical device(s)", physical_devices.len());

    let mut best: Option<(u32, PhysicalDeviceInfo)> = None;

    for physical_device in physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        let info = match check_device_suitability(
            instance,
            physical_device,
            properties,
            surface,
            surface_loader,
        ) {
            Ok(info) => info,
            Err(reason) => {
                warn!(
                    "Skipping {} ({}): {}",
                    properties
                        .device_name_as_c_str()
                        .unwrap_or(c"Unknown Device")
                        .to_string_lossy(),
                    device_type_name(properties.device_type),
                    reason
                );
                continue;
            }
        };

        let score = rate_device_type(info.properties.device_type);
        debug!("{:?} scored {}", info, score);

        if best.as_ref().is_none_or(|(best_score, _)| score > *best_score) {
            best = Some((score, info));
        }
    }

    let (_, info) = best.ok_or(RhiError::NoSuitableGpu)?;
    info!("Selected GPU: {} ({})", info.device_name(), info.device_type_name());
    Ok(info)
}

/// Checks one device; returns the reason it is unsuitable on failure.
fn check_device_suitability(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, String> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let queue_families = select_queue_families(&families, |index| unsafe {
        surface_loader.get_physical_device_surface_support(physical_device, index, surface)
    })
    .map_err(|e| e.to_string())?;

    let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .map_err(|e| e.to_string())?;
    let has_swapchain = extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .is_ok_and(|name| name == ash::khr::swapchain::NAME)
    });
    if !has_swapchain {
        return Err(format!("missing {:?}", ash::khr::swapchain::NAME));
    }

    let formats = unsafe {
        surface_loader.get_physical_device_surface_formats(physical_device, surface)
    }
    .map_err(|e| e.to_string())?;
    let present_modes = unsafe {
        surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
    }
    .map_err(|e| e.to_string())?;
    if formats.is_empty() || present_modes.is_empty() {
        return Err("no surface formats or present modes".to_string());
    }

    Ok(PhysicalDeviceInfo {
        device: physical_device,
        properties,
        queue_families,
    })
}

/// Rates a device type; discrete GPUs are preferred.
pub fn rate_device_type(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    #[test]
    fn test_shared_family() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4)];
        let indices = select_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices {
                graphics_family: 0,
                present_family: 0
            }
        );
        assert!(indices.is_shared());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn test_separate_families() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::COMPUTE, 1),
        ];
        // Only the compute family can present
        let indices = select_queue_families(&families, |i| Ok(i == 2)).unwrap();
        assert_eq!(indices.graphics_family, 1);
        assert_eq!(indices.present_family, 2);
        assert!(!indices.is_shared());
        assert_eq!(indices.unique_families(), vec![1, 2]);
    }

    #[test]
    fn test_first_candidate_wins() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let indices = select_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics_family, 0);
        assert_eq!(indices.present_family, 0);
    }

    #[test]
    fn test_stops_scanning_once_resolved() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        let mut queried = Vec::new();
        let indices = select_queue_families(&families, |i| {
            queried.push(i);
            Ok(i == 1)
        })
        .unwrap();
        assert_eq!(indices.graphics_family, 0);
        assert_eq!(indices.present_family, 1);
        assert_eq!(queried, vec![0, 1]);
    }

    #[test]
    fn test_empty_families_are_skipped() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 2),
        ];
        let mut queried = Vec::new();
        let indices = select_queue_families(&families, |i| {
            queried.push(i);
            Ok(true)
        })
        .unwrap();
        assert_eq!(indices.graphics_family, 1);
        assert_eq!(indices.present_family, 1);
        assert_eq!(queried, vec![1]);
    }

    #[test]
    fn test_no_graphics_family() {
        let families = [family(vk::QueueFlags::COMPUTE, 1)];
        let err = select_queue_families(&families, |_| Ok(true)).unwrap_err();
        assert!(matches!(err, RhiError::NoSuitableQueue(QueueRole::Graphics)));
    }

    #[test]
    fn test_no_present_family() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let err = select_queue_families(&families, |_| Ok(false)).unwrap_err();
        assert!(matches!(err, RhiError::NoSuitableQueue(QueueRole::Present)));
    }

    #[test]
    fn test_support_query_failure_is_surface_loss() {
        let families = [family(vk::QueueFlags::GRAPHICS, 1)];
        let err = select_queue_families(&families, |_| Err(vk::Result::ERROR_SURFACE_LOST_KHR))
            .unwrap_err();
        assert!(matches!(
            err,
            RhiError::SurfaceLost(vk::Result::ERROR_SURFACE_LOST_KHR)
        ));
    }

    #[test]
    fn test_device_type_rating_prefers_discrete() {
        assert!(
            rate_device_type(vk::PhysicalDeviceType::DISCRETE_GPU)
                > rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            rate_device_type(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > rate_device_type(vk::PhysicalDeviceType::CPU)
        );
    }
}
