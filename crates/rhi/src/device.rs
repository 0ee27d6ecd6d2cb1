//! Device boundary for the presentation core.
//!
//! Everything the swapchain and frame synchronization code needs from the
//! GPU goes through the [`SurfaceDevice`] trait: surface capability
//! queries, swapchain and image view lifetime, semaphores and fences,
//! submission, acquisition and presentation.
//!
//! # Overview
//!
//! - [`VulkanDevice`] implements the trait over a real `ash::Device` bound
//!   to one surface.
//! - `mock::MockDevice` (feature `mock`) implements it with scripted
//!   results for tests.
//!
//! Methods return raw [`VkResult`]s. Classifying result codes into
//! [`RhiError`](crate::RhiError) variants is the caller's job, because the
//! same code means different things for different calls (a failed
//! capability query is a lost surface, a failed creation is an allocation
//! failure).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framechain_rhi::device::VulkanDevice;
//! use framechain_rhi::physical_device::select_physical_device;
//! use framechain_rhi::vk;
//!
//! # fn example(
//! #     instance: &ash::Instance,
//! #     surface: vk::SurfaceKHR,
//! #     surface_loader: &ash::khr::surface::Instance,
//! # ) -> framechain_rhi::RhiResult<()> {
//! let info = select_physical_device(instance, surface, surface_loader)?;
//! let device = Arc::new(VulkanDevice::new(
//!     instance,
//!     &info,
//!     surface,
//!     surface_loader.clone(),
//! )?);
//! # Ok(())
//! # }
//! ```

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, error, info};

use crate::error::{QueueRole, RhiError, RhiResult};
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};
use crate::swapchain::ImageSharing;

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Parameters for swapchain creation.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    /// Color format and color space of the images.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Presentation mode.
    pub present_mode: vk::PresentModeKHR,
    /// Image extent.
    pub extent: vk::Extent2D,
    /// Minimum number of images requested.
    pub image_count: u32,
    /// Image usage flags.
    pub image_usage: vk::ImageUsageFlags,
    /// Queue family sharing of the images.
    pub sharing: ImageSharing,
    /// Surface transform applied before presentation.
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Predecessor swapchain handed over for a seamless transition
    /// (null on first creation).
    pub old_swapchain: vk::SwapchainKHR,
}

/// One frame's graphics queue submission.
#[derive(Clone, Copy, Debug)]
pub struct FrameSubmit<'a> {
    /// Command buffers to execute.
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphore waited on before `wait_stage` executes.
    pub wait_semaphore: vk::Semaphore,
    /// Pipeline stage that waits on `wait_semaphore`.
    pub wait_stage: vk::PipelineStageFlags,
    /// Semaphore signaled when the command buffers complete.
    pub signal_semaphore: vk::Semaphore,
    /// Fence signaled when the command buffers complete.
    pub fence: vk::Fence,
}

/// The device operations the presentation core consumes.
///
/// Implementations are bound to a single surface and to the queue
/// families returned by [`queue_families`](Self::queue_families).
pub trait SurfaceDevice: Send + Sync {
    /// Queue families the device was created with.
    fn queue_families(&self) -> QueueFamilyIndices;

    /// Queries the surface capabilities (image counts, extents, transforms).
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;

    /// Queries the supported surface formats.
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;

    /// Queries the supported present modes.
    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;

    /// Creates a swapchain.
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;

    /// Destroys a swapchain. Its images are released with it.
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Returns the images owned by a swapchain, in presentation-engine order.
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;

    /// Creates a 2D, single-mip, single-layer color view of `image`.
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView>;

    /// Destroys an image view.
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Creates an unsignaled binary semaphore.
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;

    /// Destroys a semaphore.
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Creates a fence, optionally in the signaled state.
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;

    /// Destroys a fence.
    fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until every fence in `fences` is signaled or `timeout` (ns) expires.
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> VkResult<()>;

    /// Resets a fence to the unsignaled state.
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    /// Acquires the next presentable image, signaling `semaphore` when it is
    /// ready for writing. Returns `(image_index, suboptimal)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;

    /// Submits one frame's work to the graphics queue.
    fn submit_graphics(&self, submit: &FrameSubmit<'_>) -> VkResult<()>;

    /// Queues `image_index` for presentation after `wait_semaphore`.
    /// Returns true if the swapchain is suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool>;

    /// Blocks until the queue serving `role` is idle.
    fn queue_wait_idle(&self, role: QueueRole) -> VkResult<()>;
}

/// Vulkan logical device bound to a presentation surface.
///
/// Owns the logical device and the swapchain extension loader. The surface
/// itself is owned by the caller and must outlive this device.
///
/// # Thread Safety
///
/// Shared across owners through `Arc`. Vulkan requires external
/// synchronization of queue access; the presentation core only touches the
/// queues from its single rendering thread.
pub struct VulkanDevice {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// Surface extension loader.
    surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader.
    swapchain_loader: ash::khr::swapchain::Device,
    /// Surface presented to (not owned).
    surface: vk::SurfaceKHR,
    /// Graphics queue handle.
    graphics_queue: vk::Queue,
    /// Presentation queue handle.
    present_queue: vk::Queue,
    /// Queue family indices.
    queue_families: QueueFamilyIndices,
}

impl VulkanDevice {
    /// Creates the logical device for the selected physical device.
    ///
    /// One queue is requested from each distinct queue family, and the
    /// swapchain extension is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation fails.
    pub fn new(
        instance: &ash::Instance,
        physical_device_info: &PhysicalDeviceInfo,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let queue_families = physical_device_info.queue_families;
        let priorities = [1.0_f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique_families()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names);

        let device = unsafe {
            instance
                .create_device(physical_device_info.device, &create_info, None)
                .map_err(RhiError::allocation("logical device"))?
        };

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present_family, 0) };

        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);

        info!(
            "Logical device created on {} (graphics family {}, present family {})",
            physical_device_info.device_name(),
            queue_families.graphics_family,
            queue_families.present_family
        );

        Ok(Self {
            device,
            physical_device: physical_device_info.device,
            surface_loader,
            swapchain_loader,
            surface,
            graphics_queue,
            present_queue,
            queue_families,
        })
    }

    /// Returns the logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Waits for the whole device to become idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    fn queue(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics_queue,
            QueueRole::Present => self.present_queue,
        }
    }
}

impl SurfaceDevice for VulkanDevice {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(desc.image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(desc.image_usage)
            .image_sharing_mode(desc.sharing.mode())
            .queue_family_indices(desc.sharing.queue_family_indices())
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);

        unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> VkResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        unsafe { self.device.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(fences, true, timeout) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    fn submit_graphics(&self, submit: &FrameSubmit<'_>) -> VkResult<()> {
        let wait_semaphores = [submit.wait_semaphore];
        let wait_stages = [submit.wait_stage];
        let signal_semaphores = [submit.signal_semaphore];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(submit.command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], submit.fence)
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)
        }
    }

    fn queue_wait_idle(&self, role: QueueRole) -> VkResult<()> {
        debug!("Waiting for {} queue to go idle", role);
        unsafe { self.device.queue_wait_idle(self.queue(role)) }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            // Wait for all operations to complete before cleanup
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: VulkanDevice is Send+Sync because:
// - ash::Device and the extension loaders are Send+Sync
// - the remaining fields are plain handles (Copy)
// - queue access is externally synchronized by the single rendering thread
unsafe impl Send for VulkanDevice {}
unsafe impl Sync for VulkanDevice {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_vulkan_device_is_surface_device() {
        fn assert_surface_device<T: SurfaceDevice>() {}
        assert_surface_device::<VulkanDevice>();
    }
}
