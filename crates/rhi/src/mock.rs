//! Scripted [`SurfaceDevice`] for tests (no GPU required).
//!
//! [`MockDevice`] hands out fake handles, tracks which objects are alive,
//! records every call in order, and returns scripted results from
//! acquisition and presentation. GPU work completes instantly: a submit
//! signals its fence before returning, unless that is switched off.
//!
//! Misuse that a validation layer would catch (using a destroyed
//! swapchain, submitting with a signaled fence, presenting an index out of
//! range) fails with `ERROR_VALIDATION_FAILED_EXT`, and waiting on an
//! unsignaled fence fails with `TIMEOUT` instead of blocking.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};

use crate::device::{FrameSubmit, SurfaceDevice, SwapchainDesc};
use crate::error::QueueRole;
use crate::physical_device::QueueFamilyIndices;

/// A recorded device call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    /// `create_swapchain`, with the predecessor it was handed.
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        old_swapchain: vk::SwapchainKHR,
    },
    DestroySwapchain(vk::SwapchainKHR),
    /// `create_image_view` for a swapchain image.
    CreateImageView {
        image: vk::Image,
        view: vk::ImageView,
    },
    DestroyImageView(vk::ImageView),
    /// Host wait on every listed fence.
    WaitForFences(Vec<vk::Fence>),
    ResetFence(vk::Fence),
    /// Acquisition signaling `semaphore`.
    AcquireNextImage {
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    },
    /// Graphics queue submission.
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
        fence: vk::Fence,
    },
    /// Presentation of `image_index` after `wait_semaphore`.
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    },
    /// `queue_wait_idle` on the queue serving the role.
    QueueWaitIdle(QueueRole),
}

struct MockSwapchain {
    images: Vec<vk::Image>,
    next_image: u32,
}

struct MockState {
    next_handle: u64,
    queue_families: QueueFamilyIndices,
    capabilities: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,

    surface_failure: Option<vk::Result>,
    swapchain_failure: Option<vk::Result>,
    sync_failure: Option<vk::Result>,
    submit_failure: Option<vk::Result>,
    /// Successful view creations left before the next one fails.
    view_failure_countdown: Option<usize>,
    complete_submissions: bool,

    acquire_script: VecDeque<VkResult<(u32, bool)>>,
    present_script: VecDeque<VkResult<bool>>,

    swapchains: HashMap<vk::SwapchainKHR, MockSwapchain>,
    views: HashMap<vk::ImageView, vk::Image>,
    semaphores: HashSet<vk::Semaphore>,
    fences: HashMap<vk::Fence, bool>,

    calls: Vec<MockCall>,
    swapchain_descs: Vec<SwapchainDesc>,
}

impl MockState {
    fn allocate<H: Handle>(&mut self) -> H {
        let raw = self.next_handle;
        self.next_handle += 1;
        H::from_raw(raw)
    }
}

/// Scripted device for unit and integration tests.
pub struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    /// Creates a device with one shared queue family, an authoritative
    /// 800x600 surface, room for 2 to 8 images, both the canonical and an
    /// sRGB format, and FIFO plus MAILBOX presentation.
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_DST,
        };

        Self {
            state: Mutex::new(MockState {
                next_handle: 1,
                queue_families: QueueFamilyIndices {
                    graphics_family: 0,
                    present_family: 0,
                },
                capabilities,
                formats: vec![
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_SRGB,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    vk::SurfaceFormatKHR {
                        format: vk::Format::B8G8R8A8_UNORM,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                surface_failure: None,
                swapchain_failure: None,
                sync_failure: None,
                submit_failure: None,
                view_failure_countdown: None,
                complete_submissions: true,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                swapchains: HashMap::new(),
                views: HashMap::new(),
                semaphores: HashSet::new(),
                fences: HashMap::new(),
                calls: Vec::new(),
                swapchain_descs: Vec::new(),
            }),
        }
    }

    /// Sets the queue families the device reports.
    pub fn with_queue_families(self, indices: QueueFamilyIndices) -> Self {
        self.lock().queue_families = indices;
        self
    }

    /// Replaces the surface capabilities.
    pub fn with_capabilities(self, capabilities: vk::SurfaceCapabilitiesKHR) -> Self {
        self.set_capabilities(capabilities);
        self
    }

    /// Replaces the supported surface formats.
    pub fn with_formats(self, formats: Vec<vk::SurfaceFormatKHR>) -> Self {
        self.lock().formats = formats;
        self
    }

    /// Replaces the supported present modes.
    pub fn with_present_modes(self, present_modes: Vec<vk::PresentModeKHR>) -> Self {
        self.lock().present_modes = present_modes;
        self
    }

    /// Replaces the surface capabilities.
    pub fn set_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        self.lock().capabilities = capabilities;
    }

    /// Changes the extent the surface reports, as a window resize would.
    pub fn set_current_extent(&self, extent: vk::Extent2D) {
        self.lock().capabilities.current_extent = extent;
    }

    /// Makes every surface query fail with `result` (or succeed on `None`).
    pub fn fail_surface_queries(&self, result: Option<vk::Result>) {
        self.lock().surface_failure = result;
    }

    /// Makes swapchain creation fail with `result` (or succeed on `None`).
    pub fn fail_swapchain_creation(&self, result: Option<vk::Result>) {
        self.lock().swapchain_failure = result;
    }

    /// Makes semaphore and fence creation fail with `result`.
    pub fn fail_sync_creation(&self, result: Option<vk::Result>) {
        self.lock().sync_failure = result;
    }

    /// Makes the next submit fail with `result`.
    pub fn fail_next_submit(&self, result: vk::Result) {
        self.lock().submit_failure = Some(result);
    }

    /// Lets `successes` more image views be created, then fails the next
    /// one with `ERROR_OUT_OF_DEVICE_MEMORY`. `None` disarms.
    pub fn fail_image_view_creation_after(&self, successes: Option<usize>) {
        self.lock().view_failure_countdown = successes;
    }

    /// Whether submits signal their fence immediately (the default).
    pub fn set_submissions_complete(&self, complete: bool) {
        self.lock().complete_submissions = complete;
    }

    /// Queues the result of a future acquire. Unscripted acquires cycle
    /// through the swapchain's images.
    pub fn push_acquire_result(&self, result: VkResult<(u32, bool)>) {
        self.lock().acquire_script.push_back(result);
    }

    /// Queues the result of a future present. Unscripted presents succeed.
    pub fn push_present_result(&self, result: VkResult<bool>) {
        self.lock().present_script.push_back(result);
    }

    /// Signals a fence, as completed GPU work would.
    pub fn signal_fence(&self, fence: vk::Fence) {
        if let Some(signaled) = self.lock().fences.get_mut(&fence) {
            *signaled = true;
        }
    }

    /// Returns whether a live fence is signaled.
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.lock().fences.get(&fence).copied().unwrap_or(false)
    }

    /// Returns all recorded calls in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Returns the description of every swapchain created, in order.
    pub fn swapchain_descs(&self) -> Vec<SwapchainDesc> {
        self.lock().swapchain_descs.clone()
    }

    /// Returns the images of a live swapchain.
    pub fn images_of(&self, swapchain: vk::SwapchainKHR) -> Vec<vk::Image> {
        self.lock()
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .unwrap_or_default()
    }

    /// Returns the image a live view was created for.
    pub fn view_target(&self, view: vk::ImageView) -> Option<vk::Image> {
        self.lock().views.get(&view).copied()
    }

    /// Number of swapchains created and not yet destroyed.
    pub fn live_swapchains(&self) -> usize {
        self.lock().swapchains.len()
    }

    /// Number of live image views.
    pub fn live_image_views(&self) -> usize {
        self.lock().views.len()
    }

    /// Number of live semaphores.
    pub fn live_semaphores(&self) -> usize {
        self.lock().semaphores.len()
    }

    /// Number of live fences.
    pub fn live_fences(&self) -> usize {
        self.lock().fences.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceDevice for MockDevice {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.lock().queue_families
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        let state = self.lock();
        match state.surface_failure {
            Some(result) => Err(result),
            None => Ok(state.capabilities),
        }
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        let state = self.lock();
        match state.surface_failure {
            Some(result) => Err(result),
            None => Ok(state.formats.clone()),
        }
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        let state = self.lock();
        match state.surface_failure {
            Some(result) => Err(result),
            None => Ok(state.present_modes.clone()),
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.lock();
        if let Some(result) = state.swapchain_failure {
            return Err(result);
        }
        if desc.old_swapchain != vk::SwapchainKHR::null()
            && !state.swapchains.contains_key(&desc.old_swapchain)
        {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }

        let swapchain: vk::SwapchainKHR = state.allocate();
        let images = (0..desc.image_count)
            .map(|_| state.allocate())
            .collect::<Vec<vk::Image>>();

        state.swapchains.insert(
            swapchain,
            MockSwapchain {
                images,
                next_image: 0,
            },
        );
        state.swapchain_descs.push(*desc);
        state.calls.push(MockCall::CreateSwapchain {
            swapchain,
            old_swapchain: desc.old_swapchain,
        });

        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.lock();
        state.swapchains.remove(&swapchain);
        state.calls.push(MockCall::DestroySwapchain(swapchain));
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.lock()
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or(vk::Result::ERROR_VALIDATION_FAILED_EXT)
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format) -> VkResult<vk::ImageView> {
        let mut state = self.lock();
        match state.view_failure_countdown {
            Some(0) => {
                state.view_failure_countdown = None;
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            Some(n) => state.view_failure_countdown = Some(n - 1),
            None => {}
        }

        let view: vk::ImageView = state.allocate();
        state.views.insert(view, image);
        state.calls.push(MockCall::CreateImageView { image, view });
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.lock();
        state.views.remove(&view);
        state.calls.push(MockCall::DestroyImageView(view));
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.lock();
        if let Some(result) = state.sync_failure {
            return Err(result);
        }
        let semaphore: vk::Semaphore = state.allocate();
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.lock().semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.lock();
        if let Some(result) = state.sync_failure {
            return Err(result);
        }
        let fence: vk::Fence = state.allocate();
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.lock().fences.remove(&fence);
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout: u64) -> VkResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::WaitForFences(fences.to_vec()));

        for fence in fences {
            match state.fences.get(fence) {
                Some(true) => {}
                Some(false) => return Err(vk::Result::TIMEOUT),
                None => return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT),
            }
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::ResetFence(fence));
        match state.fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(vk::Result::ERROR_VALIDATION_FAILED_EXT),
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.lock();
        state
            .calls
            .push(MockCall::AcquireNextImage { swapchain, semaphore });

        if !state.semaphores.contains(&semaphore) {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        let scripted = state.acquire_script.pop_front();
        let Some(chain) = state.swapchains.get_mut(&swapchain) else {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        };

        match scripted {
            Some(result) => result,
            None => {
                let index = chain.next_image;
                chain.next_image = (index + 1) % chain.images.len().max(1) as u32;
                Ok((index, false))
            }
        }
    }

    fn submit_graphics(&self, submit: &FrameSubmit<'_>) -> VkResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::Submit {
            command_buffers: submit.command_buffers.to_vec(),
            wait_semaphore: submit.wait_semaphore,
            signal_semaphore: submit.signal_semaphore,
            fence: submit.fence,
        });

        if let Some(result) = state.submit_failure.take() {
            return Err(result);
        }

        let complete = state.complete_submissions;
        match state.fences.get_mut(&submit.fence) {
            // A pending submission may not reuse a signaled fence
            Some(true) | None => Err(vk::Result::ERROR_VALIDATION_FAILED_EXT),
            Some(signaled) => {
                *signaled = complete;
                Ok(())
            }
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.lock();
        state.calls.push(MockCall::Present {
            swapchain,
            image_index,
            wait_semaphore,
        });

        let scripted = state.present_script.pop_front();
        let Some(chain) = state.swapchains.get(&swapchain) else {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        };
        if scripted.is_none() && image_index as usize >= chain.images.len() {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }

        scripted.unwrap_or(Ok(false))
    }

    fn queue_wait_idle(&self, role: QueueRole) -> VkResult<()> {
        self.lock().calls.push(MockCall::QueueWaitIdle(role));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscripted_acquire_cycles_images() {
        let device = MockDevice::new();
        let desc = SwapchainDesc {
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            image_count: 3,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            sharing: crate::swapchain::ImageSharing::Exclusive,
            pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            old_swapchain: vk::SwapchainKHR::null(),
        };
        let swapchain = device.create_swapchain(&desc).unwrap();
        let semaphore = device.create_semaphore().unwrap();

        let indices: Vec<u32> = (0..4)
            .map(|_| device.acquire_next_image(swapchain, 0, semaphore).unwrap().0)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0]);

        device.push_acquire_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert_eq!(
            device.acquire_next_image(swapchain, 0, semaphore),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
    }

    #[test]
    fn test_submit_signals_fence() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();
        let submit = FrameSubmit {
            command_buffers: &[],
            wait_semaphore: vk::Semaphore::null(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: vk::Semaphore::null(),
            fence,
        };

        assert_eq!(device.wait_for_fences(&[fence], 0), Err(vk::Result::TIMEOUT));
        device.submit_graphics(&submit).unwrap();
        assert!(device.is_fence_signaled(fence));

        // Resubmitting with a signaled fence is rejected
        assert_eq!(
            device.submit_graphics(&submit),
            Err(vk::Result::ERROR_VALIDATION_FAILED_EXT)
        );
    }
}
