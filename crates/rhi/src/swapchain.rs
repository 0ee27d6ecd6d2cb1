//! Swapchain management.
//!
//! This module owns the presentable image chain of one surface: it selects
//! the surface format, present mode and extent, builds the swapchain and
//! one image view per image, and rebuilds all of it when the surface
//! changes.
//!
//! # Overview
//!
//! - Selection is done by three pure functions ([`select_surface_format`],
//!   [`select_present_mode`], [`select_extent`]) bundled as injectable
//!   strategies in [`SwapchainSelectors`].
//! - [`SwapchainManager`] builds the chain lazily on first use and rebuilds
//!   it on [`recreate`](SwapchainManager::recreate). A rebuild constructs
//!   the complete new [`SwapchainState`] (passing the old swapchain as the
//!   predecessor), swaps it into place, and only then releases the old
//!   image views and swapchain.
//! - Swapchain images are owned by the presentation engine and are wrapped
//!   in [`PresentableImage`], which has no destroy path. Image views are
//!   exclusively owned by [`ImageView`] and destroyed on drop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framechain_rhi::device::SurfaceDevice;
//! use framechain_rhi::swapchain::{SwapchainManager, SwapchainSelectors};
//! use framechain_rhi::vk;
//!
//! # fn example<D: SurfaceDevice>(device: Arc<D>) -> framechain_rhi::RhiResult<()> {
//! let mut swapchain = SwapchainManager::new(
//!     device,
//!     SwapchainSelectors::default(),
//!     vk::Extent2D { width: 800, height: 600 },
//! );
//!
//! // First access builds the chain
//! let handle = swapchain.swapchain_handle()?;
//! for image in swapchain.image_chain() {
//!     let _view = image.view();
//! }
//!
//! // Window resized
//! swapchain.resize(vk::Extent2D { width: 1024, height: 768 })?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::{SurfaceDevice, SwapchainDesc};
use crate::error::{RhiError, RhiResult};
use crate::physical_device::QueueFamilyIndices;

/// Format returned when the device has no preference, and preferred otherwise.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Present modes in order of preference, highest first.
///
/// FIFO is guaranteed to be supported and is also the fallback.
pub const PRESENT_MODE_RANKING: [vk::PresentModeKHR; 3] = [
    vk::PresentModeKHR::MAILBOX,
    vk::PresentModeKHR::IMMEDIATE,
    vk::PresentModeKHR::FIFO,
];

/// `current_extent` width reported when the caller decides the extent.
pub const CALLER_DEFINED_EXTENT: u32 = u32::MAX;

/// Chooses the surface format.
///
/// - A single `UNDEFINED` entry means the device has no preference:
///   [`PREFERRED_SURFACE_FORMAT`] is returned.
/// - Otherwise [`PREFERRED_SURFACE_FORMAT`] is returned if listed.
/// - Otherwise the first listed entry is returned.
///
/// An empty list also yields [`PREFERRED_SURFACE_FORMAT`]; the manager
/// rejects empty lists before selection.
pub fn select_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if let [only] = formats
        && only.format == vk::Format::UNDEFINED
    {
        debug!("Surface has no format preference, using B8G8R8A8_UNORM");
        return PREFERRED_SURFACE_FORMAT;
    }

    if formats.contains(&PREFERRED_SURFACE_FORMAT) {
        return PREFERRED_SURFACE_FORMAT;
    }

    match formats.first() {
        Some(&first) => {
            warn!(
                "Preferred surface format unavailable, using {:?} / {:?}",
                first.format, first.color_space
            );
            first
        }
        None => PREFERRED_SURFACE_FORMAT,
    }
}

/// Chooses the present mode by rank.
///
/// MAILBOX (low-latency triple buffering) beats IMMEDIATE (low latency,
/// may tear), which beats FIFO (vsync). The order of `present_modes` does
/// not matter. FIFO is returned when nothing ranked is listed.
pub fn select_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    PRESENT_MODE_RANKING
        .iter()
        .copied()
        .find(|mode| present_modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Always chooses FIFO. Used when vsync is forced on.
pub fn select_fifo_present_mode(_present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent.
///
/// If the surface reports an authoritative current extent it is returned
/// unchanged and `requested` is ignored. If the surface reports
/// [`CALLER_DEFINED_EXTENT`], `requested` is clamped component-wise into
/// the surface's min/max extents.
pub fn select_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != CALLER_DEFINED_EXTENT {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;

    vk::Extent2D {
        width: requested.width.clamp(min.width, max.width.max(min.width)),
        height: requested.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// Determines the number of swapchain images to request.
///
/// One more than the minimum, clamped to the maximum when the surface
/// reports one (a maximum of 0 means unbounded).
pub fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

/// Surface format selection strategy.
pub type SurfaceFormatSelector = fn(&[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR;
/// Present mode selection strategy.
pub type PresentModeSelector = fn(&[vk::PresentModeKHR]) -> vk::PresentModeKHR;
/// Extent selection strategy.
pub type ExtentSelector = fn(&vk::SurfaceCapabilitiesKHR, vk::Extent2D) -> vk::Extent2D;

/// The three selection strategies used to build a swapchain.
#[derive(Clone, Copy)]
pub struct SwapchainSelectors {
    /// Chooses the surface format.
    pub surface_format: SurfaceFormatSelector,
    /// Chooses the present mode.
    pub present_mode: PresentModeSelector,
    /// Chooses the extent.
    pub extent: ExtentSelector,
}

impl SwapchainSelectors {
    /// Default strategies with FIFO presentation forced on.
    pub fn vsync() -> Self {
        Self {
            present_mode: select_fifo_present_mode,
            ..Self::default()
        }
    }
}

impl Default for SwapchainSelectors {
    fn default() -> Self {
        Self {
            surface_format: select_surface_format,
            present_mode: select_present_mode,
            extent: select_extent,
        }
    }
}

/// How swapchain images are shared between queue families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSharing {
    /// Owned by a single queue family.
    Exclusive,
    /// Accessed concurrently by the graphics and present families, in that order.
    Concurrent([u32; 2]),
}

impl ImageSharing {
    /// Exclusive when graphics and present share a family, concurrent otherwise.
    pub fn for_queue_families(indices: QueueFamilyIndices) -> Self {
        if indices.is_shared() {
            ImageSharing::Exclusive
        } else {
            ImageSharing::Concurrent([indices.graphics_family, indices.present_family])
        }
    }

    /// The Vulkan sharing mode.
    pub fn mode(&self) -> vk::SharingMode {
        match self {
            ImageSharing::Exclusive => vk::SharingMode::EXCLUSIVE,
            ImageSharing::Concurrent(_) => vk::SharingMode::CONCURRENT,
        }
    }

    /// Queue family indices to declare (empty when exclusive).
    pub fn queue_family_indices(&self) -> &[u32] {
        match self {
            ImageSharing::Exclusive => &[],
            ImageSharing::Concurrent(indices) => indices,
        }
    }
}

/// A swapchain image, owned by the presentation engine.
///
/// There is no way to destroy it from here; it is released
/// together with its swapchain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PresentableImage(vk::Image);

impl PresentableImage {
    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.0
    }
}

/// An exclusively owned image view, destroyed on drop.
pub struct ImageView<D: SurfaceDevice> {
    device: Arc<D>,
    view: vk::ImageView,
}

impl<D: SurfaceDevice> ImageView<D> {
    /// Creates a 2D color view of a swapchain image.
    fn new(device: &Arc<D>, image: PresentableImage, format: vk::Format) -> RhiResult<Self> {
        let view = device
            .create_image_view(image.handle(), format)
            .map_err(RhiError::allocation("image view"))?;

        Ok(Self {
            device: Arc::clone(device),
            view,
        })
    }

    /// Returns the Vulkan image view handle.
    #[inline]
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl<D: SurfaceDevice> Drop for ImageView<D> {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.view);
    }
}

/// One entry of the image chain: the image and its view.
pub struct SwapchainImage<D: SurfaceDevice> {
    image: PresentableImage,
    view: ImageView<D>,
}

impl<D: SurfaceDevice> SwapchainImage<D> {
    /// Returns the swapchain image (not owned).
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    /// Returns the image view (owned by the chain).
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }
}

/// Exclusively owned swapchain handle, destroyed on drop.
struct OwnedSwapchain<D: SurfaceDevice> {
    device: Arc<D>,
    handle: vk::SwapchainKHR,
}

impl<D: SurfaceDevice> Drop for OwnedSwapchain<D> {
    fn drop(&mut self) {
        self.device.destroy_swapchain(self.handle);
        debug!("Destroyed swapchain {:?}", self.handle);
    }
}

/// A fully built swapchain and its image chain.
///
/// Dropping the state releases the image views and then the swapchain.
pub struct SwapchainState<D: SurfaceDevice> {
    // Field order matters: views must be destroyed before the swapchain.
    images: Vec<SwapchainImage<D>>,
    swapchain: OwnedSwapchain<D>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    image_usage: vk::ImageUsageFlags,
}

impl<D: SurfaceDevice> SwapchainState<D> {
    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain.handle
    }

    /// Returns the selected surface format.
    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Returns the selected present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the usage flags the images were created with.
    #[inline]
    pub fn image_usage(&self) -> vk::ImageUsageFlags {
        self.image_usage
    }

    /// Returns the image chain in presentation-engine order.
    #[inline]
    pub fn images(&self) -> &[SwapchainImage<D>] {
        &self.images
    }

    /// Returns the number of images in the chain.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

/// Owns the swapchain of one surface and rebuilds it on demand.
///
/// # Thread Safety
///
/// Not internally synchronized. Only the rendering thread may use it.
pub struct SwapchainManager<D: SurfaceDevice> {
    device: Arc<D>,
    selectors: SwapchainSelectors,
    /// Extent used when the surface lets the caller decide.
    requested_extent: vk::Extent2D,
    /// The live chain; `None` until first built.
    state: Option<SwapchainState<D>>,
    /// Number of successful builds.
    generation: u64,
}

impl<D: SurfaceDevice> SwapchainManager<D> {
    /// Creates a manager. No device work happens until the chain is first
    /// needed.
    pub fn new(device: Arc<D>, selectors: SwapchainSelectors, extent: vk::Extent2D) -> Self {
        Self {
            device,
            selectors,
            requested_extent: extent,
            state: None,
            generation: 0,
        }
    }

    /// Returns the swapchain handle, building the chain on first call.
    ///
    /// # Errors
    ///
    /// Propagates any error from [`setup`](Self::setup).
    pub fn swapchain_handle(&mut self) -> RhiResult<vk::SwapchainKHR> {
        if self.state.is_none() {
            self.setup()?;
        }
        self.current().map(SwapchainState::handle)
    }

    /// Builds the chain for the stored extent, replacing any live chain.
    ///
    /// # Errors
    ///
    /// - [`RhiError::SurfaceLost`] if a surface query fails
    /// - [`RhiError::SwapchainError`] if the surface reports no formats or
    ///   no present modes
    /// - [`RhiError::ZeroExtent`] if the selected extent has a zero dimension
    /// - [`RhiError::Allocation`] if creating the swapchain or a view fails
    ///
    /// On error the previously live chain (if any) is left untouched.
    pub fn setup(&mut self) -> RhiResult<()> {
        let previous = self
            .state
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), SwapchainState::handle);

        let next = self.build(previous)?;

        // Commit: the new chain goes live, then the old one is released.
        let retired = self.state.replace(next);
        self.generation += 1;
        drop(retired);

        Ok(())
    }

    /// Rebuilds the chain for `extent`.
    ///
    /// The caller must ensure no GPU work still references the current
    /// chain's images.
    pub fn recreate(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        self.requested_extent = extent;
        self.setup()
    }

    /// Explicit resize entry point: stores `extent` and recreates.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        info!("Resizing swapchain to {}x{}", extent.width, extent.height);
        self.recreate(extent)
    }

    /// Acquires the next image, signaling `semaphore` when it is writable.
    ///
    /// Returns `(image_index, suboptimal)`.
    ///
    /// # Errors
    ///
    /// - [`RhiError::OutOfDate`] if the swapchain must be recreated
    /// - [`RhiError::SwapchainError`] if the chain was never built
    /// - [`RhiError::VulkanError`] for anything else (including timeouts)
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> RhiResult<(u32, bool)> {
        let swapchain = self.current()?.handle();

        match self
            .device
            .acquire_next_image(swapchain, timeout, semaphore)
        {
            Ok(acquired) => Ok(acquired),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    ///
    /// Returns true if the swapchain is suboptimal.
    ///
    /// # Errors
    ///
    /// - [`RhiError::OutOfDate`] if the swapchain must be recreated
    /// - [`RhiError::VulkanError`] for anything else
    pub fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore) -> RhiResult<bool> {
        let swapchain = self.current()?.handle();

        match self
            .device
            .queue_present(swapchain, image_index, wait_semaphore)
        {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RhiError::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the live chain, if built.
    #[inline]
    pub fn state(&self) -> Option<&SwapchainState<D>> {
        self.state.as_ref()
    }

    /// Returns the image chain, valid until the next recreation.
    ///
    /// Empty until the chain is first built.
    pub fn image_chain(&self) -> &[SwapchainImage<D>] {
        match &self.state {
            Some(state) => state.images(),
            None => &[],
        }
    }

    /// Returns the selected surface format, if built.
    pub fn surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.state.as_ref().map(SwapchainState::surface_format)
    }

    /// Returns the selected present mode, if built.
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.state.as_ref().map(SwapchainState::present_mode)
    }

    /// Returns the chain's extent, if built.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.state.as_ref().map(SwapchainState::extent)
    }

    /// Returns the extent last requested by the caller.
    #[inline]
    pub fn requested_extent(&self) -> vk::Extent2D {
        self.requested_extent
    }

    /// Returns how many times the chain has been built.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the device.
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    fn current(&self) -> RhiResult<&SwapchainState<D>> {
        self.state
            .as_ref()
            .ok_or_else(|| RhiError::SwapchainError("swapchain has not been created".to_string()))
    }

    /// Builds a complete new chain. Does not touch `self.state`.
    fn build(&self, old_swapchain: vk::SwapchainKHR) -> RhiResult<SwapchainState<D>> {
        let device = &self.device;

        let capabilities = device
            .surface_capabilities()
            .map_err(RhiError::SurfaceLost)?;
        let formats = device.surface_formats().map_err(RhiError::SurfaceLost)?;
        let present_modes = device
            .surface_present_modes()
            .map_err(RhiError::SurfaceLost)?;

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            if capabilities.max_image_count == 0 {
                "unlimited".to_string()
            } else {
                capabilities.max_image_count.to_string()
            }
        );

        if formats.is_empty() || present_modes.is_empty() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = (self.selectors.surface_format)(&formats);
        let present_mode = (self.selectors.present_mode)(&present_modes);
        let extent = (self.selectors.extent)(&capabilities, self.requested_extent);

        if extent.width == 0 || extent.height == 0 {
            debug!("Surface extent is {}x{}, deferring", extent.width, extent.height);
            return Err(RhiError::ZeroExtent);
        }

        let image_count = determine_image_count(&capabilities);
        let sharing = ImageSharing::for_queue_families(device.queue_families());

        let mut image_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if capabilities
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            image_usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        info!(
            "Creating swapchain: {}x{}, format {:?}, color space {:?}, present mode {:?}, {} images, {:?} sharing",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count,
            sharing.mode()
        );

        let desc = SwapchainDesc {
            surface_format,
            present_mode,
            extent,
            image_count,
            image_usage,
            sharing,
            pre_transform: capabilities.current_transform,
            old_swapchain,
        };

        let swapchain = OwnedSwapchain {
            device: Arc::clone(device),
            handle: device
                .create_swapchain(&desc)
                .map_err(RhiError::allocation("swapchain"))?,
        };

        let images = device
            .swapchain_images(swapchain.handle)
            .map_err(RhiError::allocation("swapchain images"))?
            .into_iter()
            .map(|image| -> RhiResult<SwapchainImage<D>> {
                let image = PresentableImage(image);
                let view = ImageView::new(device, image, surface_format.format)?;
                Ok(SwapchainImage { image, view })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        info!("Swapchain created with {} images", images.len());

        Ok(SwapchainState {
            images,
            swapchain,
            surface_format,
            present_mode,
            extent,
            image_usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockDevice};

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn caller_defined_capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: extent(CALLER_DEFINED_EXTENT, CALLER_DEFINED_EXTENT),
            min_image_extent: extent(100, 100),
            max_image_extent: extent(2000, 2000),
            ..Default::default()
        }
    }

    fn manager(device: &Arc<MockDevice>) -> SwapchainManager<MockDevice> {
        SwapchainManager::new(
            Arc::clone(device),
            SwapchainSelectors::default(),
            extent(800, 600),
        )
    }

    #[test]
    fn test_surface_format_any_sentinel() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(select_surface_format(&formats), PREFERRED_SURFACE_FORMAT);

        // Color space of the sentinel entry is irrelevant
        let formats = [format(
            vk::Format::UNDEFINED,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )];
        assert_eq!(select_surface_format(&formats), PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn test_surface_format_prefers_canonical_pair() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            PREFERRED_SURFACE_FORMAT,
        ];
        assert_eq!(select_surface_format(&formats), PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn test_surface_format_falls_back_to_first() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            // Right format, wrong color space
            format(
                vk::Format::B8G8R8A8_UNORM,
                vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
            ),
        ];
        assert_eq!(select_surface_format(&formats), formats[0]);
    }

    #[test]
    fn test_surface_format_sentinel_among_others_is_not_special() {
        let formats = [
            format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(select_surface_format(&formats), formats[0]);
    }

    #[test]
    fn test_present_mode_ranking() {
        use vk::PresentModeKHR as M;

        assert_eq!(select_present_mode(&[M::FIFO]), M::FIFO);
        assert_eq!(select_present_mode(&[M::FIFO, M::IMMEDIATE]), M::IMMEDIATE);
        assert_eq!(select_present_mode(&[M::FIFO, M::MAILBOX]), M::MAILBOX);
        assert_eq!(
            select_present_mode(&[M::FIFO, M::IMMEDIATE, M::MAILBOX]),
            M::MAILBOX
        );
    }

    #[test]
    fn test_present_mode_ignores_input_order() {
        use vk::PresentModeKHR as M;

        assert_eq!(
            select_present_mode(&[M::MAILBOX, M::IMMEDIATE, M::FIFO]),
            M::MAILBOX
        );
        assert_eq!(
            select_present_mode(&[M::IMMEDIATE, M::MAILBOX, M::FIFO]),
            M::MAILBOX
        );
        assert_eq!(select_present_mode(&[M::IMMEDIATE, M::FIFO]), M::IMMEDIATE);
        assert_eq!(select_present_mode(&[M::FIFO_RELAXED, M::FIFO]), M::FIFO);
    }

    #[test]
    fn test_fifo_selector_for_vsync() {
        use vk::PresentModeKHR as M;

        assert_eq!(select_fifo_present_mode(&[M::MAILBOX, M::FIFO]), M::FIFO);
        let selectors = SwapchainSelectors::vsync();
        assert_eq!((selectors.present_mode)(&[M::MAILBOX, M::FIFO]), M::FIFO);
    }

    #[test]
    fn test_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(800, 600),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };

        assert_eq!(select_extent(&capabilities, extent(1024, 768)), extent(800, 600));
    }

    #[test]
    fn test_extent_clamps_to_limits() {
        let capabilities = caller_defined_capabilities();

        assert_eq!(select_extent(&capabilities, extent(3000, 3000)), extent(2000, 2000));
        assert_eq!(select_extent(&capabilities, extent(50, 50)), extent(100, 100));
        assert_eq!(select_extent(&capabilities, extent(800, 600)), extent(800, 600));
        assert_eq!(select_extent(&capabilities, extent(50, 3000)), extent(100, 2000));
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);

        // 0 means no limit
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }

    #[test]
    fn test_image_sharing() {
        let shared = QueueFamilyIndices {
            graphics_family: 1,
            present_family: 1,
        };
        let sharing = ImageSharing::for_queue_families(shared);
        assert_eq!(sharing, ImageSharing::Exclusive);
        assert_eq!(sharing.mode(), vk::SharingMode::EXCLUSIVE);
        assert!(sharing.queue_family_indices().is_empty());

        let split = QueueFamilyIndices {
            graphics_family: 2,
            present_family: 0,
        };
        let sharing = ImageSharing::for_queue_families(split);
        assert_eq!(sharing.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(sharing.queue_family_indices(), &[2, 0]);
    }

    #[test]
    fn test_lazy_setup() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);

        assert!(swapchain.state().is_none());
        assert!(swapchain.image_chain().is_empty());
        assert!(swapchain.surface_format().is_none());
        assert_eq!(device.live_swapchains(), 0);

        let handle = swapchain.swapchain_handle().unwrap();
        assert_eq!(swapchain.generation(), 1);
        assert_eq!(device.live_swapchains(), 1);

        // Second access does not rebuild
        assert_eq!(swapchain.swapchain_handle().unwrap(), handle);
        assert_eq!(swapchain.generation(), 1);
    }

    #[test]
    fn test_setup_applies_selectors() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);
        swapchain.setup().unwrap();

        let state = swapchain.state().unwrap();
        assert_eq!(state.surface_format(), PREFERRED_SURFACE_FORMAT);
        assert_eq!(state.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(state.extent(), extent(800, 600));
        assert_eq!(state.image_count(), 3);
        assert!(state.image_usage().contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));

        let desc = device.swapchain_descs()[0];
        assert_eq!(desc.image_count, 3);
        assert_eq!(desc.sharing, ImageSharing::Exclusive);
        assert_eq!(desc.old_swapchain, vk::SwapchainKHR::null());
    }

    #[test]
    fn test_views_match_images() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);
        let handle = swapchain.swapchain_handle().unwrap();

        let images = device.images_of(handle);
        let chain: Vec<vk::Image> = swapchain.image_chain().iter().map(|i| i.image()).collect();
        assert_eq!(chain, images);
        assert_eq!(device.live_image_views(), images.len());
        for entry in swapchain.image_chain() {
            assert_eq!(device.view_target(entry.view()), Some(entry.image()));
        }
    }

    #[test]
    fn test_concurrent_sharing_for_split_families() {
        let device = Arc::new(MockDevice::new().with_queue_families(QueueFamilyIndices {
            graphics_family: 0,
            present_family: 1,
        }));
        let mut swapchain = manager(&device);
        swapchain.setup().unwrap();

        let desc = device.swapchain_descs()[0];
        assert_eq!(desc.sharing.mode(), vk::SharingMode::CONCURRENT);
        assert_eq!(desc.sharing.queue_family_indices(), &[0, 1]);
    }

    #[test]
    fn test_recreate_passes_predecessor_then_releases_it() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);
        let first = swapchain.swapchain_handle().unwrap();
        let first_views: Vec<vk::ImageView> =
            swapchain.image_chain().iter().map(|i| i.view()).collect();
        device.clear_calls();

        swapchain.recreate(extent(800, 600)).unwrap();
        let second = swapchain.swapchain_handle().unwrap();
        assert_ne!(first, second);
        assert_eq!(device.swapchain_descs()[1].old_swapchain, first);

        // New chain fully built before any of the old one is released
        let calls = device.calls();
        let last_create = calls
            .iter()
            .rposition(|c| matches!(c, MockCall::CreateImageView { .. }))
            .unwrap();
        let first_destroy = calls
            .iter()
            .position(|c| {
                matches!(
                    c,
                    MockCall::DestroyImageView(_) | MockCall::DestroySwapchain(_)
                )
            })
            .unwrap();
        assert!(last_create < first_destroy);

        // Views before their swapchain
        let old_swapchain_destroyed = calls
            .iter()
            .position(|c| *c == MockCall::DestroySwapchain(first))
            .unwrap();
        for view in first_views {
            let destroyed = calls
                .iter()
                .position(|c| *c == MockCall::DestroyImageView(view))
                .unwrap();
            assert!(destroyed < old_swapchain_destroyed);
        }

        assert_eq!(device.live_swapchains(), 1);
        assert_eq!(device.live_image_views(), 3);
    }

    #[test]
    fn test_recreate_twice_is_equivalent() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);

        swapchain.recreate(extent(800, 600)).unwrap();
        let first_len = swapchain.image_chain().len();
        let first_format = swapchain.surface_format();

        swapchain.recreate(extent(800, 600)).unwrap();
        assert_eq!(swapchain.image_chain().len(), first_len);
        assert_eq!(swapchain.surface_format(), first_format);
        assert_eq!(swapchain.generation(), 2);
    }

    #[test]
    fn test_resize_uses_requested_extent_when_caller_defined() {
        let device = Arc::new(MockDevice::new().with_capabilities(vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ..caller_defined_capabilities()
        }));
        let mut swapchain = manager(&device);

        swapchain.resize(extent(1024, 768)).unwrap();
        assert_eq!(swapchain.extent(), Some(extent(1024, 768)));
        assert_eq!(swapchain.requested_extent(), extent(1024, 768));

        swapchain.resize(extent(5000, 10)).unwrap();
        assert_eq!(swapchain.extent(), Some(extent(2000, 100)));
    }

    #[test]
    fn test_capability_failure_is_surface_loss() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);
        swapchain.setup().unwrap();
        let live = swapchain.swapchain_handle().unwrap();

        device.fail_surface_queries(Some(vk::Result::ERROR_SURFACE_LOST_KHR));
        let err = swapchain.recreate(extent(800, 600)).unwrap_err();
        assert!(matches!(
            err,
            RhiError::SurfaceLost(vk::Result::ERROR_SURFACE_LOST_KHR)
        ));
        assert!(err.is_fatal());

        // The live chain is untouched
        assert_eq!(swapchain.swapchain_handle().unwrap(), live);
        assert_eq!(device.live_swapchains(), 1);
    }

    #[test]
    fn test_inadequate_support() {
        let device = Arc::new(MockDevice::new().with_present_modes(Vec::new()));
        let mut swapchain = manager(&device);
        let err = swapchain.setup().unwrap_err();
        assert!(matches!(err, RhiError::SwapchainError(_)));
    }

    #[test]
    fn test_no_surface_formats() {
        let device = Arc::new(MockDevice::new().with_formats(Vec::new()));
        let mut swapchain = manager(&device);

        let err = swapchain.setup().unwrap_err();
        assert!(matches!(err, RhiError::SwapchainError(_)));
        assert!(swapchain.state().is_none());
        assert_eq!(device.live_swapchains(), 0);
    }

    #[test]
    fn test_swapchain_creation_failure_keeps_live_chain() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);
        swapchain.setup().unwrap();
        let live = swapchain.swapchain_handle().unwrap();
        let views: Vec<_> = swapchain.image_chain().iter().map(|i| i.view()).collect();

        device.fail_swapchain_creation(Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        let err = swapchain.recreate(extent(800, 600)).unwrap_err();
        assert!(matches!(
            err,
            RhiError::Allocation {
                what: "swapchain",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            }
        ));
        assert!(err.is_fatal());

        assert_eq!(swapchain.swapchain_handle().unwrap(), live);
        assert_eq!(swapchain.generation(), 1);
        let after: Vec<_> = swapchain.image_chain().iter().map(|i| i.view()).collect();
        assert_eq!(after, views);
        assert_eq!(device.live_swapchains(), 1);
        assert_eq!(device.live_image_views(), 3);

        // Recovers once the device does
        device.fail_swapchain_creation(None);
        swapchain.recreate(extent(800, 600)).unwrap();
        assert_ne!(swapchain.swapchain_handle().unwrap(), live);
        assert_eq!(device.live_swapchains(), 1);
    }

    #[test]
    fn test_zero_extent_is_deferred() {
        let device = Arc::new(MockDevice::new());
        device.set_current_extent(extent(0, 0));
        let mut swapchain = manager(&device);

        let err = swapchain.setup().unwrap_err();
        assert!(matches!(err, RhiError::ZeroExtent));
        assert!(!err.is_fatal());
        assert_eq!(device.live_swapchains(), 0);
    }

    #[test]
    fn test_view_creation_failure_cleans_up_new_chain() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);
        swapchain.setup().unwrap();
        let live = swapchain.swapchain_handle().unwrap();

        // Fail the third view of the next chain
        device.fail_image_view_creation_after(Some(2));
        let err = swapchain.recreate(extent(800, 600)).unwrap_err();
        assert!(matches!(
            err,
            RhiError::Allocation {
                what: "image view",
                ..
            }
        ));
        assert!(err.is_fatal());

        // Partial chain released, old chain still live
        assert_eq!(swapchain.swapchain_handle().unwrap(), live);
        assert_eq!(device.live_swapchains(), 1);
        assert_eq!(device.live_image_views(), 3);
    }

    #[test]
    fn test_drop_releases_everything() {
        let device = Arc::new(MockDevice::new());
        {
            let mut swapchain = manager(&device);
            swapchain.setup().unwrap();
            assert_eq!(device.live_image_views(), 3);
        }
        assert_eq!(device.live_swapchains(), 0);
        assert_eq!(device.live_image_views(), 0);
    }

    #[test]
    fn test_acquire_before_setup_is_error() {
        let device = Arc::new(MockDevice::new());
        let swapchain = manager(&device);
        let err = swapchain
            .acquire_next_image(vk::Semaphore::null(), u64::MAX)
            .unwrap_err();
        assert!(matches!(err, RhiError::SwapchainError(_)));
    }

    #[test]
    fn test_acquire_and_present_map_staleness() {
        let device = Arc::new(MockDevice::new());
        let mut swapchain = manager(&device);
        swapchain.setup().unwrap();
        let semaphore = device.create_semaphore().unwrap();

        device.push_acquire_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        let err = swapchain.acquire_next_image(semaphore, u64::MAX).unwrap_err();
        assert!(matches!(err, RhiError::OutOfDate));

        device.push_acquire_result(Ok((1, true)));
        assert_eq!(swapchain.acquire_next_image(semaphore, u64::MAX).unwrap(), (1, true));

        device.push_present_result(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(matches!(
            swapchain.present(1, semaphore).unwrap_err(),
            RhiError::OutOfDate
        ));

        device.push_present_result(Err(vk::Result::SUBOPTIMAL_KHR));
        assert!(swapchain.present(1, semaphore).unwrap());

        device.push_present_result(Err(vk::Result::ERROR_DEVICE_LOST));
        assert!(matches!(
            swapchain.present(1, semaphore).unwrap_err(),
            RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST)
        ));

        device.destroy_semaphore(semaphore);
    }
}
