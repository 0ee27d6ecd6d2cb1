//! Swapchain recreation.
//!
//! [`ResizeCoordinator`] owns the [`SwapchainManager`] and the
//! [`FrameSynchronizer`] and is the entry point the application drives
//! each frame. It recreates the swapchain when:
//!
//! - the application asks for it ([`resize`](ResizeCoordinator::resize)
//!   immediately, [`request_resize`](ResizeCoordinator::request_resize)
//!   before the next frame)
//! - acquisition or presentation reports the swapchain out of date
//! - presentation reports it suboptimal and `recreate_on_suboptimal` is set
//!
//! Recreation waits for the graphics and present queues to go idle,
//! rebuilds the chain, renews the frame semaphores and notifies the
//! application's [`SwapchainDependents`]. The frame slot index is kept.
//!
//! A recreation asked for while a frame is in progress waits for that
//! frame's `end_frame`, so an acquired image is always submitted and
//! presented before the chain it belongs to is replaced.
//!
//! A surface with a zero-sized extent (minimised window) cannot hold a
//! swapchain. The recreation stays pending and frames are skipped until
//! the surface has a usable size again.

use std::sync::Arc;

use ash::vk;
use framechain_core::config::PresentConfig;
use framechain_rhi::device::SurfaceDevice;
use framechain_rhi::swapchain::{SwapchainImage, SwapchainManager, SwapchainSelectors};
use framechain_rhi::{QueueRole, RhiError, RhiResult};
use tracing::{debug, info, warn};

use crate::frame_manager::{AcquireOutcome, AcquiredFrame, FrameSynchronizer, PresentOutcome};

/// Per-image resources owned outside the swapchain (framebuffers,
/// per-image command buffers, ...), rebuilt whenever the chain changes.
pub trait SwapchainDependents<D: SurfaceDevice> {
    /// Called after every (re)build of the image chain, with the queues idle.
    fn on_swapchain_recreated(&mut self, swapchain: &SwapchainManager<D>) -> RhiResult<()>;
}

/// No dependent resources.
impl<D: SurfaceDevice> SwapchainDependents<D> for () {
    fn on_swapchain_recreated(&mut self, _swapchain: &SwapchainManager<D>) -> RhiResult<()> {
        Ok(())
    }
}

/// Detects swapchain staleness and recreates it between frames.
pub struct ResizeCoordinator<D: SurfaceDevice> {
    swapchain: SwapchainManager<D>,
    frames: FrameSynchronizer<D>,
    /// Extent of a recreation that has been asked for but not done yet.
    pending_extent: Option<vk::Extent2D>,
    recreate_on_suboptimal: bool,
    recreations: u64,
}

impl<D: SurfaceDevice> ResizeCoordinator<D> {
    /// Creates a coordinator. The swapchain is built on first use.
    pub fn new(
        device: Arc<D>,
        selectors: SwapchainSelectors,
        extent: vk::Extent2D,
        frames_in_flight: usize,
    ) -> RhiResult<Self> {
        let frames = FrameSynchronizer::new(Arc::clone(&device), frames_in_flight)?;
        let swapchain = SwapchainManager::new(device, selectors, extent);

        Ok(Self {
            swapchain,
            frames,
            pending_extent: None,
            recreate_on_suboptimal: true,
            recreations: 0,
        })
    }

    /// Creates a coordinator from configuration.
    ///
    /// The initial extent is the configured window size.
    pub fn from_config(device: Arc<D>, config: &PresentConfig) -> RhiResult<Self> {
        let selectors = if config.vsync {
            SwapchainSelectors::vsync()
        } else {
            SwapchainSelectors::default()
        };
        let extent = vk::Extent2D {
            width: config.window.width,
            height: config.window.height,
        };

        let mut coordinator = Self::new(device, selectors, extent, config.frames_in_flight)?;
        coordinator.frames.set_timeout(config.acquire_timeout_ns);
        coordinator.recreate_on_suboptimal = config.recreate_on_suboptimal;
        Ok(coordinator)
    }

    /// Sets whether a suboptimal swapchain is recreated (default true).
    pub fn with_recreate_on_suboptimal(mut self, recreate: bool) -> Self {
        self.recreate_on_suboptimal = recreate;
        self
    }

    /// Returns the swapchain handle, building the chain on first call.
    ///
    /// Dependents are not notified by this call; build them from
    /// [`image_chain`](Self::image_chain) afterwards.
    pub fn swapchain_handle(&mut self) -> RhiResult<vk::SwapchainKHR> {
        self.swapchain.swapchain_handle()
    }

    /// Recreates the swapchain for `extent` now.
    ///
    /// Between `begin_frame` and `end_frame` the recreation is deferred to
    /// [`end_frame`](Self::end_frame). A zero-sized extent is not an
    /// error: the recreation stays pending and is retried by
    /// [`begin_frame`](Self::begin_frame).
    pub fn resize(
        &mut self,
        extent: vk::Extent2D,
        dependents: &mut impl SwapchainDependents<D>,
    ) -> RhiResult<()> {
        self.pending_extent = Some(extent);
        if self.frames.pending_frame().is_some() {
            debug!("Frame in progress, recreation deferred to end_frame");
            return Ok(());
        }
        self.recreate_pending(dependents)?;
        Ok(())
    }

    /// Records a recreation for `extent`, done before the next frame.
    ///
    /// Cheap enough to call from a window event handler. Later requests
    /// replace earlier ones.
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        debug!("Resize requested: {}x{}", extent.width, extent.height);
        self.pending_extent = Some(extent);
    }

    /// Returns true if a recreation is pending.
    #[inline]
    pub fn is_resize_pending(&self) -> bool {
        self.pending_extent.is_some()
    }

    /// Starts a frame.
    ///
    /// Performs any pending recreation first. Returns `None` if the frame
    /// must be skipped: the surface has a zero extent, or the swapchain
    /// was found out of date (it has been recreated and the next call will
    /// succeed).
    pub fn begin_frame(
        &mut self,
        dependents: &mut impl SwapchainDependents<D>,
    ) -> RhiResult<Option<AcquiredFrame>> {
        if self.swapchain.state().is_none() && self.pending_extent.is_none() {
            self.pending_extent = Some(self.swapchain.requested_extent());
        }
        if self.pending_extent.is_some() && !self.recreate_pending(dependents)? {
            return Ok(None);
        }

        match self.frames.begin_frame(&self.swapchain)? {
            AcquireOutcome::Acquired(frame) => Ok(Some(frame)),
            AcquireOutcome::OutOfDate => {
                warn!("Swapchain out of date on acquire, recreating");
                self.pending_extent = Some(self.swapchain.requested_extent());
                self.recreate_pending(dependents)?;
                Ok(None)
            }
        }
    }

    /// Submits `command_buffers` for the current frame and presents it.
    ///
    /// Recreates the swapchain afterwards if presentation reported it
    /// stale or a resize was asked for during the frame. The outcome is
    /// returned for diagnostics; staleness has already been handled.
    ///
    /// A failed submit is returned as an error and schedules a recreation
    /// for the next [`begin_frame`](Self::begin_frame), which renews the
    /// frame semaphores with the queues idle.
    pub fn end_frame(
        &mut self,
        command_buffers: &[vk::CommandBuffer],
        dependents: &mut impl SwapchainDependents<D>,
    ) -> RhiResult<PresentOutcome> {
        let outcome = match self.frames.end_frame(&self.swapchain, command_buffers) {
            Ok(outcome) => outcome,
            Err(e) => {
                if self.frames.semaphores_stale() && self.pending_extent.is_none() {
                    self.pending_extent = Some(self.swapchain.requested_extent());
                }
                return Err(e);
            }
        };

        let recreate = match outcome {
            PresentOutcome::Presented => false,
            PresentOutcome::Suboptimal => self.recreate_on_suboptimal,
            PresentOutcome::OutOfDate => true,
        };

        if recreate {
            warn!("Swapchain {:?} on present, recreating", outcome);
            if self.pending_extent.is_none() {
                self.pending_extent = Some(self.swapchain.requested_extent());
            }
        }
        if self.pending_extent.is_some() {
            self.recreate_pending(dependents)?;
        }

        Ok(outcome)
    }

    /// Waits until no submitted frame is still executing.
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.frames.wait_for_all_frames()?;
        self.quiesce()
    }

    /// Returns the image chain, valid until the next recreation.
    pub fn image_chain(&self) -> &[SwapchainImage<D>] {
        self.swapchain.image_chain()
    }

    /// Returns the selected surface format, if built.
    pub fn surface_format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.swapchain.surface_format()
    }

    /// Returns the chain's extent, if built.
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.extent()
    }

    /// Returns the current frame slot index.
    pub fn frame_slot(&self) -> usize {
        self.frames.current_slot()
    }

    /// Returns how many times the chain has been recreated (the initial
    /// build is not counted).
    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Returns the swapchain manager.
    #[inline]
    pub fn swapchain(&self) -> &SwapchainManager<D> {
        &self.swapchain
    }

    /// Returns the frame synchronizer.
    #[inline]
    pub fn frames(&self) -> &FrameSynchronizer<D> {
        &self.frames
    }

    /// Performs the pending recreation. Returns false if it is still
    /// pending because the surface has a zero extent.
    fn recreate_pending(&mut self, dependents: &mut impl SwapchainDependents<D>) -> RhiResult<bool> {
        let Some(extent) = self.pending_extent else {
            return Ok(true);
        };
        let initial = self.swapchain.state().is_none();

        if !initial {
            self.quiesce()?;
        }

        match self.swapchain.recreate(extent) {
            Ok(()) => {}
            Err(RhiError::ZeroExtent) => {
                debug!("Surface has a zero extent, recreation stays pending");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        self.pending_extent = None;

        if !initial {
            self.frames.reset_semaphores()?;
            self.recreations += 1;
            info!(
                "Swapchain recreated ({} so far), frame slot {}",
                self.recreations,
                self.frames.current_slot()
            );
        }

        dependents.on_swapchain_recreated(&self.swapchain)?;
        Ok(true)
    }

    /// Waits for the queues that may still use the swapchain.
    fn quiesce(&self) -> RhiResult<()> {
        let device = self.swapchain.device();
        device.queue_wait_idle(QueueRole::Graphics)?;
        if !device.queue_families().is_shared() {
            device.queue_wait_idle(QueueRole::Present)?;
        }
        Ok(())
    }
}
