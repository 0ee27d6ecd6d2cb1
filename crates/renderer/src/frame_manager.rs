//! Frame synchronization.
//!
//! This module provides the [`FrameSynchronizer`], which owns a fixed ring
//! of [`FrameSlot`]s and drives the acquire, submit and present cycle.
//!
//! # Overview
//!
//! The synchronizer implements a "frames in flight" pattern:
//!
//! 1. While the GPU renders frame N, the CPU prepares frame N+1
//! 2. Each slot has its own semaphores and fence
//! 3. The slot's fence keeps the CPU from reusing resources still in use
//!
//! The slot index cycles modulo the number of frames in flight. It never
//! depends on the swapchain image count: three images with two frames in
//! flight is a normal configuration, and the image index returned by
//! acquisition is unrelated to the slot index.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use framechain_renderer::frame_manager::{AcquireOutcome, FrameSynchronizer, PresentOutcome};
//! use framechain_rhi::mock::MockDevice;
//! use framechain_rhi::swapchain::{SwapchainManager, SwapchainSelectors};
//! use framechain_rhi::vk;
//!
//! let device = Arc::new(MockDevice::new());
//! let mut swapchain = SwapchainManager::new(
//!     Arc::clone(&device),
//!     SwapchainSelectors::default(),
//!     vk::Extent2D { width: 800, height: 600 },
//! );
//! swapchain.setup()?;
//! let mut frames = FrameSynchronizer::new(device, 2)?;
//!
//! if let AcquireOutcome::Acquired(frame) = frames.begin_frame(&swapchain)? {
//!     // Record commands for swapchain.image_chain()[frame.image_index]...
//!     let outcome = frames.end_frame(&swapchain, &[])?;
//!     assert_eq!(outcome, PresentOutcome::Presented);
//! }
//! # Ok::<(), framechain_rhi::RhiError>(())
//! ```

use std::sync::Arc;

use ash::vk;
use framechain_core::config::MAX_FRAMES_IN_FLIGHT;
use framechain_rhi::device::{FrameSubmit, SurfaceDevice};
use framechain_rhi::swapchain::SwapchainManager;
use framechain_rhi::sync::FrameSlot;
use framechain_rhi::{RhiError, RhiResult};
use tracing::{debug, info, warn};

/// A successfully acquired frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredFrame {
    /// Frame slot index, in `0..frames_in_flight`.
    pub slot: usize,
    /// Index into the swapchain's image chain.
    pub image_index: u32,
    /// The swapchain still works but no longer matches the surface.
    pub suboptimal: bool,
}

/// Result of [`FrameSynchronizer::begin_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; record and call `end_frame`.
    Acquired(AcquiredFrame),
    /// The swapchain is stale. Nothing was acquired and the slot is
    /// unchanged; recreate and try again.
    OutOfDate,
}

/// Result of [`FrameSynchronizer::end_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally.
    Presented,
    /// Presented, but acquire or present reported the swapchain suboptimal.
    Suboptimal,
    /// The swapchain is stale; the image was not presented.
    OutOfDate,
}

impl PresentOutcome {
    /// Returns true if the swapchain should be recreated.
    pub fn is_stale(&self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Drives the per-frame acquire, submit and present protocol.
///
/// # Thread Safety
///
/// Not internally synchronized. Only the rendering thread may use it.
pub struct FrameSynchronizer<D: SurfaceDevice> {
    device: Arc<D>,
    slots: Vec<FrameSlot<D>>,
    /// Current slot index, in `0..slots.len()`.
    current: usize,
    /// Acquisition and fence wait timeout, in nanoseconds.
    timeout: u64,
    /// Frame between `begin_frame` and `end_frame`.
    pending: Option<AcquiredFrame>,
    /// A submit failed after its image was acquired; the slot's
    /// image-available semaphore may still hold that signal.
    semaphores_stale: bool,
}

impl<D: SurfaceDevice> FrameSynchronizer<D> {
    /// Creates the slot ring.
    ///
    /// # Errors
    ///
    /// - [`RhiError::SwapchainError`] if `frames_in_flight` is outside
    ///   `1..=MAX_FRAMES_IN_FLIGHT`
    /// - [`RhiError::Allocation`] if a primitive cannot be created
    pub fn new(device: Arc<D>, frames_in_flight: usize) -> RhiResult<Self> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&frames_in_flight) {
            return Err(RhiError::SwapchainError(format!(
                "frames in flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {frames_in_flight}"
            )));
        }

        let slots = (0..frames_in_flight)
            .map(|_| FrameSlot::new(&device))
            .collect::<RhiResult<Vec<_>>>()?;

        info!("Created frame synchronizer with {} frames in flight", frames_in_flight);

        Ok(Self {
            device,
            slots,
            current: 0,
            timeout: u64::MAX,
            pending: None,
            semaphores_stale: false,
        })
    }

    /// Sets the acquire and fence wait timeout in nanoseconds.
    pub fn set_timeout(&mut self, timeout: u64) {
        self.timeout = timeout;
    }

    /// Waits for the current slot, then acquires the next image.
    ///
    /// The slot's fence is left signaled until `end_frame` submits, so an
    /// out-of-date result, a timeout or an abandoned frame leaves the slot
    /// ready for the retry.
    ///
    /// # Errors
    ///
    /// - [`RhiError::SwapchainError`] if the previous frame was not ended
    /// - [`RhiError::VulkanError`] if a wait times out or the device fails
    pub fn begin_frame(&mut self, swapchain: &SwapchainManager<D>) -> RhiResult<AcquireOutcome> {
        if self.pending.is_some() {
            return Err(RhiError::SwapchainError(
                "begin_frame called while a frame is in progress".to_string(),
            ));
        }

        let slot = &self.slots[self.current];
        slot.in_flight().wait(self.timeout)?;

        let (image_index, suboptimal) =
            match swapchain.acquire_next_image(slot.image_available().handle(), self.timeout) {
                Ok(acquired) => acquired,
                Err(RhiError::OutOfDate) => {
                    debug!("Swapchain out of date during acquire");
                    return Ok(AcquireOutcome::OutOfDate);
                }
                Err(e) => return Err(e),
            };

        if suboptimal {
            debug!("Swapchain suboptimal during acquire");
        }

        let frame = AcquiredFrame {
            slot: self.current,
            image_index,
            suboptimal,
        };
        self.pending = Some(frame);
        Ok(AcquireOutcome::Acquired(frame))
    }

    /// Submits `command_buffers` for the acquired frame, advances the slot
    /// and presents.
    ///
    /// The slot's fence is reset right before the submission, which waits
    /// on the image-available semaphore at the color attachment output
    /// stage and signals the render-finished semaphore and the fence.
    ///
    /// If the submission fails the fence is replaced with a signaled one
    /// and the slot does not advance. The image-available semaphore may
    /// still be signaled, so [`reset_semaphores`](Self::reset_semaphores)
    /// must run (queues idle) before the next frame; see
    /// [`semaphores_stale`](Self::semaphores_stale).
    ///
    /// # Errors
    ///
    /// - [`RhiError::SwapchainError`] without a preceding acquired frame
    /// - [`RhiError::VulkanError`] if submission or presentation fails
    pub fn end_frame(
        &mut self,
        swapchain: &SwapchainManager<D>,
        command_buffers: &[vk::CommandBuffer],
    ) -> RhiResult<PresentOutcome> {
        let frame = self.pending.take().ok_or_else(|| {
            RhiError::SwapchainError("end_frame called without an acquired frame".to_string())
        })?;

        let slot = &mut self.slots[frame.slot];
        let render_finished = slot.render_finished().handle();

        slot.in_flight().reset()?;

        let submitted = self.device.submit_graphics(&FrameSubmit {
            command_buffers,
            wait_semaphore: slot.image_available().handle(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: render_finished,
            fence: slot.in_flight().handle(),
        });
        if let Err(result) = submitted {
            warn!("Submit failed on frame slot {}: {}", frame.slot, result);
            slot.renew_fence(&self.device)?;
            self.semaphores_stale = true;
            return Err(result.into());
        }

        // The slot's resources now belong to the GPU
        self.current = (self.current + 1) % self.slots.len();

        match swapchain.present(frame.image_index, render_finished) {
            Ok(suboptimal) if suboptimal || frame.suboptimal => {
                debug!("Swapchain suboptimal during present");
                Ok(PresentOutcome::Suboptimal)
            }
            Ok(_) => Ok(PresentOutcome::Presented),
            Err(RhiError::OutOfDate) => {
                debug!("Swapchain out of date during present");
                Ok(PresentOutcome::OutOfDate)
            }
            Err(e) => Err(e),
        }
    }

    /// Waits for every slot's last submission to complete.
    pub fn wait_for_all_frames(&self) -> RhiResult<()> {
        let fences: Vec<vk::Fence> = self.slots.iter().map(|s| s.in_flight().handle()).collect();
        self.device.wait_for_fences(&fences, u64::MAX)?;
        Ok(())
    }

    /// Replaces every slot's semaphores after a swapchain recreation or a
    /// failed submit.
    ///
    /// The queues must be idle.
    ///
    /// # Errors
    ///
    /// - [`RhiError::SwapchainError`] if a frame is in progress; end it
    ///   first
    /// - [`RhiError::Allocation`] if a semaphore cannot be created
    pub fn reset_semaphores(&mut self) -> RhiResult<()> {
        if self.pending.is_some() {
            return Err(RhiError::SwapchainError(
                "cannot reset semaphores while a frame is in progress".to_string(),
            ));
        }

        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.renew_semaphores(&self.device)?;
            debug!("Reset semaphores for frame {}", i);
        }
        self.semaphores_stale = false;
        Ok(())
    }

    /// Returns true if a failed submit left a semaphore signaled and
    /// [`reset_semaphores`](Self::reset_semaphores) has not run since.
    #[inline]
    pub fn semaphores_stale(&self) -> bool {
        self.semaphores_stale
    }

    /// Returns the current slot index.
    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Returns the primitives of slot `index`.
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&FrameSlot<D>> {
        self.slots.get(index)
    }

    /// Returns the frame between `begin_frame` and `end_frame`, if any.
    #[inline]
    pub fn pending_frame(&self) -> Option<AcquiredFrame> {
        self.pending
    }

    /// Returns the number of frames in flight.
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Returns the acquire and fence wait timeout in nanoseconds.
    #[inline]
    pub fn timeout(&self) -> u64 {
        self.timeout
    }

    /// Returns a reference to the device.
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}
