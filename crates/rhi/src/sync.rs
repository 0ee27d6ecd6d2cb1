//! Synchronization primitives.
//!
//! This module provides owned wrappers for the synchronization objects
//! used by frame pacing:
//! - [`Semaphore`] - GPU-to-GPU synchronization (between queue operations)
//! - [`Fence`] - GPU-to-CPU synchronization (for host waiting)
//! - [`FrameSlot`] - The set of primitives one in-flight frame uses
//!
//! All wrappers are generic over the [`SurfaceDevice`] they were created
//! from and destroy their handle through it on drop.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framechain_rhi::device::SurfaceDevice;
//! use framechain_rhi::sync::{Fence, Semaphore};
//!
//! # fn example<D: SurfaceDevice>(device: Arc<D>) -> framechain_rhi::RhiResult<()> {
//! // Unsignaled semaphore for GPU-to-GPU ordering
//! let image_available = Semaphore::new(Arc::clone(&device))?;
//!
//! // Signaled fence so the first wait returns immediately
//! let in_flight = Fence::new(Arc::clone(&device), true)?;
//! in_flight.wait(u64::MAX)?;
//! in_flight.reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::SurfaceDevice;
use crate::error::{RhiError, RhiResult};

/// Owned semaphore.
///
/// Created unsignaled. Used to order queue operations: acquire before
/// render, render before present.
pub struct Semaphore<D: SurfaceDevice> {
    device: Arc<D>,
    semaphore: vk::Semaphore,
}

impl<D: SurfaceDevice> Semaphore<D> {
    /// Creates a new semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Allocation`] if creation fails.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let semaphore = device
            .create_semaphore()
            .map_err(RhiError::allocation("semaphore"))?;

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<D: SurfaceDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// Owned fence.
///
/// Signaled by the GPU when a submission completes and waited on by the
/// host before the resources that submission used are reused.
pub struct Fence<D: SurfaceDevice> {
    device: Arc<D>,
    fence: vk::Fence,
}

impl<D: SurfaceDevice> Fence<D> {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The device
    /// * `signaled` - If true, creates the fence in the signaled state so
    ///   the first wait does not block.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Allocation`] if creation fails.
    pub fn new(device: Arc<D>, signaled: bool) -> RhiResult<Self> {
        let fence = device
            .create_fence(signaled)
            .map_err(RhiError::allocation("fence"))?;

        Ok(Self { device, fence })
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds pass.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::VulkanError`] with `TIMEOUT` if the wait expires,
    /// or with the failing code otherwise.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fences(&[self.fence], timeout)?;
        Ok(())
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be in use by any pending submission.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)?;
        Ok(())
    }
}

impl<D: SurfaceDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
    }
}

/// Synchronization primitives for one in-flight frame.
///
/// # Usage Pattern
///
/// ```text
/// 1. Wait for in_flight (host waits for the slot's previous submission)
/// 2. Acquire an image, signaling image_available
/// 3. Reset in_flight
/// 4. Submit, waiting on image_available, signaling render_finished
///    and in_flight
/// 5. Present, waiting on render_finished
/// ```
pub struct FrameSlot<D: SurfaceDevice> {
    image_available: Semaphore<D>,
    render_finished: Semaphore<D>,
    in_flight: Fence<D>,
}

impl<D: SurfaceDevice> FrameSlot<D> {
    /// Creates the primitives for one slot.
    ///
    /// The fence starts signaled so the first frame on this slot does not
    /// wait.
    pub fn new(device: &Arc<D>) -> RhiResult<Self> {
        let image_available = Semaphore::new(Arc::clone(device))?;
        let render_finished = Semaphore::new(Arc::clone(device))?;
        let in_flight = Fence::new(Arc::clone(device), true)?;

        debug!("Created frame slot primitives");

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Signaled when the acquired image is ready to be written.
    #[inline]
    pub fn image_available(&self) -> &Semaphore<D> {
        &self.image_available
    }

    /// Signaled when the slot's rendering has finished.
    #[inline]
    pub fn render_finished(&self) -> &Semaphore<D> {
        &self.render_finished
    }

    /// Signaled when the slot's submission has completed on the GPU.
    #[inline]
    pub fn in_flight(&self) -> &Fence<D> {
        &self.in_flight
    }

    /// Replaces both semaphores with fresh unsignaled ones.
    ///
    /// A present that reports the swapchain out of date may leave its wait
    /// semaphore in an undefined state. The queues must be idle.
    pub fn renew_semaphores(&mut self, device: &Arc<D>) -> RhiResult<()> {
        self.image_available = Semaphore::new(Arc::clone(device))?;
        self.render_finished = Semaphore::new(Arc::clone(device))?;
        Ok(())
    }

    /// Replaces the fence with a fresh signaled one.
    ///
    /// Used when a submission that was to signal the fence failed, so the
    /// next wait on this slot does not block forever.
    pub fn renew_fence(&mut self, device: &Arc<D>) -> RhiResult<()> {
        self.in_flight = Fence::new(Arc::clone(device), true)?;
        Ok(())
    }
}
