//! RHI-specific error types.

use std::fmt;

use ash::vk;
use thiserror::Error;

/// The queue role a queue family is selected for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Queue family used for command submission.
    Graphics,
    /// Queue family able to present to the surface.
    Present,
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueRole::Graphics => f.write_str("graphics"),
            QueueRole::Present => f.write_str("present"),
        }
    }
}

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// No physical device with the required queues and extensions
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// No queue family can serve the given role
    #[error("No suitable {0} queue family")]
    NoSuitableQueue(QueueRole),

    /// A surface capability query failed; the surface is gone
    #[error("Surface lost: {0}")]
    SurfaceLost(vk::Result),

    /// The swapchain no longer matches the surface
    #[error("Swapchain out of date")]
    OutOfDate,

    /// Resource creation failed
    #[error("Failed to create {what}: {result}")]
    Allocation {
        /// Kind of resource being created.
        what: &'static str,
        /// Result code reported by the device.
        result: vk::Result,
    },

    /// The surface currently has a zero-sized extent (e.g. minimised window)
    #[error("Surface extent has a zero dimension")]
    ZeroExtent,

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),
}

impl RhiError {
    /// Builds an [`RhiError::Allocation`] for a failed creation call.
    pub fn allocation(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| RhiError::Allocation { what, result }
    }

    /// Returns true for errors that recreating the swapchain can resolve.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            RhiError::OutOfDate | RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }

    /// Returns true if a wait or acquisition ran out of time. The caller
    /// may retry the frame.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RhiError::VulkanError(vk::Result::TIMEOUT | vk::Result::NOT_READY)
        )
    }

    /// Returns true for errors that cannot be recovered at this layer.
    pub fn is_fatal(&self) -> bool {
        !self.is_stale() && !self.is_timeout() && !matches!(self, RhiError::ZeroExtent)
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
