//! Frame pacing and swapchain recreation.
//!
//! This crate drives presentation on top of `framechain_rhi`:
//! - [`FrameSynchronizer`]: the acquire, submit and present cycle over a
//!   fixed ring of frame slots
//! - [`ResizeCoordinator`]: staleness handling and safe swapchain
//!   recreation

pub mod frame_manager;
pub mod resize;

pub use frame_manager::{AcquireOutcome, AcquiredFrame, FrameSynchronizer, PresentOutcome};
pub use resize::{ResizeCoordinator, SwapchainDependents};
