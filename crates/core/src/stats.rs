//! Frame-rate counting for the render loop.

use std::time::{Duration, Instant};

/// Counts presented frames and reports a rate once per interval.
#[derive(Debug)]
pub struct FrameCounter {
    interval: Duration,
    window_start: Instant,
    frames: u32,
    total_frames: u64,
}

impl FrameCounter {
    /// Creates a counter that reports once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    /// Creates a counter that reports once per `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            frames: 0,
            total_frames: 0,
        }
    }

    /// Records one frame.
    ///
    /// Returns the frames-per-second over the elapsed window once the
    /// interval has passed, and starts a new window.
    pub fn tick(&mut self) -> Option<f32> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        self.total_frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }

        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }

    /// Total number of frames recorded since creation.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new()
    }
}
