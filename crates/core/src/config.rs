//! Presentation configuration.
//!
//! Settings are read from a TOML file (`framechain.toml` by default). Every
//! field has a default, so a missing file or a partial file is valid:
//!
//! ```toml
//! frames_in_flight = 2
//! recreate_on_suboptimal = true
//! vsync = false
//!
//! [window]
//! width = 1280
//! height = 720
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Upper bound on the number of frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "framechain.toml";

/// Initial window settings for the demo application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Initial inner width in pixels.
    pub width: u32,
    /// Initial inner height in pixels.
    pub height: u32,
    /// Window title.
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            title: "framechain".to_string(),
        }
    }
}

/// Swapchain and frame pacing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PresentConfig {
    /// Number of frame slots cycling through the synchronizer.
    ///
    /// Fixed for the lifetime of the synchronizer; independent of the
    /// swapchain image count.
    pub frames_in_flight: usize,
    /// Timeout for image acquisition, in nanoseconds.
    pub acquire_timeout_ns: u64,
    /// Recreate the swapchain when acquire/present reports it suboptimal.
    pub recreate_on_suboptimal: bool,
    /// Force FIFO presentation instead of the ranked present-mode choice.
    pub vsync: bool,
    /// Enable the Khronos validation layer when available.
    pub validation: bool,
    /// Demo window settings.
    pub window: WindowConfig,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            acquire_timeout_ns: u64::MAX,
            recreate_on_suboptimal: true,
            vsync: false,
            validation: false,
            window: WindowConfig::default(),
        }
    }
}

impl PresentConfig {
    /// Parses and validates a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid TOML for this
    /// structure or if [`validate`](Self::validate) rejects it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from `path`.
    ///
    /// A missing file yields the defaults. Any other IO failure, a parse
    /// failure or an invalid value is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml_str(&text)?;
                info!("Loaded configuration from {}", path.display());
                debug!("{:?}", config);
                Ok(config)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("{} not found, using default configuration", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames_in_flight must be in 1..={}, got {}",
                MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        Ok(())
    }
}
