//! Error types for the application layer.

use thiserror::Error;

/// Main error type for code above the RHI (configuration, windowing).
#[derive(Error, Debug)]
pub enum Error {
    /// Vulkan-related errors surfaced as text by higher layers
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
