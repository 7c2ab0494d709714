//! Error type shared by the erosion engine and its terrain collaborators.

use thiserror::Error;

/// Errors raised by the erosion engine.
///
/// Numeric degeneracies inside the droplet simulation (zero-length direction,
/// vanishing sediment capacity, droplets leaving the grid) are handled in
/// place and never show up here.
#[derive(Debug, Error)]
pub enum ErosionError {
    /// Rejected before any simulation work starts; the input grid is untouched.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// GPU adapter, device or readback failure
    #[error("GPU erosion failed: {0}")]
    Gpu(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl ErosionError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ErosionError::InvalidConfiguration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ErosionError>;
