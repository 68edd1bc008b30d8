use thiserror::Error;

#[derive(Error, Debug)]
pub enum FabryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid cube: {reason}")]
    InvalidCube { reason: String },

    #[error("Expected a {expected}-dimensional array, got {found} dimensions")]
    InvalidShape { expected: usize, found: usize },

    #[error("Dimension mismatch: expected {expected:?}, got {found:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown registry slot: {0}")]
    UnknownSlot(String),

    #[error("Unknown algorithm '{name}' for slot '{slot}'")]
    UnknownAlgorithm { slot: String, name: String },

    #[error("Invalid cube container: {0}")]
    InvalidContainer(String),

    #[error("Fit error: {0}")]
    Fit(String),

    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },
}

pub type Result<T> = std::result::Result<T, FabryError>;
