use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The scene description is malformed or references missing data
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// A configuration value was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Rendering was requested without a successfully loaded scene
    #[error("No valid scene loaded")]
    NoScene,

    /// A compute dispatch failed; the current frame is abandoned
    #[error("Device error: {0}")]
    Device(String),

    /// An internal pipeline invariant did not hold after a pass
    #[error("Pipeline invariant violated: {0}")]
    Pipeline(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub fn scene(msg: impl Into<String>) -> Self {
        Self::InvalidScene(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Device(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
