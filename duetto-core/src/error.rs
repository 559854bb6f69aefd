use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by duetto-core.
#[derive(Debug, Error)]
pub enum DuettoError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("media file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("media decode failed: {0}")]
    DecodeFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("frame size mismatch: expected {expected}, got {got}")]
    FrameSizeMismatch { expected: usize, got: usize },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DuettoError>;
