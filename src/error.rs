// Error types for the playback controller
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TailwindError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The decoder could not produce frames from the resource
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unsupported format for {path:?}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// The output device could not be opened or written to
    #[error("Audio output error: {0}")]
    Output(String),

    #[error("No media is open")]
    NotOpen,

    /// The output line does not expose the requested control
    #[error("Unsupported control: {0}")]
    UnsupportedControl(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Metadata error: {0}")]
    Metadata(String),
}

pub type Result<T> = std::result::Result<T, TailwindError>;

impl From<symphonia::core::errors::Error> for TailwindError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        TailwindError::Decode(err.to_string())
    }
}

impl From<serde_json::Error> for TailwindError {
    fn from(err: serde_json::Error) -> Self {
        TailwindError::Settings(err.to_string())
    }
}

impl From<lofty::error::LoftyError> for TailwindError {
    fn from(err: lofty::error::LoftyError) -> Self {
        TailwindError::Metadata(err.to_string())
    }
}
