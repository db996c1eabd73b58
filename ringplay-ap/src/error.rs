//! Error types for ringplay-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use crate::audio::ring_buffer::RingBufferError;
use ringplay_common::events::PlayerState;
use thiserror::Error;

/// Main error type for ringplay-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source could not be opened (missing file, unsupported codec or format)
    #[error("Failed to open source: {0}")]
    SourceOpen(String),

    /// Mid-stream decode failure; terminal for the session
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Operation not valid in the current player state
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        /// Operation that was attempted
        operation: &'static str,
        /// State the player was in
        state: PlayerState,
    },

    /// Ring buffer contract violation
    #[error("Ring buffer error: {0}")]
    RingBuffer(#[from] RingBufferError),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ringplay_common::Error> for Error {
    fn from(err: ringplay_common::Error) -> Self {
        match err {
            ringplay_common::Error::Io(e) => Error::Io(e),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using ringplay-ap Error
pub type Result<T> = std::result::Result<T, Error>;
