//! Error types for lesson-player
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! None of these is fatal to the host: decode failures leave a segment without
//! audio, image failures degrade to a placeholder, and playback rejections
//! leave the sequencer paused until the user retries.

use crate::audio::ResourceId;
use thiserror::Error;

/// Encoded audio payload could not be turned into a playable resource
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Payload is empty (or decodes to zero bytes)
    #[error("encoded audio payload is empty")]
    Empty,

    /// Transport encoding is malformed
    #[error("malformed transport encoding: {0}")]
    Transport(String),
}

/// A segment's image could not be fetched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("image {url} failed to load: {reason}")]
pub struct ImageLoadError {
    pub url: String,
    pub reason: String,
}

impl ImageLoadError {
    pub fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// The playback device refused to start (or load) the attached source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackRejected {
    /// Nothing is attached to the device
    #[error("no source attached")]
    NoSource,

    /// The attached resource was released
    #[error("resource {0} has been released")]
    Released(ResourceId),

    /// The attached resource could not be decoded by the device
    #[error("source {0} is not playable: {1}")]
    Unplayable(ResourceId, String),

    /// The platform refused playback (output device, autoplay policy, ...)
    #[error("platform refused playback: {0}")]
    Refused(String),
}

/// Main error type for lesson-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lesson model or shared-library errors
    #[error(transparent)]
    Common(#[from] lesson_common::Error),

    /// Audio payload decode errors
    #[error("Audio decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Image preload errors
    #[error("Image load error: {0}")]
    ImageLoad(#[from] ImageLoadError),

    /// Playback device refused playback
    #[error("Playback rejected: {0}")]
    PlaybackRejected(#[from] PlaybackRejected),

    /// Audio probing / PCM decoding errors
    #[error("Audio probe error: {0}")]
    Probe(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The player task is no longer running
    #[error("Player has shut down")]
    Shutdown,
}

/// Convenience Result type using lesson-player Error
pub type Result<T> = std::result::Result<T, Error>;
