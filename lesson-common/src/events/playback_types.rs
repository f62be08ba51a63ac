//! Playback-related type definitions
//!
//! Supporting types for the sequencer's play state and per-segment image status.

use serde::{Deserialize, Serialize};

/// Sequencer play state
///
/// `Ended` is terminal for the current pass through a lesson; the next play
/// request restarts at the first segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    /// No lesson loaded
    #[default]
    Idle,
    /// Lesson loaded, nothing played yet
    Ready,
    /// Audio (or a dwell) is running for the current segment
    Playing,
    /// Explicitly paused or playback was refused by the platform
    Paused,
    /// Last segment finished
    Ended,
}

impl PlayerState {
    /// True only while playing
    pub fn is_playing(&self) -> bool {
        matches!(self, PlayerState::Playing)
    }

    /// True once the last segment finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlayerState::Ended)
    }

    /// True when a lesson is loaded
    pub fn has_lesson(&self) -> bool {
        !matches!(self, PlayerState::Idle)
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerState::Idle => write!(f, "idle"),
            PlayerState::Ready => write!(f, "ready"),
            PlayerState::Playing => write!(f, "playing"),
            PlayerState::Paused => write!(f, "paused"),
            PlayerState::Ended => write!(f, "ended"),
        }
    }
}

/// Image preload status for one segment, as rendered by the host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Segment has no image reference
    NoImage,
    /// Fetch not settled yet (show loading placeholder)
    Pending,
    /// Fetch succeeded
    Loaded,
    /// Fetch failed (show error placeholder)
    Errored,
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageStatus::NoImage => write!(f, "no_image"),
            ImageStatus::Pending => write!(f, "pending"),
            ImageStatus::Loaded => write!(f, "loaded"),
            ImageStatus::Errored => write!(f, "errored"),
        }
    }
}
