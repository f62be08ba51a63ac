//! Event types for the lesson player event system
//!
//! Provides the shared event definitions and the EventBus used to publish
//! sequencer activity to host UIs.

mod playback_types;

pub use playback_types::{ImageStatus, PlayerState};

use crate::lesson::SegmentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Lesson player event types
///
/// Events are broadcast via EventBus and can be serialized for transmission
/// to a host UI. All player activity goes through this one enum so hosts can
/// match exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LessonEvent {
    /// A new lesson became active
    LessonLoaded {
        lesson_id: Uuid,
        topic: String,
        segment_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// The active lesson was cleared and its resources released
    LessonCleared {
        lesson_id: Uuid,
        /// Number of audio resources released
        released: usize,
        timestamp: DateTime<Utc>,
    },

    /// The visible segment changed
    ///
    /// `narration` is `None` when there is no active lesson.
    NarrationChanged {
        lesson_id: Option<Uuid>,
        segment_index: Option<usize>,
        narration: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Play state changed
    PlaybackStateChanged {
        old_state: PlayerState,
        new_state: PlayerState,
        timestamp: DateTime<Utc>,
    },

    /// A segment's audio was attached to the playback device from its beginning
    SegmentStarted {
        lesson_id: Uuid,
        segment_index: usize,
        segment_id: SegmentId,
        /// MIME type of the attached resource
        mime_type: String,
        timestamp: DateTime<Utc>,
    },

    /// A segment finished (end-of-stream, dwell elapsed, or manual skip)
    SegmentCompleted {
        lesson_id: Uuid,
        segment_index: usize,
        segment_id: SegmentId,
        timestamp: DateTime<Utc>,
    },

    /// The final segment finished; the player is in its terminal state
    LessonCompleted {
        lesson_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A segment's image finished loading
    ImagePreloaded {
        lesson_id: Uuid,
        segment_id: SegmentId,
        timestamp: DateTime<Utc>,
    },

    /// A segment's image failed to load
    ImagePreloadFailed {
        lesson_id: Uuid,
        segment_id: SegmentId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A segment has no playable audio (absent or failed to decode)
    AudioUnavailable {
        lesson_id: Uuid,
        segment_id: SegmentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The platform refused to start playback
    PlaybackRejected {
        lesson_id: Uuid,
        segment_index: usize,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl LessonEvent {
    /// Event type name as used in the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            LessonEvent::LessonLoaded { .. } => "LessonLoaded",
            LessonEvent::LessonCleared { .. } => "LessonCleared",
            LessonEvent::NarrationChanged { .. } => "NarrationChanged",
            LessonEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            LessonEvent::SegmentStarted { .. } => "SegmentStarted",
            LessonEvent::SegmentCompleted { .. } => "SegmentCompleted",
            LessonEvent::LessonCompleted { .. } => "LessonCompleted",
            LessonEvent::ImagePreloaded { .. } => "ImagePreloaded",
            LessonEvent::ImagePreloadFailed { .. } => "ImagePreloadFailed",
            LessonEvent::AudioUnavailable { .. } => "AudioUnavailable",
            LessonEvent::PlaybackRejected { .. } => "PlaybackRejected",
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Subscribers that fall behind
/// by more than `capacity` events lose the oldest ones.
pub struct EventBus {
    tx: broadcast::Sender<LessonEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<LessonEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LessonEvent,
    ) -> Result<usize, broadcast::error::SendError<LessonEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// # Examples
    ///
    /// ```
    /// use lesson_common::events::{EventBus, LessonEvent, PlayerState};
    ///
    /// let event_bus = EventBus::new(16);
    /// event_bus.emit_lossy(LessonEvent::PlaybackStateChanged {
    ///     old_state: PlayerState::Ready,
    ///     new_state: PlayerState::Playing,
    ///     timestamp: chrono::Utc::now(),
    /// });
    /// ```
    pub fn emit_lossy(&self, event: LessonEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
