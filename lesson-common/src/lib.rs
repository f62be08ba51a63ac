//! # Lesson Common Library
//!
//! Shared code for the lesson player workspace including:
//! - Lesson and segment data model, with the lesson wire format
//! - Event types (LessonEvent enum) and the EventBus
//! - Player state shared between the sequencer and its hosts
//! - Configuration file resolution

pub mod config;
pub mod error;
pub mod events;
pub mod lesson;

pub use error::{Error, Result};
pub use events::{EventBus, LessonEvent, PlayerState};
pub use lesson::{EncodedAudio, Lesson, Segment, SegmentId};
