//! Lesson sequencing: state machine, per-lesson arena and runtime

pub mod arena;
pub mod engine;
pub mod sequencer;

pub use arena::{AudioGap, LessonArena};
pub use engine::{Command, LessonPlayer, PlayerHandle, PlayerSnapshot};
pub use sequencer::{
    DeviceView, Effect, Event, LessonToken, SegmentCue, Sequencer, SequencerPolicy,
};
