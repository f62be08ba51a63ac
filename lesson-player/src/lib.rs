//! Segmented lesson playback
//!
//! Turns a lesson (ordered segments of image, narration and encoded audio)
//! into synchronized slideshow-with-narration playback: decodes audio into
//! revocable resources, preloads images, advances segments exactly when audio
//! ends, and reports the visible narration to the host.

pub mod audio;
pub mod config;
pub mod device;
pub mod error;
pub mod narration;
pub mod playback;
pub mod preload;

pub use config::{MissingAudioPolicy, PlayerConfig};
pub use device::{ClockDevice, PlaybackDevice};
pub use error::{Error, Result};
pub use playback::{LessonPlayer, PlayerHandle, PlayerSnapshot};
