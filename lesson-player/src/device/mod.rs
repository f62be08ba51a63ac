//! Playback device adapter
//!
//! Thin abstraction over one media-playback primitive: set a source, load it,
//! play, pause, and report end-of-stream. The sequencer runtime is the only
//! caller; no other component touches the device.
//!
//! # Implementations
//!
//! - [`ClockDevice`]: headless; "plays" a clip by running a timer for its
//!   probed duration. Used by the CLI and tests.
//! - `CpalDevice` (feature `cpal-output`): real audio output through cpal.

mod clock;
#[cfg(feature = "cpal-output")]
mod cpal_output;

pub use clock::ClockDevice;
#[cfg(feature = "cpal-output")]
pub use cpal_output::CpalDevice;

use crate::audio::{ResourceId, ResourceRef};
use crate::error::PlaybackRejected;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Callback invoked with the identity of the resource that finished
///
/// May be called from a timer task or an audio thread, so it must be cheap
/// and thread-safe (typically it just posts a message).
pub type EndOfStreamListener = Arc<dyn Fn(ResourceId) + Send + Sync>;

/// Media-playback primitive driven by the sequencer
///
/// Futures returned by `play` need not be `Send`: the player runs all device
/// calls on one logical event queue.
#[async_trait(?Send)]
pub trait PlaybackDevice {
    /// Attach a source, replacing any previous one. Position resets to zero.
    fn set_source(&mut self, source: ResourceRef);

    /// Detach the current source
    fn clear_source(&mut self);

    /// Identity of the attached source
    fn source(&self) -> Option<ResourceId>;

    /// Prepare the attached source for playback from its beginning
    fn load(&mut self) -> Result<(), PlaybackRejected>;

    /// Start or resume playback of the attached source
    async fn play(&mut self) -> Result<(), PlaybackRejected>;

    /// Pause, keeping the current position and source
    fn pause(&mut self);

    /// True once the attached source played to its end
    fn is_at_end(&self) -> bool;

    /// Register the end-of-stream listener, replacing any previous one
    fn on_end_of_stream(&mut self, listener: EndOfStreamListener);

    /// Detach the end-of-stream listener
    fn clear_end_of_stream(&mut self);
}

/// Shared slot holding the current end-of-stream listener
///
/// Timer tasks and audio callbacks read the slot when they fire, so a
/// listener detached while playback is in flight is never called.
#[derive(Clone, Default)]
pub struct ListenerSlot {
    inner: Arc<Mutex<Option<EndOfStreamListener>>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, listener: EndOfStreamListener) {
        *self.inner.lock() = Some(listener);
    }

    pub fn clear(&self) {
        self.inner.lock().take();
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Invoke the listener, if any. Returns whether one was called.
    pub fn fire(&self, resource: ResourceId) -> bool {
        // Clone out so the listener runs without holding the lock
        let listener = self.inner.lock().clone();
        match listener {
            Some(listener) => {
                listener(resource);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("set", &self.is_set())
            .finish()
    }
}
