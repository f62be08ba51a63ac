//! Narration notifier
//!
//! Tells the host which narration text is visible. Fires on every index
//! change, including the initial load, independent of play state. An absent
//! value means there is no active lesson.

use chrono::Utc;
use lesson_common::{EventBus, LessonEvent};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Host-supplied narration callback
pub type NarrationListener = Box<dyn Fn(Option<&str>) + Send + Sync>;

pub struct NarrationNotifier {
    listener: Option<NarrationListener>,
    event_bus: Arc<EventBus>,
    current: Option<String>,
}

impl NarrationNotifier {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            listener: None,
            event_bus,
            current: None,
        }
    }

    pub fn set_listener(&mut self, listener: NarrationListener) {
        self.listener = Some(listener);
    }

    /// Narration most recently notified
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Notify the visible segment's narration (or `None` for no lesson)
    pub fn notify(&mut self, lesson_id: Option<Uuid>, segment_index: Option<usize>, text: Option<&str>) {
        debug!(index = ?segment_index, "Narration changed");
        self.current = text.map(str::to_string);

        if let Some(listener) = &self.listener {
            listener(text);
        }

        self.event_bus.emit_lossy(LessonEvent::NarrationChanged {
            lesson_id,
            segment_index,
            narration: self.current.clone(),
            timestamp: Utc::now(),
        });
    }
}
