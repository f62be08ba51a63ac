//! Headless clock device
//!
//! Plays nothing audible: the attached clip is probed for its exact length
//! and a tokio timer stands in for the audio hardware, firing end-of-stream
//! when the remaining time elapses. Position survives pause/resume.

use super::{EndOfStreamListener, ListenerSlot, PlaybackDevice};
use crate::audio::{probe, ResourceId, ResourceRef};
use crate::error::PlaybackRejected;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

struct Running {
    started: Instant,
    timer: JoinHandle<()>,
}

/// Timer-driven playback device
pub struct ClockDevice {
    /// Playback speed factor (2.0 plays twice as fast)
    speed: f64,
    source: Option<ResourceRef>,
    duration: Option<Duration>,
    /// Position within the clip at the last pause (clip time)
    position: Duration,
    running: Option<Running>,
    at_end: Arc<AtomicBool>,
    listener: ListenerSlot,
}

impl ClockDevice {
    /// Create a clock device; non-positive or non-finite speeds mean 1.0
    pub fn new(speed: f64) -> Self {
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
        Self {
            speed,
            source: None,
            duration: None,
            position: Duration::ZERO,
            running: None,
            at_end: Arc::new(AtomicBool::new(false)),
            listener: ListenerSlot::new(),
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Probed length of the attached clip, once loaded
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some() && !self.is_at_end()
    }

    /// Current position within the clip (clip time)
    pub fn position(&self) -> Duration {
        let position = match &self.running {
            Some(run) => self.position + run.started.elapsed().mul_f64(self.speed),
            None => self.position,
        };
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(run) = self.running.take() {
            run.timer.abort();
        }
    }
}

impl Default for ClockDevice {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[async_trait(?Send)]
impl PlaybackDevice for ClockDevice {
    fn set_source(&mut self, source: ResourceRef) {
        self.cancel_timer();
        trace!("Clock device source set to {}", source.id());
        self.source = Some(source);
        self.duration = None;
        self.position = Duration::ZERO;
        self.at_end.store(false, Ordering::SeqCst);
    }

    fn clear_source(&mut self) {
        self.cancel_timer();
        self.source = None;
        self.duration = None;
        self.position = Duration::ZERO;
        self.at_end.store(false, Ordering::SeqCst);
    }

    fn source(&self) -> Option<ResourceId> {
        self.source.as_ref().map(ResourceRef::id)
    }

    fn load(&mut self) -> Result<(), PlaybackRejected> {
        self.cancel_timer();
        let source = self.source.as_ref().ok_or(PlaybackRejected::NoSource)?;
        let bytes = source.bytes()?;
        let info = probe::probe(bytes, source.mime())
            .map_err(|e| PlaybackRejected::Unplayable(source.id(), e.to_string()))?;

        debug!(
            "Clock device loaded {} ({:?} at speed {})",
            source.id(),
            info.duration(),
            self.speed
        );
        self.duration = Some(info.duration());
        self.position = Duration::ZERO;
        self.at_end.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn play(&mut self) -> Result<(), PlaybackRejected> {
        let source = self.source.as_ref().ok_or(PlaybackRejected::NoSource)?;
        let resource = source.id();
        // Released resources are unplayable even if already loaded
        source.bytes()?;

        if self.duration.is_none() {
            self.load()?;
        }

        if self.at_end.load(Ordering::SeqCst) {
            // Playing a finished clip starts it over
            self.cancel_timer();
            self.position = Duration::ZERO;
            self.at_end.store(false, Ordering::SeqCst);
        }

        if self.running.is_some() {
            return Ok(());
        }

        let duration = self.duration.unwrap_or(Duration::ZERO);
        let remaining = duration.saturating_sub(self.position).div_f64(self.speed);
        let at_end = Arc::clone(&self.at_end);
        let listener = self.listener.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            at_end.store(true, Ordering::SeqCst);
            if !listener.fire(resource) {
                trace!("End of {} with no listener attached", resource);
            }
        });

        self.running = Some(Running {
            started: Instant::now(),
            timer,
        });
        Ok(())
    }

    fn pause(&mut self) {
        let position = self.position();
        if let Some(run) = self.running.take() {
            run.timer.abort();
            self.position = position;
        }
    }

    fn is_at_end(&self) -> bool {
        self.at_end.load(Ordering::SeqCst)
    }

    fn on_end_of_stream(&mut self, listener: EndOfStreamListener) {
        self.listener.set(listener);
    }

    fn clear_end_of_stream(&mut self) {
        self.listener.clear();
    }
}

impl Drop for ClockDevice {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
